use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use keystone_auth::{AccessTokenSigner, ResolvedIdentity};
use keystone_core::PrincipalId;

use crate::store::CredentialStore;

use super::ServiceError;

/// Turns a bearer token into a [`ResolvedIdentity`] on every request.
///
/// The token only proves *who*; the principal's active flag, roles and
/// permissions are always re-read from the store.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn CredentialStore>,
    signer: AccessTokenSigner,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn CredentialStore>, signer: AccessTokenSigner) -> Self {
        Self { store, signer }
    }

    /// Any token problem is reported as the same generic `UNAUTHORIZED`.
    pub async fn resolve_bearer(&self, token: &str) -> Result<ResolvedIdentity, ServiceError> {
        if token.is_empty() {
            return Err(ServiceError::Unauthorized("Missing token"));
        }
        let claims = self.signer.verify(token, Utc::now()).map_err(|err| {
            debug!(error = %err, "access token rejected");
            ServiceError::Unauthorized("Invalid token")
        })?;
        self.resolve_principal(claims.sub).await
    }

    pub async fn resolve_principal(&self, id: PrincipalId) -> Result<ResolvedIdentity, ServiceError> {
        let principal = match self.store.get_principal(id).await? {
            Some(p) if p.is_active => p,
            _ => return Err(ServiceError::Unauthorized("Invalid user")),
        };
        let roles = self.store.get_roles(&principal.role_ids).await?;
        Ok(ResolvedIdentity::new(principal, roles))
    }
}

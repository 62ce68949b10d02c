//! Identity services: the operations the HTTP layer exposes.
//!
//! Every service is constructed with its collaborators (store, signer, hasher,
//! recorder) and holds them behind `Arc`s, so cloning a service is cheap.

use thiserror::Error;

use keystone_auth::{AuthzError, HashedPassword, PasswordError, PasswordHasherService, RoleError, TokenError};
use keystone_core::DomainError;

use crate::store::StoreError;

pub mod audit;
pub mod bootstrap;
pub mod directory;
pub mod identity;
pub mod seed;
pub mod sessions;

pub use audit::AuditRecorder;
pub use bootstrap::BootstrapGate;
pub use directory::{DirectoryService, NewPrincipal, PrincipalPatch};
pub use identity::IdentityResolver;
pub use seed::seed_system_role;
pub use sessions::{AuthOutcome, IssuedSession, LoginInput, SessionService, SessionSettings, SignupInput};

/// Service-level failure taxonomy. Each variant maps to exactly one wire code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("Missing permission: {0}")]
    Forbidden(String),

    #[error("Admin signup required before login")]
    SignupRequired,

    #[error("Admin signup is closed")]
    SignupClosed,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("{0}")]
    InvalidRefresh(&'static str),

    #[error("{field} already exists")]
    Conflict { field: String },

    #[error("{0}")]
    RoleProtected(String),

    #[error("{0}")]
    RoleAssignmentInvalid(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("SuperAdmin role is not available")]
    RoleNotReady,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable machine-readable code for the failure envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::Unauthorized(_) => "UNAUTHORIZED",
            ServiceError::Forbidden(_) => "FORBIDDEN",
            ServiceError::SignupRequired => "SIGNUP_REQUIRED",
            ServiceError::SignupClosed => "SIGNUP_CLOSED",
            ServiceError::InvalidCredentials => "INVALID_CREDENTIALS",
            ServiceError::InvalidRefresh(_) => "INVALID_REFRESH",
            ServiceError::Conflict { .. } => "CONFLICT",
            ServiceError::RoleProtected(_) => "ROLE_PROTECTED",
            ServiceError::RoleAssignmentInvalid(_) => "ROLE_ASSIGNMENT_INVALID",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::RoleNotReady => "ROLE_NOT_READY",
            ServiceError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, ServiceError::RoleNotReady | ServiceError::Internal(_))
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict { field } => ServiceError::Conflict { field },
            StoreError::NotFound => ServiceError::NotFound("Record"),
            StoreError::UnknownRole => ServiceError::NotFound("Role"),
            StoreError::BootstrapClosed => ServiceError::SignupClosed,
            StoreError::Backend(msg) => ServiceError::Internal(msg),
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        ServiceError::Validation(value.message().to_string())
    }
}

impl From<AuthzError> for ServiceError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::Unauthenticated => ServiceError::Unauthorized("Missing token"),
            AuthzError::Forbidden(key) => ServiceError::Forbidden(key),
        }
    }
}

impl From<RoleError> for ServiceError {
    fn from(value: RoleError) -> Self {
        ServiceError::RoleProtected(value.to_string())
    }
}

impl From<PasswordError> for ServiceError {
    fn from(value: PasswordError) -> Self {
        ServiceError::Internal(value.to_string())
    }
}

impl From<TokenError> for ServiceError {
    fn from(value: TokenError) -> Self {
        ServiceError::Internal(value.to_string())
    }
}

/// Hash on the blocking pool.
pub(crate) async fn hash_password(passwords: &PasswordHasherService, password: String) -> Result<HashedPassword, ServiceError> {
    let passwords = passwords.clone();
    tokio::task::spawn_blocking(move || passwords.hash(&password))
        .await
        .map_err(|e| ServiceError::Internal(format!("hashing task failed: {e}")))?
        .map_err(Into::into)
}

/// Verify on the blocking pool. `None` runs against the dummy hash and returns false.
pub(crate) async fn verify_password(
    passwords: &PasswordHasherService,
    password: String,
    hash: Option<HashedPassword>,
) -> Result<bool, ServiceError> {
    let passwords = passwords.clone();
    tokio::task::spawn_blocking(move || match hash {
        Some(hash) => passwords.verify(&password, &hash),
        None => Ok(passwords.verify_dummy(&password)),
    })
    .await
    .map_err(|e| ServiceError::Internal(format!("verification task failed: {e}")))?
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_wire_codes() {
        assert_eq!(ServiceError::from(StoreError::conflict("email")).code(), "CONFLICT");
        assert_eq!(ServiceError::from(StoreError::BootstrapClosed).code(), "SIGNUP_CLOSED");
        assert_eq!(ServiceError::from(StoreError::NotFound).code(), "NOT_FOUND");
        assert_eq!(ServiceError::from(StoreError::UnknownRole), ServiceError::NotFound("Role"));

        let internal = ServiceError::from(StoreError::Backend("boom".into()));
        assert_eq!(internal.code(), "INTERNAL_ERROR");
        assert!(internal.is_internal());
    }

    #[test]
    fn conflict_message_names_field() {
        let err = ServiceError::from(StoreError::conflict("email"));
        assert_eq!(err.to_string(), "email already exists");
    }

    #[test]
    fn domain_and_authz_errors_map() {
        assert_eq!(
            ServiceError::from(DomainError::validation("bad")),
            ServiceError::Validation("bad".into())
        );
        assert_eq!(
            ServiceError::from(AuthzError::Forbidden("roles:assign".into())).code(),
            "FORBIDDEN"
        );
        assert_eq!(ServiceError::from(AuthzError::Unauthenticated).code(), "UNAUTHORIZED");
    }
}

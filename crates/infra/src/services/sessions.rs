//! Login, bootstrap signup, refresh rotation and logout.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument};

use keystone_auth::permissions::USERS_UPDATE;
use keystone_auth::principal::validate_password;
use keystone_auth::{
    AccessTokenSigner, AuditEntry, AuditMeta, DeviceInfo, PasswordHasherService, Principal, Profile,
    RefreshSecret, RefreshSession, RefreshTokenHasher, ResolvedIdentity,
};
use keystone_core::{Email, PrincipalId};

use crate::store::CredentialStore;

use super::{AuditRecorder, BootstrapGate, ServiceError, hash_password, verify_password};

/// Token lifetimes.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub refresh_ttl: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            refresh_ttl: Duration::days(7),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignupInput {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

/// Credentials minted for one session. The refresh secret leaves the server once.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: RefreshSecret,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub identity: ResolvedIdentity,
    pub session: IssuedSession,
}

/// Dual-token session lifecycle: short-lived access JWTs plus rotating opaque
/// refresh secrets persisted only as salted hashes.
#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn CredentialStore>,
    gate: BootstrapGate,
    passwords: PasswordHasherService,
    signer: AccessTokenSigner,
    refresh_hasher: RefreshTokenHasher,
    settings: SessionSettings,
    audit: AuditRecorder,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        passwords: PasswordHasherService,
        signer: AccessTokenSigner,
        refresh_hasher: RefreshTokenHasher,
        settings: SessionSettings,
        audit: AuditRecorder,
    ) -> Self {
        Self {
            gate: BootstrapGate::new(store.clone()),
            store,
            passwords,
            signer,
            refresh_hasher,
            settings,
            audit,
        }
    }

    pub fn gate(&self) -> &BootstrapGate {
        &self.gate
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    /// Create the first system-role holder. Open only while the gate is.
    #[instrument(skip(self, input, device, meta), err)]
    pub async fn bootstrap_signup(&self, input: SignupInput, device: DeviceInfo, meta: AuditMeta) -> Result<AuthOutcome, ServiceError> {
        let profile = Profile::parse(&input.name, &input.email, Some(&input.phone), true)?;
        validate_password(&input.password)?;

        if !self.gate.can_bootstrap().await? {
            return Err(ServiceError::SignupClosed);
        }

        let system = self
            .store
            .system_role()
            .await?
            .ok_or(ServiceError::RoleNotReady)?;

        let hash = hash_password(&self.passwords, input.password).await?;
        let principal = Principal::new(profile, hash, vec![system.id], None, Utc::now())?;

        // The store re-checks the gate atomically; a lost race surfaces as SignupClosed.
        self.store
            .insert_bootstrap_principal(principal.clone(), system.id)
            .await?;

        let session = self.issue(principal.id, device).await?;
        info!(principal_id = %principal.id, "bootstrap signup completed");

        self.audit
            .record(
                AuditEntry::new("auth", "signup", meta)
                    .actor(principal.id)
                    .entity(principal.id),
            )
            .await;

        Ok(AuthOutcome {
            identity: ResolvedIdentity::new(principal, vec![system]),
            session,
        })
    }

    /// Authenticate by email and password.
    ///
    /// Unknown email, inactive principal and wrong password are indistinguishable
    /// to the caller, and all three pay for one Argon2 verification.
    #[instrument(skip(self, input, device, meta), err)]
    pub async fn login(&self, input: LoginInput, device: DeviceInfo, meta: AuditMeta) -> Result<AuthOutcome, ServiceError> {
        if self.gate.can_bootstrap().await? {
            return Err(ServiceError::SignupRequired);
        }

        let email = Email::parse(&input.email)?;
        validate_password(&input.password)?;

        let principal = self.store.find_principal_by_email(&email).await?;
        let matched = verify_password(
            &self.passwords,
            input.password,
            principal.as_ref().map(|p| p.password_hash.clone()),
        )
        .await?;

        let principal = match principal {
            Some(p) if matched && p.is_active => p,
            _ => return Err(ServiceError::InvalidCredentials),
        };

        let roles = self.store.get_roles(&principal.role_ids).await?;
        let session = self.issue(principal.id, device).await?;

        self.audit
            .record(
                AuditEntry::new("auth", "login", meta)
                    .actor(principal.id)
                    .entity(principal.id),
            )
            .await;

        Ok(AuthOutcome {
            identity: ResolvedIdentity::new(principal, roles),
            session,
        })
    }

    /// Rotate a refresh secret: revoke it, then mint a new session for its owner.
    #[instrument(skip(self, raw, device), err)]
    pub async fn refresh(&self, raw: Option<&str>, device: DeviceInfo) -> Result<IssuedSession, ServiceError> {
        let raw = raw
            .filter(|r| !r.is_empty())
            .ok_or(ServiceError::InvalidRefresh("Refresh token missing"))?;
        let hash = self.refresh_hasher.hash(&RefreshSecret::from_raw(raw));

        let revoked = self
            .store
            .revoke_session_if_active(&hash, Utc::now())
            .await?
            .ok_or(ServiceError::InvalidRefresh("Refresh token invalid"))?;

        match self.store.get_principal(revoked.principal_id).await? {
            Some(p) if p.is_active => {}
            _ => return Err(ServiceError::Unauthorized("Invalid user")),
        }

        self.issue(revoked.principal_id, device).await
    }

    /// Revoke the presented refresh secret, if any. Always succeeds for the caller.
    #[instrument(skip(self, raw, meta), err)]
    pub async fn logout(&self, raw: Option<&str>, meta: AuditMeta) -> Result<(), ServiceError> {
        let mut entry = AuditEntry::new("auth", "logout", meta);

        if let Some(raw) = raw.filter(|r| !r.is_empty()) {
            let hash = self.refresh_hasher.hash(&RefreshSecret::from_raw(raw));
            if let Some(session) = self.store.revoke_session_if_active(&hash, Utc::now()).await? {
                entry = entry.actor(session.principal_id);
            }
        }

        self.audit.record(entry).await;
        Ok(())
    }

    /// Revoke every session of `target`. Allowed for the target itself or for
    /// holders of `users:update`.
    #[instrument(skip(self, actor, meta), fields(actor_id = %actor.principal.id), err)]
    pub async fn force_logout(&self, actor: &ResolvedIdentity, target: PrincipalId, meta: AuditMeta) -> Result<u64, ServiceError> {
        if actor.principal.id != target && !actor.can(&USERS_UPDATE) {
            return Err(ServiceError::Forbidden(USERS_UPDATE.as_str().to_string()));
        }

        let revoked = self.revoke_all(target).await?;

        self.audit
            .record(
                AuditEntry::new("auth", "force-logout", meta)
                    .actor(actor.principal.id)
                    .entity(target),
            )
            .await;

        Ok(revoked)
    }

    /// Revoke every unrevoked session of `principal`.
    pub async fn revoke_all(&self, principal: PrincipalId) -> Result<u64, ServiceError> {
        let revoked = self.store.revoke_all_sessions(principal, Utc::now()).await?;
        info!(principal_id = %principal, revoked, "sessions revoked");
        Ok(revoked)
    }

    async fn issue(&self, principal_id: PrincipalId, device: DeviceInfo) -> Result<IssuedSession, ServiceError> {
        let now = Utc::now();
        let (access_token, access_expires_at) = self.signer.issue(principal_id, now)?;

        let refresh_token = RefreshSecret::generate();
        let session = RefreshSession::new(
            principal_id,
            self.refresh_hasher.hash(&refresh_token),
            device,
            self.settings.refresh_ttl,
            now,
        );
        let refresh_expires_at = session.expires_at;
        self.store.insert_session(session).await?;

        Ok(IssuedSession {
            access_token,
            access_expires_at,
            refresh_token,
            refresh_expires_at,
        })
    }
}

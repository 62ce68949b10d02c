//! Service wiring: store selection, seeding, and the shared service bundle.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use keystone_auth::{AccessTokenSigner, PasswordHasherService, RefreshTokenHasher};
use keystone_infra::{
    AuditRecorder, CredentialStore, DirectoryService, IdentityResolver, InMemoryCredentialStore,
    PostgresCredentialStore, ServiceError, SessionService, SessionSettings, SessionSweeper,
    seed_system_role,
};

use crate::config::ApiConfig;
use crate::cookies::CookiePolicy;

/// Everything a handler needs, shared behind one `Arc`.
#[derive(Clone)]
pub struct AppServices {
    pub sessions: SessionService,
    pub resolver: IdentityResolver,
    pub directory: DirectoryService,
    pub cookies: CookiePolicy,
    sweeper: SessionSweeper,
}

impl AppServices {
    /// Wire services over `store` and seed the system role.
    pub async fn assemble<S>(store: Arc<S>, config: &ApiConfig, passwords: PasswordHasherService) -> Result<Self, ServiceError>
    where
        S: CredentialStore + 'static,
    {
        seed_system_role(store.as_ref()).await?;

        let signer = AccessTokenSigner::new(config.jwt_access_secret.as_bytes(), config.access_token_ttl);
        let audit = AuditRecorder::new(store.clone());

        let sessions = SessionService::new(
            store.clone(),
            passwords.clone(),
            signer.clone(),
            RefreshTokenHasher::new(config.refresh_token_salt.as_bytes()),
            SessionSettings {
                refresh_ttl: config.refresh_token_ttl(),
            },
            audit.clone(),
        );
        let resolver = IdentityResolver::new(store.clone(), signer);
        let directory = DirectoryService::new(store.clone(), passwords, sessions.clone(), audit);
        let sweeper = SessionSweeper::new(store, config.session_sweep_interval);

        Ok(Self {
            sessions,
            resolver,
            directory,
            cookies: CookiePolicy::new(config.cookie_secure, config.refresh_token_ttl_days),
            sweeper,
        })
    }

    pub fn sweeper(&self) -> SessionSweeper {
        self.sweeper.clone()
    }
}

/// Build services from configuration: Postgres when `DATABASE_URL` is set,
/// otherwise the in-memory store.
pub async fn build_services(config: &ApiConfig) -> anyhow::Result<AppServices> {
    let passwords = PasswordHasherService::new().context("argon2 parameters")?;

    let services = match &config.database_url {
        Some(url) => {
            let store = PostgresCredentialStore::connect(url).await.context("connect to postgres")?;
            store.migrate().await.context("apply schema")?;
            info!(store = "postgres", "credential store ready");
            AppServices::assemble(Arc::new(store), config, passwords).await
        }
        None => {
            info!(store = "in-memory", "credential store ready; data is not persisted");
            AppServices::assemble(Arc::new(InMemoryCredentialStore::new()), config, passwords).await
        }
    };

    services.context("seed system role")
}

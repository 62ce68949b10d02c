use std::sync::Arc;

use crate::store::CredentialStore;

use super::ServiceError;

/// Decides whether the one-time privileged signup is open.
#[derive(Clone)]
pub struct BootstrapGate {
    store: Arc<dyn CredentialStore>,
}

impl BootstrapGate {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// True iff no principal holds the system role. An unseeded system role
    /// counts as "no holder", so the gate is open.
    pub async fn can_bootstrap(&self) -> Result<bool, ServiceError> {
        let Some(system) = self.store.system_role().await? else {
            return Ok(true);
        };
        Ok(self.store.count_principals_with_role(system.id).await? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use keystone_auth::{HashedPassword, Principal, Profile};

    use crate::services::seed_system_role;
    use crate::store::{InMemoryCredentialStore, PrincipalStore};

    #[tokio::test]
    async fn closes_once_system_role_has_a_holder() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let gate = BootstrapGate::new(store.clone());
        assert!(gate.can_bootstrap().await.unwrap());

        let system = seed_system_role(store.as_ref()).await.unwrap();
        assert!(gate.can_bootstrap().await.unwrap());

        let profile = Profile::parse("Root", "root@example.com", Some("555"), true).unwrap();
        let admin = Principal::new(profile, HashedPassword::from_phc("x"), vec![system.id], None, Utc::now()).unwrap();
        store.insert_bootstrap_principal(admin, system.id).await.unwrap();

        assert!(!gate.can_bootstrap().await.unwrap());
    }
}

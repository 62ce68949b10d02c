use chrono::Utc;
use tracing::{info, instrument};

use keystone_auth::Role;

use crate::store::RoleStore;

use super::ServiceError;

/// Create or refresh the protected system role with the full permission catalog.
///
/// Safe to run on every start; the store upserts by name.
#[instrument(skip(store), err)]
pub async fn seed_system_role(store: &dyn RoleStore) -> Result<Role, ServiceError> {
    let role = store.upsert_system_role(Role::system(Utc::now())).await?;
    info!(role_id = %role.id, permissions = role.permissions.len(), "system role seeded");
    Ok(role)
}

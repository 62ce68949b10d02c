//! Role records and the system-role protection invariant.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use keystone_core::{DomainError, DomainResult, RoleId};

use crate::permissions::{self, Permission};

/// Name of the protected, all-permission system role.
pub const SUPER_ADMIN: &str = "SuperAdmin";

const SUPER_ADMIN_DESCRIPTION: &str = "System super administrator";

/// A named bundle of permission keys.
///
/// # Invariants
/// - `permissions` is non-empty and drawn from the catalog.
/// - Exactly one role has `is_system == true`; it is created by seeding and is
///   read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    #[serde(rename = "_id")]
    pub id: RoleId,
    pub name: String,
    pub description: String,
    #[serde(rename = "permissionKeys")]
    pub permissions: Vec<Permission>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoleError {
    #[error("{0} role cannot be modified")]
    Protected(String),
}

impl Role {
    /// The system role definition: full catalog, `is_system = true`.
    pub fn system(now: DateTime<Utc>) -> Self {
        Self {
            id: RoleId::new(),
            name: SUPER_ADMIN.to_string(),
            description: SUPER_ADMIN_DESCRIPTION.to_string(),
            permissions: permissions::catalog().to_vec(),
            is_system: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a new non-system role from validated input.
    pub fn new(draft: RoleDraft, now: DateTime<Utc>) -> DomainResult<Self> {
        let name = validate_name(&draft.name)?;
        let permissions = validate_permissions(&draft.permissions)?;

        Ok(Self {
            id: RoleId::new(),
            name,
            description: draft.description.trim().to_string(),
            permissions,
            is_system: false,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_protected(&self) -> bool {
        self.is_system || self.name == SUPER_ADMIN
    }

    /// Fails for the system role; every mutation path must call this first.
    pub fn ensure_mutable(&self) -> Result<(), RoleError> {
        if self.is_protected() {
            return Err(RoleError::Protected(self.name.clone()));
        }
        Ok(())
    }

    /// Apply a partial update. Caller must have checked [`Role::ensure_mutable`].
    pub fn apply(&mut self, patch: RolePatch, now: DateTime<Utc>) -> DomainResult<()> {
        if let Some(name) = patch.name {
            self.name = validate_name(&name)?;
        }
        if let Some(description) = patch.description {
            self.description = description.trim().to_string();
        }
        if let Some(keys) = patch.permissions {
            self.permissions = validate_permissions(&keys)?;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn grants(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p.as_str() == permission)
    }
}

/// Input for creating a role.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "permissionKeys")]
    pub permissions: Vec<String>,
}

/// Partial role update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "permissionKeys")]
    pub permissions: Option<Vec<String>>,
}

fn validate_name(name: &str) -> DomainResult<String> {
    let name = name.trim();
    if name.chars().count() < 2 {
        return Err(DomainError::validation("role name must be at least 2 characters"));
    }
    Ok(name.to_string())
}

/// Deduplicates while keeping first-seen order.
fn validate_permissions(keys: &[String]) -> DomainResult<Vec<Permission>> {
    if keys.is_empty() {
        return Err(DomainError::validation("role must grant at least one permission"));
    }

    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        if !permissions::is_known(key) {
            return Err(DomainError::validation(format!("unknown permission '{key}'")));
        }
        if seen.insert(key.as_str()) {
            out.push(Permission::new(key.clone()));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str, keys: &[&str]) -> RoleDraft {
        RoleDraft {
            name: name.to_string(),
            description: " Limited ".to_string(),
            permissions: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[test]
    fn system_role_holds_full_catalog() {
        let role = Role::system(Utc::now());
        assert!(role.is_system);
        assert_eq!(role.name, SUPER_ADMIN);
        assert_eq!(role.permissions.len(), permissions::catalog().len());
        assert!(role.ensure_mutable().is_err());
    }

    #[test]
    fn new_role_is_never_system_and_trims_input() {
        let role = Role::new(draft("  Viewer ", &["dashboard:view"]), Utc::now()).unwrap();
        assert!(!role.is_system);
        assert_eq!(role.name, "Viewer");
        assert_eq!(role.description, "Limited");
        assert!(role.ensure_mutable().is_ok());
    }

    #[test]
    fn rejects_empty_or_unknown_permissions() {
        assert!(matches!(
            Role::new(draft("Viewer", &[]), Utc::now()),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            Role::new(draft("Viewer", &["dashboard:fly"]), Utc::now()),
            Err(DomainError::Validation(msg)) if msg.contains("dashboard:fly")
        ));
    }

    #[test]
    fn duplicate_keys_collapse() {
        let role = Role::new(
            draft("Viewer", &["dashboard:view", "users:view", "dashboard:view"]),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(role.permissions, vec![Permission::new("dashboard:view"), Permission::new("users:view")]);
    }

    #[test]
    fn patch_only_touches_present_fields() {
        let mut role = Role::new(draft("Viewer", &["dashboard:view"]), Utc::now()).unwrap();
        role.apply(
            RolePatch {
                description: Some("read only".into()),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(role.name, "Viewer");
        assert_eq!(role.description, "read only");
        assert!(role.grants("dashboard:view"));
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let role = Role::new(draft("Viewer", &["dashboard:view"]), Utc::now()).unwrap();
        let json = serde_json::to_value(&role).unwrap();
        assert!(json.get("_id").is_some());
        assert_eq!(json["permissionKeys"][0], "dashboard:view");
        assert_eq!(json["isSystem"], false);
    }
}

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use crate::{Permission, Principal, Role};

/// Deduplicated union of the permission keys granted by a principal's roles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn from_roles<'a>(roles: impl IntoIterator<Item = &'a Role>) -> Self {
        Self(
            roles
                .into_iter()
                .flat_map(|r| r.permissions.iter().cloned())
                .collect(),
        )
    }

    pub fn contains(&self, permission: &Permission) -> bool {
        self.0.contains(permission)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A principal resolved for one request: the record, its roles, and their
/// flattened permissions. Rebuilt on every request, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub principal: Principal,
    pub roles: Vec<Role>,
    pub permissions: PermissionSet,
}

impl ResolvedIdentity {
    pub fn new(principal: Principal, roles: Vec<Role>) -> Self {
        let permissions = PermissionSet::from_roles(&roles);
        Self {
            principal,
            roles,
            permissions,
        }
    }

    pub fn can(&self, permission: &Permission) -> bool {
        self.permissions.contains(permission)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Fail-closed permission check: no identity is a denial, never a default allow.
///
/// - No IO
/// - No panics
pub fn authorize(identity: Option<&ResolvedIdentity>, required: &Permission) -> Result<(), AuthzError> {
    let identity = identity.ok_or(AuthzError::Unauthenticated)?;
    if identity.can(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::HashedPassword;
    use crate::permissions::{ROLES_ASSIGN, USERS_VIEW};
    use crate::principal::Profile;
    use crate::roles::RoleDraft;
    use chrono::Utc;

    fn role(keys: &[&str]) -> Role {
        Role::new(
            RoleDraft {
                name: format!("role-{}", keys.join("-")),
                description: String::new(),
                permissions: keys.iter().map(|k| k.to_string()).collect(),
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn identity(roles: Vec<Role>) -> ResolvedIdentity {
        let profile = Profile::parse("Ada", "ada@example.com", None, false).unwrap();
        let ids = roles.iter().map(|r| r.id).collect();
        let principal = Principal::new(profile, HashedPassword::from_phc("x"), ids, None, Utc::now()).unwrap();
        ResolvedIdentity::new(principal, roles)
    }

    #[test]
    fn missing_identity_is_unauthenticated() {
        assert_eq!(authorize(None, &USERS_VIEW), Err(AuthzError::Unauthenticated));
    }

    #[test]
    fn permissions_union_across_roles_deduplicated() {
        let id = identity(vec![
            role(&["users:view", "roles:view"]),
            role(&["users:view", "roles:assign"]),
        ]);
        assert_eq!(id.permissions.len(), 3);
        assert!(authorize(Some(&id), &ROLES_ASSIGN).is_ok());
        assert!(authorize(Some(&id), &USERS_VIEW).is_ok());
    }

    #[test]
    fn forbidden_names_missing_key() {
        let id = identity(vec![role(&["users:view"])]);
        assert_eq!(
            authorize(Some(&id), &ROLES_ASSIGN),
            Err(AuthzError::Forbidden("roles:assign".into()))
        );
    }

    #[test]
    fn system_role_grants_everything() {
        let id = identity(vec![Role::system(Utc::now())]);
        for p in crate::permissions::catalog() {
            assert!(id.can(p));
        }
    }
}

use std::borrow::Cow;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

/// Modules a permission can target, in catalog order.
pub const MODULES: &[&str] = &[
    "users",
    "roles",
    "permissions",
    "products",
    "categories",
    "customers",
    "shelves",
    "audit",
    "dashboard",
];

/// Actions available on every module, in catalog order.
pub const ACTIONS: &[&str] = &["view", "create", "update", "delete", "assign"];

pub const USERS_VIEW: Permission = Permission::from_static("users:view");
pub const USERS_CREATE: Permission = Permission::from_static("users:create");
pub const USERS_UPDATE: Permission = Permission::from_static("users:update");
pub const ROLES_VIEW: Permission = Permission::from_static("roles:view");
pub const ROLES_CREATE: Permission = Permission::from_static("roles:create");
pub const ROLES_UPDATE: Permission = Permission::from_static("roles:update");
pub const ROLES_DELETE: Permission = Permission::from_static("roles:delete");
pub const ROLES_ASSIGN: Permission = Permission::from_static("roles:assign");
pub const PERMISSIONS_VIEW: Permission = Permission::from_static("permissions:view");
pub const AUDIT_VIEW: Permission = Permission::from_static("audit:view");

static CATALOG: LazyLock<Vec<Permission>> = LazyLock::new(|| {
    MODULES
        .iter()
        .flat_map(|module| {
            ACTIONS
                .iter()
                .map(move |action| Permission::new(format!("{module}:{action}")))
        })
        .collect()
});

/// The full permission catalog: every `module:action` pair, module-major.
///
/// This is the single source of truth for permission keys. Role definitions are
/// validated against it and `GET /permissions` serves it verbatim.
pub fn catalog() -> &'static [Permission] {
    &CATALOG
}

/// Whether `key` is part of the catalog.
pub fn is_known(key: &str) -> bool {
    catalog().iter().any(|p| p.as_str() == key)
}

/// Permission key of the form `module:action`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn module(&self) -> &str {
        self.as_str().split_once(':').map_or(self.as_str(), |(m, _)| m)
    }

    pub fn action(&self) -> &str {
        self.as_str().split_once(':').map_or("", |(_, a)| a)
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

//! Credential store abstraction.
//!
//! Four narrow traits (roles, principals, sessions, audit) with one combined
//! [`CredentialStore`] bound for services that need all of them. Implementations:
//! - [`InMemoryCredentialStore`] for dev/tests (single `RwLock` critical section)
//! - [`PostgresCredentialStore`] for deployments (`sqlx`)
//!
//! ## Atomicity contract
//!
//! - `insert_bootstrap_principal` must be a conditional create: of any number of
//!   concurrent callers at most one succeeds, the rest get `BootstrapClosed`.
//! - `revoke_session_if_active` must revoke-and-return in one step: of any number
//!   of concurrent callers presenting the same hash at most one gets `Some`.
//! - `update_principal` reads, applies and writes under one row lock, touching only
//!   the columns the [`PrincipalUpdate`] sets. New role ids are checked to exist in
//!   the same step, and `delete_role` serialises against that check.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use keystone_auth::{AuditRecord, Principal, RefreshSession, RefreshTokenHash, Role};
use keystone_core::{DomainResult, Email, PrincipalId, RoleId};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryCredentialStore;
pub use postgres::PostgresCredentialStore;

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{field} already exists")]
    Conflict { field: String },

    #[error("record not found")]
    NotFound,

    #[error("bootstrap has already completed")]
    BootstrapClosed,

    #[error("referenced role does not exist")]
    UnknownRole,

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn conflict(field: impl Into<String>) -> Self {
        Self::Conflict { field: field.into() }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Bounded list query: `page >= 1`, `limit` in `1..=100`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
    pub search: Option<String>,
}

impl ListQuery {
    pub fn new(page: Option<u32>, limit: Option<u32>, search: Option<String>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            search: search
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }

    /// Case-insensitive substring match against the search term; true when unset.
    pub fn matches(&self, haystacks: &[&str]) -> bool {
        match &self.search {
            None => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                haystacks.iter().any(|h| h.to_lowercase().contains(&needle))
            }
        }
    }
}

impl Default for ListQuery {
    fn default() -> Self {
        Self::new(None, None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

/// One page of a list result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, query: &ListQuery, total: u64) -> Self {
        Self {
            items,
            pagination: Pagination {
                page: query.page,
                limit: query.limit,
                total,
            },
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }
}

/// Column-scoped principal change; `None` leaves the stored column as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrincipalUpdate {
    pub name: Option<String>,
    /// `Some(None)` clears the phone.
    pub phone: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub role_ids: Option<Vec<RoleId>>,
}

impl PrincipalUpdate {
    pub fn roles(role_ids: Vec<RoleId>) -> Self {
        Self {
            role_ids: Some(role_ids),
            ..Self::default()
        }
    }

    pub fn active(is_active: bool) -> Self {
        Self {
            is_active: Some(is_active),
            ..Self::default()
        }
    }

    /// Apply the set columns to `principal` and stamp `updated_at`.
    pub fn apply(&self, principal: &mut Principal, now: DateTime<Utc>) -> DomainResult<()> {
        if let Some(role_ids) = &self.role_ids {
            principal.assign_roles(role_ids.clone(), now)?;
        }
        if let Some(name) = &self.name {
            principal.name = name.clone();
        }
        if let Some(phone) = &self.phone {
            principal.phone = phone.clone();
        }
        if let Some(active) = self.is_active {
            principal.is_active = active;
        }
        principal.updated_at = now;
        Ok(())
    }
}

/// A row as it stood immediately before and after one write.
#[derive(Debug, Clone, PartialEq)]
pub struct Change<T> {
    pub before: T,
    pub after: T,
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Create or refresh the system role by name; returns the stored record.
    ///
    /// Idempotent: repeated calls leave exactly one system role holding `role.permissions`.
    async fn upsert_system_role(&self, role: Role) -> StoreResult<Role>;

    async fn system_role(&self) -> StoreResult<Option<Role>>;

    /// Fails with `Conflict { field: "name" }` on a duplicate name.
    async fn insert_role(&self, role: Role) -> StoreResult<()>;

    async fn get_role(&self, id: RoleId) -> StoreResult<Option<Role>>;

    /// Roles for the given ids, in the order given; unknown ids are skipped.
    async fn get_roles(&self, ids: &[RoleId]) -> StoreResult<Vec<Role>>;

    async fn update_role(&self, role: &Role) -> StoreResult<()>;

    /// Fails with `Conflict { field: "roleIds" }` while any principal holds the role.
    async fn delete_role(&self, id: RoleId) -> StoreResult<()>;

    async fn list_roles(&self, query: &ListQuery) -> StoreResult<Page<Role>>;
}

#[async_trait]
pub trait PrincipalStore: Send + Sync {
    /// Fails with `Conflict { field: "email" }` on a duplicate email.
    async fn insert_principal(&self, principal: Principal) -> StoreResult<()>;

    /// Insert the first holder of `system_role`, iff none exists yet.
    async fn insert_bootstrap_principal(&self, principal: Principal, system_role: RoleId) -> StoreResult<()>;

    async fn get_principal(&self, id: PrincipalId) -> StoreResult<Option<Principal>>;

    async fn find_principal_by_email(&self, email: &Email) -> StoreResult<Option<Principal>>;

    /// Apply `update` to the current row. Fails with `NotFound` for an unknown
    /// principal and `UnknownRole` when a new role id no longer exists.
    async fn update_principal(&self, id: PrincipalId, update: &PrincipalUpdate, now: DateTime<Utc>) -> StoreResult<Change<Principal>>;

    async fn count_principals_with_role(&self, role: RoleId) -> StoreResult<u64>;

    async fn list_principals(&self, query: &ListQuery) -> StoreResult<Page<Principal>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: RefreshSession) -> StoreResult<()>;

    /// Revoke the session with `hash` iff it is unrevoked and unexpired at `now`,
    /// returning the revoked row.
    async fn revoke_session_if_active(&self, hash: &RefreshTokenHash, now: DateTime<Utc>) -> StoreResult<Option<RefreshSession>>;

    /// Revoke every unrevoked session of `principal`; returns how many were revoked.
    async fn revoke_all_sessions(&self, principal: PrincipalId, now: DateTime<Utc>) -> StoreResult<u64>;

    /// Delete sessions whose expiry is at or before `now`; returns how many were deleted.
    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    async fn list_sessions(&self, principal: PrincipalId) -> StoreResult<Vec<RefreshSession>>;
}

/// Append-only: no update or delete exists.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit(&self, record: AuditRecord) -> StoreResult<()>;

    /// Newest first; `search` matches module or action.
    async fn list_audit(&self, query: &ListQuery) -> StoreResult<Page<AuditRecord>>;
}

/// Everything the identity services persist.
pub trait CredentialStore: RoleStore + PrincipalStore + SessionStore + AuditStore {}

impl<T> CredentialStore for T where T: RoleStore + PrincipalStore + SessionStore + AuditStore {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_query_bounds() {
        let q = ListQuery::new(Some(0), Some(500), Some("  ".into()));
        assert_eq!(q.page, 1);
        assert_eq!(q.limit, 100);
        assert_eq!(q.search, None);

        let q = ListQuery::new(None, Some(0), None);
        assert_eq!(q.limit, 1);

        let q = ListQuery::default();
        assert_eq!((q.page, q.limit), (1, 10));
    }

    #[test]
    fn offset_and_matching() {
        let q = ListQuery::new(Some(3), Some(20), Some("ROLE".into()));
        assert_eq!(q.offset(), 40);
        assert!(q.matches(&["roles"]));
        assert!(q.matches(&["x", "Viewer role"]));
        assert!(!q.matches(&["users"]));
    }
}

//! Postgres-backed credential store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict { field }`, field derived from the constraint name |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / other | N/A | `Backend` |
//!
//! ## Atomicity
//!
//! - Bootstrap inserts a `system_markers('bootstrap')` row with `ON CONFLICT DO NOTHING`
//!   in the same transaction as the principal; zero affected rows means another
//!   caller won and the transaction is rolled back.
//! - Rotation is a single `UPDATE … WHERE revoked_at IS NULL AND expires_at > $now
//!   RETURNING …`, so row-level locking admits one winner per token.
//! - Principal updates lock the principal row `FOR UPDATE` and every newly written
//!   role `FOR SHARE`; `delete_role` locks its role `FOR UPDATE` before counting holders.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use keystone_auth::{
    AuditMeta, AuditRecord, DeviceInfo, HashedPassword, Permission, Principal, RefreshSession,
    RefreshTokenHash, Role,
};
use keystone_core::{AuditId, Email, PrincipalId, RoleId, SessionId};

use super::{
    AuditStore, Change, ListQuery, Page, PrincipalStore, PrincipalUpdate, RoleStore, SessionStore,
    StoreError, StoreResult,
};

const SCHEMA: &str = include_str!("../../migrations/0001_identity.sql");

const BOOTSTRAP_MARKER: &str = "bootstrap";

/// Postgres-backed credential store.
///
/// Uses an SQLx connection pool, which is `Send + Sync` and cheap to clone.
#[derive(Debug, Clone)]
pub struct PostgresCredentialStore {
    pool: Arc<PgPool>,
}

impl PostgresCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl RoleStore for PostgresCredentialStore {
    #[instrument(skip(self, role), err)]
    async fn upsert_system_role(&self, role: Role) -> StoreResult<Role> {
        let row = sqlx::query(
            r#"
            INSERT INTO roles (id, name, description, permission_keys, is_system, created_at, updated_at)
            VALUES ($1, $2, $3, $4, TRUE, $5, $5)
            ON CONFLICT (name)
            DO UPDATE SET
                permission_keys = EXCLUDED.permission_keys,
                is_system = TRUE,
                updated_at = EXCLUDED.updated_at
            RETURNING id, name, description, permission_keys, is_system, created_at, updated_at
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(&role.name)
        .bind(&role.description)
        .bind(permission_keys(&role))
        .bind(role.updated_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_system_role", e))?;

        decode::<RoleRow, _>(&row)
    }

    async fn system_role(&self) -> StoreResult<Option<Role>> {
        let row = sqlx::query(
            "SELECT id, name, description, permission_keys, is_system, created_at, updated_at FROM roles WHERE is_system",
        )
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("system_role", e))?;

        row.as_ref().map(decode::<RoleRow, _>).transpose()
    }

    #[instrument(skip(self, role), fields(role_id = %role.id), err)]
    async fn insert_role(&self, role: Role) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO roles (id, name, description, permission_keys, is_system, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(&role.name)
        .bind(&role.description)
        .bind(permission_keys(&role))
        .bind(role.is_system)
        .bind(role.created_at)
        .bind(role.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;
        Ok(())
    }

    async fn get_role(&self, id: RoleId) -> StoreResult<Option<Role>> {
        let row = sqlx::query(
            "SELECT id, name, description, permission_keys, is_system, created_at, updated_at FROM roles WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_role", e))?;

        row.as_ref().map(decode::<RoleRow, _>).transpose()
    }

    async fn get_roles(&self, ids: &[RoleId]) -> StoreResult<Vec<Role>> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.name, r.description, r.permission_keys, r.is_system, r.created_at, r.updated_at
            FROM UNNEST($1::uuid[]) WITH ORDINALITY AS wanted(id, ord)
            JOIN roles r ON r.id = wanted.id
            ORDER BY wanted.ord
            "#,
        )
        .bind(&uuids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_roles", e))?;

        rows.iter().map(decode::<RoleRow, _>).collect()
    }

    #[instrument(skip(self, role), fields(role_id = %role.id), err)]
    async fn update_role(&self, role: &Role) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE roles
            SET name = $2, description = $3, permission_keys = $4, updated_at = $5
            WHERE id = $1 AND NOT is_system
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(&role.name)
        .bind(&role.description)
        .bind(permission_keys(role))
        .bind(role.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_role", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn delete_role(&self, id: RoleId) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Waits on, and then blocks, the FOR SHARE that update_principal takes on
        // each role it writes, so the holder count below sees every committed assignment.
        let exists = sqlx::query("SELECT 1 FROM roles WHERE id = $1 AND NOT is_system FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }

        let holders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM principals WHERE $1 = ANY(role_ids)")
            .bind(id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        if holders > 0 {
            return Err(StoreError::conflict("roleIds"));
        }

        sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(())
    }

    async fn list_roles(&self, query: &ListQuery) -> StoreResult<Page<Role>> {
        let pattern = like_pattern(query);
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, permission_keys, is_system, created_at, updated_at
            FROM roles
            WHERE ($1::text IS NULL OR name ILIKE $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(&pattern)
        .bind(i64::from(query.limit))
        .bind(query.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_roles", e))?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles WHERE ($1::text IS NULL OR name ILIKE $1)")
            .bind(&pattern)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_roles", e))?;

        let items = rows.iter().map(decode::<RoleRow, _>).collect::<StoreResult<Vec<_>>>()?;
        Ok(Page::new(items, query, total as u64))
    }
}

#[async_trait]
impl PrincipalStore for PostgresCredentialStore {
    #[instrument(skip(self, principal), fields(principal_id = %principal.id), err)]
    async fn insert_principal(&self, principal: Principal) -> StoreResult<()> {
        insert_principal_row(&*self.pool, &principal).await
    }

    #[instrument(skip(self, principal), fields(principal_id = %principal.id), err)]
    async fn insert_bootstrap_principal(&self, principal: Principal, system_role: RoleId) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let claimed = sqlx::query("INSERT INTO system_markers (name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(BOOTSTRAP_MARKER)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_bootstrap_principal", e))?;

        if claimed.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::BootstrapClosed);
        }

        if !principal.holds(system_role) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Backend(
                "bootstrap principal must hold the system role".to_string(),
            ));
        }

        insert_principal_row(&mut *tx, &principal).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(())
    }

    async fn get_principal(&self, id: PrincipalId) -> StoreResult<Option<Principal>> {
        let row = sqlx::query(&format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_principal", e))?;

        row.as_ref().map(decode::<PrincipalRow, _>).transpose()
    }

    async fn find_principal_by_email(&self, email: &Email) -> StoreResult<Option<Principal>> {
        let row = sqlx::query(&format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE email = $1"))
            .bind(email.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_principal_by_email", e))?;

        row.as_ref().map(decode::<PrincipalRow, _>).transpose()
    }

    #[instrument(skip(self, update), fields(principal_id = %id), err)]
    async fn update_principal(&self, id: PrincipalId, update: &PrincipalUpdate, now: DateTime<Utc>) -> StoreResult<Change<Principal>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(&format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE id = $1 FOR UPDATE"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_principal", e))?;
        let before: Principal = match row.as_ref().map(decode::<PrincipalRow, _>).transpose()? {
            Some(principal) => principal,
            None => return Err(StoreError::NotFound),
        };

        let mut after = before.clone();
        update
            .apply(&mut after, now)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let role_ids: Vec<Uuid> = after.role_ids.iter().map(|r| *r.as_uuid()).collect();

        if update.role_ids.is_some() {
            // Shared locks conflict with the FOR UPDATE taken by delete_role.
            let present = sqlx::query("SELECT id FROM roles WHERE id = ANY($1) FOR SHARE")
                .bind(&role_ids)
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("update_principal", e))?;
            if present.len() != role_ids.len() {
                return Err(StoreError::UnknownRole);
            }
        }

        sqlx::query(
            r#"
            UPDATE principals
            SET name = $2, phone = $3, is_active = $4, role_ids = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(&after.name)
        .bind(&after.phone)
        .bind(after.is_active)
        .bind(&role_ids)
        .bind(after.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_principal", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(Change { before, after })
    }

    async fn count_principals_with_role(&self, role: RoleId) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM principals WHERE $1 = ANY(role_ids)")
            .bind(role.as_uuid())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_principals_with_role", e))?;
        Ok(count as u64)
    }

    async fn list_principals(&self, query: &ListQuery) -> StoreResult<Page<Principal>> {
        let pattern = like_pattern(query);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PRINCIPAL_COLUMNS}
            FROM principals
            WHERE ($1::text IS NULL OR name ILIKE $1 OR email ILIKE $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(&pattern)
        .bind(i64::from(query.limit))
        .bind(query.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_principals", e))?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM principals WHERE ($1::text IS NULL OR name ILIKE $1 OR email ILIKE $1)",
        )
        .bind(&pattern)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_principals", e))?;

        let items = rows
            .iter()
            .map(decode::<PrincipalRow, _>)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Page::new(items, query, total as u64))
    }
}

#[async_trait]
impl SessionStore for PostgresCredentialStore {
    #[instrument(skip(self, session), fields(principal_id = %session.principal_id), err)]
    async fn insert_session(&self, session: RefreshSession) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_sessions (id, principal_id, token_hash, ip, user_agent, expires_at, revoked_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(session.principal_id.as_uuid())
        .bind(session.token_hash.as_str())
        .bind(&session.device.ip)
        .bind(&session.device.user_agent)
        .bind(session.expires_at)
        .bind(session.revoked_at)
        .bind(session.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_session", e))?;
        Ok(())
    }

    #[instrument(skip(self, hash), err)]
    async fn revoke_session_if_active(&self, hash: &RefreshTokenHash, now: DateTime<Utc>) -> StoreResult<Option<RefreshSession>> {
        let row = sqlx::query(
            r#"
            UPDATE refresh_sessions
            SET revoked_at = $2
            WHERE token_hash = $1 AND revoked_at IS NULL AND expires_at > $2
            RETURNING id, principal_id, token_hash, ip, user_agent, expires_at, revoked_at, created_at
            "#,
        )
        .bind(hash.as_str())
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("revoke_session_if_active", e))?;

        row.as_ref().map(decode::<SessionRow, _>).transpose()
    }

    #[instrument(skip(self), fields(principal_id = %principal), err)]
    async fn revoke_all_sessions(&self, principal: PrincipalId, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_sessions SET revoked_at = $2 WHERE principal_id = $1 AND revoked_at IS NULL",
        )
        .bind(principal.as_uuid())
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("revoke_all_sessions", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_expired_sessions", e))?;
        Ok(result.rows_affected())
    }

    async fn list_sessions(&self, principal: PrincipalId) -> StoreResult<Vec<RefreshSession>> {
        let rows = sqlx::query(
            r#"
            SELECT id, principal_id, token_hash, ip, user_agent, expires_at, revoked_at, created_at
            FROM refresh_sessions
            WHERE principal_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(principal.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_sessions", e))?;

        rows.iter().map(decode::<SessionRow, _>).collect()
    }
}

#[async_trait]
impl AuditStore for PostgresCredentialStore {
    async fn append_audit(&self, record: AuditRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_records (
                id, actor_id, module, action, entity_id, before, after,
                ip, user_agent, route, method, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.actor.map(Uuid::from))
        .bind(&record.module)
        .bind(&record.action)
        .bind(&record.entity_id)
        .bind(&record.before)
        .bind(&record.after)
        .bind(&record.meta.ip)
        .bind(&record.meta.user_agent)
        .bind(&record.meta.route)
        .bind(&record.meta.method)
        .bind(record.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_audit", e))?;
        Ok(())
    }

    async fn list_audit(&self, query: &ListQuery) -> StoreResult<Page<AuditRecord>> {
        let pattern = like_pattern(query);
        let rows = sqlx::query(
            r#"
            SELECT id, actor_id, module, action, entity_id, before, after,
                   ip, user_agent, route, method, created_at
            FROM audit_records
            WHERE ($1::text IS NULL OR module ILIKE $1 OR action ILIKE $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(&pattern)
        .bind(i64::from(query.limit))
        .bind(query.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_audit", e))?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM audit_records WHERE ($1::text IS NULL OR module ILIKE $1 OR action ILIKE $1)",
        )
        .bind(&pattern)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_audit", e))?;

        let items = rows.iter().map(decode::<AuditRow, _>).collect::<StoreResult<Vec<_>>>()?;
        Ok(Page::new(items, query, total as u64))
    }
}

const PRINCIPAL_COLUMNS: &str =
    "id, name, email, phone, password_hash, is_active, role_ids, created_by, created_at, updated_at";

async fn insert_principal_row<'e, E>(executor: E, principal: &Principal) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let role_ids: Vec<Uuid> = principal.role_ids.iter().map(|r| *r.as_uuid()).collect();
    sqlx::query(
        r#"
        INSERT INTO principals (
            id, name, email, phone, password_hash, is_active, role_ids, created_by, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(principal.id.as_uuid())
    .bind(&principal.name)
    .bind(principal.email.as_str())
    .bind(&principal.phone)
    .bind(principal.password_hash.as_str())
    .bind(principal.is_active)
    .bind(&role_ids)
    .bind(principal.created_by.map(Uuid::from))
    .bind(principal.created_at)
    .bind(principal.updated_at)
    .execute(executor)
    .await
    .map_err(|e| map_sqlx_error("insert_principal", e))?;
    Ok(())
}

fn permission_keys(role: &Role) -> Vec<String> {
    role.permissions.iter().map(|p| p.as_str().to_string()).collect()
}

/// `%term%` with LIKE metacharacters escaped, or `None` when there is no search.
fn like_pattern(query: &ListQuery) -> Option<String> {
    query.search.as_ref().map(|s| {
        let escaped = s
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        format!("%{escaped}%")
    })
}

fn decode<'r, R, T>(row: &'r PgRow) -> StoreResult<T>
where
    R: FromRow<'r, PgRow> + TryInto<T, Error = StoreError>,
{
    R::from_row(row)
        .map_err(|e| StoreError::Backend(format!("failed to decode row: {e}")))?
        .try_into()
}

struct RoleRow {
    id: Uuid,
    name: String,
    description: String,
    permission_keys: Vec<String>,
    is_system: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for RoleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RoleRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            permission_keys: row.try_get("permission_keys")?,
            is_system: row.try_get("is_system")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<RoleRow> for Role {
    type Error = StoreError;

    fn try_from(row: RoleRow) -> Result<Self, Self::Error> {
        Ok(Role {
            id: RoleId::from_uuid(row.id),
            name: row.name,
            description: row.description,
            permissions: row.permission_keys.into_iter().map(Permission::new).collect(),
            is_system: row.is_system,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

struct PrincipalRow {
    id: Uuid,
    name: String,
    email: String,
    phone: Option<String>,
    password_hash: String,
    is_active: bool,
    role_ids: Vec<Uuid>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for PrincipalRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PrincipalRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            phone: row.try_get("phone")?,
            password_hash: row.try_get("password_hash")?,
            is_active: row.try_get("is_active")?,
            role_ids: row.try_get("role_ids")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<PrincipalRow> for Principal {
    type Error = StoreError;

    fn try_from(row: PrincipalRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email)
            .map_err(|e| StoreError::Backend(format!("stored email is invalid: {e}")))?;
        Ok(Principal {
            id: PrincipalId::from_uuid(row.id),
            name: row.name,
            email,
            phone: row.phone,
            password_hash: HashedPassword::from_phc(row.password_hash),
            is_active: row.is_active,
            role_ids: row.role_ids.into_iter().map(RoleId::from_uuid).collect(),
            created_by: row.created_by.map(PrincipalId::from_uuid),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

struct SessionRow {
    id: Uuid,
    principal_id: Uuid,
    token_hash: String,
    ip: Option<String>,
    user_agent: Option<String>,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for SessionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(SessionRow {
            id: row.try_get("id")?,
            principal_id: row.try_get("principal_id")?,
            token_hash: row.try_get("token_hash")?,
            ip: row.try_get("ip")?,
            user_agent: row.try_get("user_agent")?,
            expires_at: row.try_get("expires_at")?,
            revoked_at: row.try_get("revoked_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<SessionRow> for RefreshSession {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(RefreshSession {
            id: SessionId::from_uuid(row.id),
            principal_id: PrincipalId::from_uuid(row.principal_id),
            token_hash: RefreshTokenHash::from_hex(row.token_hash),
            device: DeviceInfo {
                ip: row.ip,
                user_agent: row.user_agent,
            },
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            created_at: row.created_at,
        })
    }
}

struct AuditRow {
    id: Uuid,
    actor_id: Option<Uuid>,
    module: String,
    action: String,
    entity_id: Option<String>,
    before: Option<serde_json::Value>,
    after: Option<serde_json::Value>,
    ip: Option<String>,
    user_agent: Option<String>,
    route: Option<String>,
    method: Option<String>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for AuditRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AuditRow {
            id: row.try_get("id")?,
            actor_id: row.try_get("actor_id")?,
            module: row.try_get("module")?,
            action: row.try_get("action")?,
            entity_id: row.try_get("entity_id")?,
            before: row.try_get("before")?,
            after: row.try_get("after")?,
            ip: row.try_get("ip")?,
            user_agent: row.try_get("user_agent")?,
            route: row.try_get("route")?,
            method: row.try_get("method")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<AuditRow> for AuditRecord {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditRecord {
            id: AuditId::from_uuid(row.id),
            actor: row.actor_id.map(PrincipalId::from_uuid),
            module: row.module,
            action: row.action,
            entity_id: row.entity_id,
            before: row.before,
            after: row.after,
            meta: AuditMeta {
                ip: row.ip,
                user_agent: row.user_agent,
                route: row.route,
                method: row.method,
            },
            created_at: row.created_at,
        })
    }
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505") {
                return StoreError::conflict(conflict_field(db_err.constraint()));
            }
            StoreError::Backend(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Wire field name for a unique constraint (`principals_email_key` → `email`).
fn conflict_field(constraint: Option<&str>) -> String {
    match constraint {
        Some("principals_email_key") => "email".to_string(),
        Some("roles_name_key") => "name".to_string(),
        Some("refresh_sessions_token_hash_key") => "tokenHash".to_string(),
        Some("roles_single_system") => "isSystem".to_string(),
        _ => "record".to_string(),
    }
}

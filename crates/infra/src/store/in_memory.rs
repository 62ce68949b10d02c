use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use keystone_auth::{AuditRecord, Principal, RefreshSession, RefreshTokenHash, Role, SUPER_ADMIN};
use keystone_core::{Email, PrincipalId, RoleId, SessionId};

use super::{
    AuditStore, Change, ListQuery, Page, PrincipalStore, PrincipalUpdate, RoleStore, SessionStore,
    StoreError, StoreResult,
};

#[derive(Debug, Default)]
struct State {
    roles: HashMap<RoleId, Role>,
    principals: HashMap<PrincipalId, Principal>,
    sessions: HashMap<SessionId, RefreshSession>,
    audit: Vec<AuditRecord>,
}

impl State {
    fn role_name_taken(&self, name: &str, except: Option<RoleId>) -> bool {
        self.roles
            .values()
            .any(|r| r.name == name && Some(r.id) != except)
    }

    fn email_taken(&self, email: &Email) -> bool {
        self.principals.values().any(|p| &p.email == email)
    }
}

/// In-memory credential store.
///
/// Intended for tests/dev. Every operation runs inside one lock acquisition, which
/// makes the conditional writes (bootstrap, rotation) trivially atomic.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    state: RwLock<State>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

/// Newest first, then slice out the requested page.
fn paginate<T: Clone>(mut items: Vec<T>, created_at: impl Fn(&T) -> DateTime<Utc>, query: &ListQuery) -> Page<T> {
    items.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
    let total = items.len() as u64;
    let page = items
        .into_iter()
        .skip(query.offset() as usize)
        .take(query.limit as usize)
        .collect();
    Page::new(page, query, total)
}

#[async_trait]
impl RoleStore for InMemoryCredentialStore {
    async fn upsert_system_role(&self, role: Role) -> StoreResult<Role> {
        let mut state = self.write()?;

        let existing = state
            .roles
            .values_mut()
            .find(|r| r.name == SUPER_ADMIN);

        let stored = match existing {
            Some(current) => {
                current.permissions = role.permissions;
                current.is_system = true;
                current.updated_at = role.updated_at;
                current.clone()
            }
            None => {
                state.roles.insert(role.id, role.clone());
                role
            }
        };
        Ok(stored)
    }

    async fn system_role(&self) -> StoreResult<Option<Role>> {
        let state = self.read()?;
        Ok(state.roles.values().find(|r| r.is_system).cloned())
    }

    async fn insert_role(&self, role: Role) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.role_name_taken(&role.name, None) {
            return Err(StoreError::conflict("name"));
        }
        state.roles.insert(role.id, role);
        Ok(())
    }

    async fn get_role(&self, id: RoleId) -> StoreResult<Option<Role>> {
        Ok(self.read()?.roles.get(&id).cloned())
    }

    async fn get_roles(&self, ids: &[RoleId]) -> StoreResult<Vec<Role>> {
        let state = self.read()?;
        Ok(ids.iter().filter_map(|id| state.roles.get(id).cloned()).collect())
    }

    async fn update_role(&self, role: &Role) -> StoreResult<()> {
        let mut state = self.write()?;
        if !state.roles.contains_key(&role.id) {
            return Err(StoreError::NotFound);
        }
        if state.role_name_taken(&role.name, Some(role.id)) {
            return Err(StoreError::conflict("name"));
        }
        state.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn delete_role(&self, id: RoleId) -> StoreResult<()> {
        let mut state = self.write()?;
        if !state.roles.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        if state.principals.values().any(|p| p.holds(id)) {
            return Err(StoreError::conflict("roleIds"));
        }
        state.roles.remove(&id);
        Ok(())
    }

    async fn list_roles(&self, query: &ListQuery) -> StoreResult<Page<Role>> {
        let state = self.read()?;
        let items = state
            .roles
            .values()
            .filter(|r| query.matches(&[&r.name]))
            .cloned()
            .collect();
        Ok(paginate(items, |r: &Role| r.created_at, query))
    }
}

#[async_trait]
impl PrincipalStore for InMemoryCredentialStore {
    async fn insert_principal(&self, principal: Principal) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.email_taken(&principal.email) {
            return Err(StoreError::conflict("email"));
        }
        state.principals.insert(principal.id, principal);
        Ok(())
    }

    async fn insert_bootstrap_principal(&self, principal: Principal, system_role: RoleId) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.principals.values().any(|p| p.holds(system_role)) {
            return Err(StoreError::BootstrapClosed);
        }
        if state.email_taken(&principal.email) {
            return Err(StoreError::conflict("email"));
        }
        state.principals.insert(principal.id, principal);
        Ok(())
    }

    async fn get_principal(&self, id: PrincipalId) -> StoreResult<Option<Principal>> {
        Ok(self.read()?.principals.get(&id).cloned())
    }

    async fn find_principal_by_email(&self, email: &Email) -> StoreResult<Option<Principal>> {
        let state = self.read()?;
        Ok(state.principals.values().find(|p| &p.email == email).cloned())
    }

    async fn update_principal(&self, id: PrincipalId, update: &PrincipalUpdate, now: DateTime<Utc>) -> StoreResult<Change<Principal>> {
        let mut state = self.write()?;
        let before = state.principals.get(&id).cloned().ok_or(StoreError::NotFound)?;

        let mut after = before.clone();
        update
            .apply(&mut after, now)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if update.role_ids.is_some() && !after.role_ids.iter().all(|r| state.roles.contains_key(r)) {
            return Err(StoreError::UnknownRole);
        }

        state.principals.insert(id, after.clone());
        Ok(Change { before, after })
    }

    async fn count_principals_with_role(&self, role: RoleId) -> StoreResult<u64> {
        let state = self.read()?;
        Ok(state.principals.values().filter(|p| p.holds(role)).count() as u64)
    }

    async fn list_principals(&self, query: &ListQuery) -> StoreResult<Page<Principal>> {
        let state = self.read()?;
        let items = state
            .principals
            .values()
            .filter(|p| query.matches(&[&p.name, p.email.as_str()]))
            .cloned()
            .collect();
        Ok(paginate(items, |p: &Principal| p.created_at, query))
    }
}

#[async_trait]
impl SessionStore for InMemoryCredentialStore {
    async fn insert_session(&self, session: RefreshSession) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.sessions.values().any(|s| s.token_hash == session.token_hash) {
            return Err(StoreError::conflict("tokenHash"));
        }
        state.sessions.insert(session.id, session);
        Ok(())
    }

    async fn revoke_session_if_active(&self, hash: &RefreshTokenHash, now: DateTime<Utc>) -> StoreResult<Option<RefreshSession>> {
        let mut state = self.write()?;
        let session = state
            .sessions
            .values_mut()
            .find(|s| &s.token_hash == hash && s.is_active(now));

        Ok(session.map(|s| {
            s.revoked_at = Some(now);
            s.clone()
        }))
    }

    async fn revoke_all_sessions(&self, principal: PrincipalId, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.write()?;
        let mut revoked = 0;
        for s in state
            .sessions
            .values_mut()
            .filter(|s| s.principal_id == principal && s.revoked_at.is_none())
        {
            s.revoked_at = Some(now);
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.write()?;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.expires_at > now);
        Ok((before - state.sessions.len()) as u64)
    }

    async fn list_sessions(&self, principal: PrincipalId) -> StoreResult<Vec<RefreshSession>> {
        let state = self.read()?;
        let mut sessions: Vec<_> = state
            .sessions
            .values()
            .filter(|s| s.principal_id == principal)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }
}

#[async_trait]
impl AuditStore for InMemoryCredentialStore {
    async fn append_audit(&self, record: AuditRecord) -> StoreResult<()> {
        self.write()?.audit.push(record);
        Ok(())
    }

    async fn list_audit(&self, query: &ListQuery) -> StoreResult<Page<AuditRecord>> {
        let state = self.read()?;
        let items = state
            .audit
            .iter()
            .filter(|a| query.matches(&[&a.module, &a.action]))
            .cloned()
            .collect();
        Ok(paginate(items, |a: &AuditRecord| a.created_at, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration;
    use keystone_auth::{AuditEntry, AuditMeta, DeviceInfo, HashedPassword, Profile, RoleDraft};

    fn principal(email: &str, roles: Vec<RoleId>) -> Principal {
        let profile = Profile::parse("Test User", email, None, false).unwrap();
        Principal::new(profile, HashedPassword::from_phc("x"), roles, None, Utc::now()).unwrap()
    }

    fn role(name: &str) -> Role {
        Role::new(
            RoleDraft {
                name: name.to_string(),
                description: String::new(),
                permissions: vec!["users:view".to_string()],
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn session(principal: PrincipalId, hash: &str, ttl: Duration) -> RefreshSession {
        RefreshSession::new(principal, RefreshTokenHash::from_hex(hash), DeviceInfo::default(), ttl, Utc::now())
    }

    #[tokio::test]
    async fn system_role_upsert_is_idempotent() {
        let store = InMemoryCredentialStore::new();
        let first = store.upsert_system_role(Role::system(Utc::now())).await.unwrap();
        let second = store.upsert_system_role(Role::system(Utc::now())).await.unwrap();

        assert_eq!(first.id, second.id);
        let all = store.list_roles(&ListQuery::default()).await.unwrap();
        assert_eq!(all.pagination.total, 1);
        assert_eq!(store.system_role().await.unwrap().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn unique_fields_conflict_with_field_name() {
        let store = InMemoryCredentialStore::new();
        store.insert_role(role("Viewer")).await.unwrap();
        assert_eq!(store.insert_role(role("Viewer")).await, Err(StoreError::conflict("name")));

        let r = RoleId::new();
        store.insert_principal(principal("a@b.co", vec![r])).await.unwrap();
        assert_eq!(
            store.insert_principal(principal("a@b.co", vec![r])).await,
            Err(StoreError::conflict("email"))
        );
    }

    #[tokio::test]
    async fn bootstrap_insert_admits_exactly_one_concurrent_caller() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let system = store.upsert_system_role(Role::system(Utc::now())).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert_bootstrap_principal(principal(&format!("admin{i}@x.io"), vec![system.id]), system.id)
                    .await
            }));
        }

        let mut ok = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(()) => ok += 1,
                Err(e) => assert_eq!(e, StoreError::BootstrapClosed),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(store.count_principals_with_role(system.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn revoke_if_active_succeeds_once() {
        let store = InMemoryCredentialStore::new();
        let owner = PrincipalId::new();
        store.insert_session(session(owner, "h1", Duration::days(7))).await.unwrap();

        let hash = RefreshTokenHash::from_hex("h1");
        let now = Utc::now();
        assert!(store.revoke_session_if_active(&hash, now).await.unwrap().is_some());
        assert!(store.revoke_session_if_active(&hash, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_sessions_are_invisible_and_purged() {
        let store = InMemoryCredentialStore::new();
        let owner = PrincipalId::new();
        store.insert_session(session(owner, "old", Duration::seconds(-1))).await.unwrap();
        store.insert_session(session(owner, "new", Duration::days(1))).await.unwrap();

        let now = Utc::now();
        assert!(store
            .revoke_session_if_active(&RefreshTokenHash::from_hex("old"), now)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.purge_expired_sessions(now).await.unwrap(), 1);
        assert_eq!(store.list_sessions(owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn revoke_all_only_touches_owner() {
        let store = InMemoryCredentialStore::new();
        let a = PrincipalId::new();
        let b = PrincipalId::new();
        store.insert_session(session(a, "a1", Duration::days(1))).await.unwrap();
        store.insert_session(session(a, "a2", Duration::days(1))).await.unwrap();
        store.insert_session(session(b, "b1", Duration::days(1))).await.unwrap();

        assert_eq!(store.revoke_all_sessions(a, Utc::now()).await.unwrap(), 2);
        assert_eq!(store.revoke_all_sessions(a, Utc::now()).await.unwrap(), 0);
        assert!(store.list_sessions(b).await.unwrap()[0].revoked_at.is_none());
    }

    #[tokio::test]
    async fn role_in_use_cannot_be_deleted() {
        let store = InMemoryCredentialStore::new();
        let r = role("Viewer");
        let id = r.id;
        store.insert_role(r).await.unwrap();
        store.insert_principal(principal("a@b.co", vec![id])).await.unwrap();

        assert_eq!(store.delete_role(id).await, Err(StoreError::conflict("roleIds")));
        assert_eq!(store.delete_role(RoleId::new()).await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn profile_update_keeps_a_role_change_made_after_it_was_loaded() {
        let store = InMemoryCredentialStore::new();
        let viewer = role("Viewer");
        let editor = role("Editor");
        let (viewer_id, editor_id) = (viewer.id, editor.id);
        store.insert_role(viewer).await.unwrap();
        store.insert_role(editor).await.unwrap();
        let p = principal("a@b.co", vec![viewer_id]);
        let id = p.id;
        store.insert_principal(p).await.unwrap();

        let loaded = store.get_principal(id).await.unwrap().unwrap();
        store
            .update_principal(id, &PrincipalUpdate::roles(vec![editor_id]), Utc::now())
            .await
            .unwrap();

        let rename = PrincipalUpdate {
            name: Some("Renamed".into()),
            ..Default::default()
        };
        let change = store.update_principal(loaded.id, &rename, Utc::now()).await.unwrap();
        assert_eq!(change.before.role_ids, vec![editor_id]);
        assert_eq!(change.after.role_ids, vec![editor_id]);
        assert_eq!(change.after.name, "Renamed");
    }

    #[tokio::test]
    async fn role_change_does_not_reactivate_a_deactivated_principal() {
        let store = InMemoryCredentialStore::new();
        let viewer = role("Viewer");
        let editor = role("Editor");
        let (viewer_id, editor_id) = (viewer.id, editor.id);
        store.insert_role(viewer).await.unwrap();
        store.insert_role(editor).await.unwrap();
        let p = principal("a@b.co", vec![viewer_id]);
        let id = p.id;
        store.insert_principal(p).await.unwrap();

        let loaded = store.get_principal(id).await.unwrap().unwrap();
        assert!(loaded.is_active);
        store.update_principal(id, &PrincipalUpdate::active(false), Utc::now()).await.unwrap();

        let change = store
            .update_principal(loaded.id, &PrincipalUpdate::roles(vec![editor_id]), Utc::now())
            .await
            .unwrap();
        assert!(!change.after.is_active);
        assert_eq!(change.after.role_ids, vec![editor_id]);
    }

    #[tokio::test]
    async fn deleted_role_cannot_be_written_onto_a_principal() {
        let store = InMemoryCredentialStore::new();
        let viewer = role("Viewer");
        let temp = role("Temp");
        let (viewer_id, temp_id) = (viewer.id, temp.id);
        store.insert_role(viewer).await.unwrap();
        store.insert_role(temp).await.unwrap();
        let p = principal("a@b.co", vec![viewer_id]);
        let id = p.id;
        store.insert_principal(p).await.unwrap();

        // Validated while it existed, deleted before the write lands.
        assert!(store.get_role(temp_id).await.unwrap().is_some());
        store.delete_role(temp_id).await.unwrap();

        assert_eq!(
            store
                .update_principal(id, &PrincipalUpdate::roles(vec![temp_id]), Utc::now())
                .await,
            Err(StoreError::UnknownRole)
        );
        let stored = store.get_principal(id).await.unwrap().unwrap();
        assert_eq!(stored.role_ids, vec![viewer_id]);
        assert_eq!(store.get_roles(&stored.role_ids).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_of_unknown_principal_is_not_found() {
        let store = InMemoryCredentialStore::new();
        assert_eq!(
            store
                .update_principal(PrincipalId::new(), &PrincipalUpdate::active(false), Utc::now())
                .await,
            Err(StoreError::NotFound)
        );
    }

    #[tokio::test]
    async fn audit_lists_newest_first_with_search() {
        let store = InMemoryCredentialStore::new();
        let t0 = Utc::now();
        for (i, (module, action)) in [("auth", "login"), ("roles", "create"), ("auth", "logout")].into_iter().enumerate() {
            let record = AuditEntry::new(module, action, AuditMeta::default())
                .into_record(t0 + Duration::seconds(i as i64));
            store.append_audit(record).await.unwrap();
        }

        let page = store.list_audit(&ListQuery::default()).await.unwrap();
        assert_eq!(page.items[0].action, "logout");
        assert_eq!(page.pagination.total, 3);

        let page = store
            .list_audit(&ListQuery::new(None, None, Some("AUTH".into())))
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 2);
    }

    #[tokio::test]
    async fn pagination_slices_after_sort() {
        let store = InMemoryCredentialStore::new();
        for i in 0..5 {
            let mut r = role(&format!("Role {i}"));
            r.created_at = Utc::now() + Duration::seconds(i);
            store.insert_role(r).await.unwrap();
        }
        let page = store.list_roles(&ListQuery::new(Some(2), Some(2), None)).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].name, "Role 2");
        assert_eq!(page.pagination.total, 5);
    }
}

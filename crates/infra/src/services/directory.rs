//! Role and principal management: the privileged state changes the guard
//! protects and the audit trail records.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, instrument};

use keystone_auth::principal::{validate_name, validate_password, validate_phone};
use keystone_auth::{
    AuditEntry, AuditMeta, AuditRecord, PasswordHasherService, Principal, Profile, ResolvedIdentity,
    Role, RoleDraft, RolePatch,
};
use keystone_core::{PrincipalId, RoleId};

use crate::store::{Change, CredentialStore, ListQuery, Page, PrincipalUpdate, StoreError};

use super::{AuditRecorder, ServiceError, SessionService, hash_password};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPrincipal {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub password: String,
    pub role_ids: Vec<String>,
}

/// Partial principal update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalPatch {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Clone)]
pub struct DirectoryService {
    store: Arc<dyn CredentialStore>,
    passwords: PasswordHasherService,
    sessions: SessionService,
    audit: AuditRecorder,
}

impl DirectoryService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        passwords: PasswordHasherService,
        sessions: SessionService,
        audit: AuditRecorder,
    ) -> Self {
        Self {
            store,
            passwords,
            sessions,
            audit,
        }
    }

    // ── Roles ───────────────────────────────────────────────────────────────

    #[instrument(skip(self, actor, draft, meta), fields(actor_id = %actor.principal.id), err)]
    pub async fn create_role(&self, actor: &ResolvedIdentity, draft: RoleDraft, meta: AuditMeta) -> Result<Role, ServiceError> {
        let role = Role::new(draft, Utc::now())?;
        self.store.insert_role(role.clone()).await?;

        self.audit
            .record(
                AuditEntry::new("roles", "create", meta)
                    .actor(actor.principal.id)
                    .entity(role.id)
                    .after(snapshot(&role)),
            )
            .await;
        Ok(role)
    }

    #[instrument(skip(self, actor, patch, meta), fields(actor_id = %actor.principal.id), err)]
    pub async fn update_role(&self, actor: &ResolvedIdentity, id: RoleId, patch: RolePatch, meta: AuditMeta) -> Result<Role, ServiceError> {
        let before = self.load_role(id).await?;
        before.ensure_mutable()?;

        let mut role = before.clone();
        role.apply(patch, Utc::now())?;
        self.store.update_role(&role).await.map_err(role_not_found)?;

        self.audit
            .record(
                AuditEntry::new("roles", "update", meta)
                    .actor(actor.principal.id)
                    .entity(role.id)
                    .before(snapshot(&before))
                    .after(snapshot(&role)),
            )
            .await;
        Ok(role)
    }

    #[instrument(skip(self, actor, meta), fields(actor_id = %actor.principal.id), err)]
    pub async fn delete_role(&self, actor: &ResolvedIdentity, id: RoleId, meta: AuditMeta) -> Result<(), ServiceError> {
        let role = self.load_role(id).await?;
        role.ensure_mutable()?;

        self.store.delete_role(id).await.map_err(role_not_found)?;

        self.audit
            .record(
                AuditEntry::new("roles", "delete", meta)
                    .actor(actor.principal.id)
                    .entity(id)
                    .before(snapshot(&role)),
            )
            .await;
        Ok(())
    }

    pub async fn list_roles(&self, query: &ListQuery) -> Result<Page<Role>, ServiceError> {
        Ok(self.store.list_roles(query).await?)
    }

    /// Replace a principal's role set with exactly one non-system role, then
    /// revoke all of its sessions.
    ///
    /// Cardinality is checked before the target is loaded.
    #[instrument(skip(self, actor, role_ids, meta), fields(actor_id = %actor.principal.id), err)]
    pub async fn assign_role(
        &self,
        actor: &ResolvedIdentity,
        target: PrincipalId,
        role_ids: Vec<String>,
        meta: AuditMeta,
    ) -> Result<Principal, ServiceError> {
        let [role_id] = role_ids.as_slice() else {
            return Err(ServiceError::RoleAssignmentInvalid(
                "Exactly one role is required".to_string(),
            ));
        };
        let role_id = RoleId::from_str(role_id)?;

        let before = self.load_principal(target).await?;
        let held = self.store.get_roles(&before.role_ids).await?;
        if held.iter().any(Role::is_protected) {
            return Err(ServiceError::RoleProtected(
                "SuperAdmin user role cannot be changed".to_string(),
            ));
        }

        let role = self.load_role(role_id).await?;
        if role.is_protected() {
            return Err(ServiceError::RoleProtected(
                "SuperAdmin role can only be held via bootstrap".to_string(),
            ));
        }

        let change = self
            .store
            .update_principal(target, &PrincipalUpdate::roles(vec![role.id]), Utc::now())
            .await
            .map_err(principal_not_found)?;

        self.sessions.revoke_all(target).await?;
        info!(principal_id = %target, role_id = %role.id, "role reassigned");

        self.audit
            .record(
                AuditEntry::new("roles", "assign", meta)
                    .actor(actor.principal.id)
                    .entity(target)
                    .before(change.before.snapshot())
                    .after(change.after.snapshot()),
            )
            .await;
        Ok(change.after)
    }

    // ── Principals ──────────────────────────────────────────────────────────

    #[instrument(skip(self, actor, input, meta), fields(actor_id = %actor.principal.id), err)]
    pub async fn create_principal(&self, actor: &ResolvedIdentity, input: NewPrincipal, meta: AuditMeta) -> Result<Principal, ServiceError> {
        let profile = Profile::parse(&input.name, &input.email, input.phone.as_deref(), false)?;
        validate_password(&input.password)?;

        if input.role_ids.is_empty() {
            return Err(ServiceError::Validation("at least one role is required".to_string()));
        }
        let role_ids = input
            .role_ids
            .iter()
            .map(|raw| RoleId::from_str(raw))
            .collect::<Result<Vec<_>, _>>()?;

        let roles = self.store.get_roles(&role_ids).await?;
        for id in &role_ids {
            if !roles.iter().any(|r| r.id == *id) {
                return Err(ServiceError::NotFound("Role"));
            }
        }
        if roles.iter().any(Role::is_protected) {
            return Err(ServiceError::RoleProtected(
                "SuperAdmin role can only be held via bootstrap".to_string(),
            ));
        }

        let hash = hash_password(&self.passwords, input.password).await?;
        let principal = Principal::new(profile, hash, role_ids, Some(actor.principal.id), Utc::now())?;
        self.store.insert_principal(principal.clone()).await?;

        self.audit
            .record(
                AuditEntry::new("users", "create", meta)
                    .actor(actor.principal.id)
                    .entity(principal.id)
                    .after(principal.snapshot()),
            )
            .await;
        Ok(principal)
    }

    /// Deactivation also revokes every refresh session of the target.
    #[instrument(skip(self, actor, patch, meta), fields(actor_id = %actor.principal.id), err)]
    pub async fn update_principal(
        &self,
        actor: &ResolvedIdentity,
        id: PrincipalId,
        patch: PrincipalPatch,
        meta: AuditMeta,
    ) -> Result<Principal, ServiceError> {
        if patch.is_active == Some(false) && actor.principal.id == id {
            return Err(ServiceError::Validation(
                "you cannot deactivate your own account".to_string(),
            ));
        }

        let update = PrincipalUpdate {
            name: patch.name.as_deref().map(validate_name).transpose()?,
            phone: match patch.phone.as_deref().map(str::trim) {
                None => None,
                Some("") => Some(None),
                Some(p) => Some(Some(validate_phone(p)?)),
            },
            is_active: patch.is_active,
            role_ids: None,
        };

        let Change { before, after } = self
            .store
            .update_principal(id, &update, Utc::now())
            .await
            .map_err(principal_not_found)?;

        if before.is_active && !after.is_active {
            self.sessions.revoke_all(id).await?;
        }

        self.audit
            .record(
                AuditEntry::new("users", "update", meta)
                    .actor(actor.principal.id)
                    .entity(id)
                    .before(before.snapshot())
                    .after(after.snapshot()),
            )
            .await;
        Ok(after)
    }

    pub async fn list_principals(&self, query: &ListQuery) -> Result<Page<Principal>, ServiceError> {
        Ok(self.store.list_principals(query).await?)
    }

    pub async fn list_audit(&self, query: &ListQuery) -> Result<Page<AuditRecord>, ServiceError> {
        Ok(self.store.list_audit(query).await?)
    }

    async fn load_role(&self, id: RoleId) -> Result<Role, ServiceError> {
        self.store
            .get_role(id)
            .await?
            .ok_or(ServiceError::NotFound("Role"))
    }

    async fn load_principal(&self, id: PrincipalId) -> Result<Principal, ServiceError> {
        self.store
            .get_principal(id)
            .await?
            .ok_or(ServiceError::NotFound("User"))
    }
}

fn snapshot(role: &Role) -> serde_json::Value {
    serde_json::to_value(role).unwrap_or(serde_json::Value::Null)
}

fn role_not_found(err: StoreError) -> ServiceError {
    match err {
        StoreError::NotFound => ServiceError::NotFound("Role"),
        other => other.into(),
    }
}

fn principal_not_found(err: StoreError) -> ServiceError {
    match err {
        StoreError::NotFound => ServiceError::NotFound("User"),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use keystone_auth::{AccessTokenSigner, DeviceInfo, RefreshTokenHasher};

    use crate::services::{LoginInput, SessionSettings, SignupInput, seed_system_role};
    use crate::store::{InMemoryCredentialStore, PrincipalStore, SessionStore};

    struct Harness {
        store: Arc<InMemoryCredentialStore>,
        sessions: SessionService,
        directory: DirectoryService,
        admin: ResolvedIdentity,
    }

    async fn harness() -> Harness {
        let store = Arc::new(InMemoryCredentialStore::new());
        seed_system_role(store.as_ref()).await.unwrap();

        let passwords = PasswordHasherService::fast().unwrap();
        let audit = AuditRecorder::new(store.clone());
        let sessions = SessionService::new(
            store.clone(),
            passwords.clone(),
            AccessTokenSigner::new(b"secret", Duration::minutes(15)),
            RefreshTokenHasher::new("salt"),
            SessionSettings::default(),
            audit.clone(),
        );
        let directory = DirectoryService::new(store.clone(), passwords, sessions.clone(), audit);

        let admin = sessions
            .bootstrap_signup(
                SignupInput {
                    name: "Root".into(),
                    email: "root@example.com".into(),
                    phone: "5550100".into(),
                    password: "hunter22".into(),
                },
                DeviceInfo::default(),
                AuditMeta::default(),
            )
            .await
            .unwrap()
            .identity;

        Harness {
            store,
            sessions,
            directory,
            admin,
        }
    }

    fn draft(name: &str) -> RoleDraft {
        RoleDraft {
            name: name.into(),
            description: String::new(),
            permissions: vec!["users:view".into()],
        }
    }

    fn new_principal(email: &str, role: RoleId) -> NewPrincipal {
        NewPrincipal {
            name: "Staff".into(),
            email: email.into(),
            phone: None,
            password: "secret1".into(),
            role_ids: vec![role.to_string()],
        }
    }

    fn system_role_id(h: &Harness) -> RoleId {
        h.admin.roles[0].id
    }

    #[tokio::test]
    async fn system_role_is_immutable() {
        let h = harness().await;
        let sys = system_role_id(&h);

        let err = h
            .directory
            .update_role(&h.admin, sys, RolePatch { description: Some("x".into()), ..Default::default() }, AuditMeta::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ROLE_PROTECTED");

        let err = h.directory.delete_role(&h.admin, sys, AuditMeta::default()).await.unwrap_err();
        assert_eq!(err.code(), "ROLE_PROTECTED");
    }

    #[tokio::test]
    async fn duplicate_role_name_conflicts_on_name() {
        let h = harness().await;
        h.directory.create_role(&h.admin, draft("Viewer"), AuditMeta::default()).await.unwrap();
        let err = h
            .directory
            .create_role(&h.admin, draft("Viewer"), AuditMeta::default())
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Conflict { field: "name".into() });

        let err = h
            .directory
            .create_role(&h.admin, draft("SuperAdmin"), AuditMeta::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn role_assignment_rules() {
        let h = harness().await;
        let viewer = h.directory.create_role(&h.admin, draft("Viewer"), AuditMeta::default()).await.unwrap();
        let editor = h.directory.create_role(&h.admin, draft("Editor"), AuditMeta::default()).await.unwrap();

        // Cardinality before target lookup: an unknown target still gets 400.
        for ids in [vec![], vec![viewer.id.to_string(), editor.id.to_string()]] {
            let err = h
                .directory
                .assign_role(&h.admin, PrincipalId::new(), ids, AuditMeta::default())
                .await
                .unwrap_err();
            assert_eq!(err.code(), "ROLE_ASSIGNMENT_INVALID");
        }

        // System-role holder is protected regardless of the requested role.
        let err = h
            .directory
            .assign_role(&h.admin, h.admin.principal.id, vec![viewer.id.to_string()], AuditMeta::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ROLE_PROTECTED");

        let staff = h
            .directory
            .create_principal(&h.admin, new_principal("staff@example.com", viewer.id), AuditMeta::default())
            .await
            .unwrap();

        let err = h
            .directory
            .assign_role(&h.admin, staff.id, vec![system_role_id(&h).to_string()], AuditMeta::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ROLE_PROTECTED");

        let err = h
            .directory
            .assign_role(&h.admin, staff.id, vec![RoleId::new().to_string()], AuditMeta::default())
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::NotFound("Role"));
    }

    #[tokio::test]
    async fn successful_assignment_revokes_sessions() {
        let h = harness().await;
        let viewer = h.directory.create_role(&h.admin, draft("Viewer"), AuditMeta::default()).await.unwrap();
        let editor = h.directory.create_role(&h.admin, draft("Editor"), AuditMeta::default()).await.unwrap();
        let staff = h
            .directory
            .create_principal(&h.admin, new_principal("staff@example.com", viewer.id), AuditMeta::default())
            .await
            .unwrap();

        let login = h
            .sessions
            .login(
                LoginInput {
                    email: "staff@example.com".into(),
                    password: "secret1".into(),
                },
                DeviceInfo::default(),
                AuditMeta::default(),
            )
            .await
            .unwrap();

        let updated = h
            .directory
            .assign_role(&h.admin, staff.id, vec![editor.id.to_string()], AuditMeta::default())
            .await
            .unwrap();
        assert_eq!(updated.role_ids, vec![editor.id]);

        let sessions = h.store.list_sessions(staff.id).await.unwrap();
        assert!(sessions.iter().all(|s| s.revoked_at.is_some()));
        assert!(h
            .sessions
            .refresh(Some(login.session.refresh_token.expose()), DeviceInfo::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn created_principals_cannot_hold_system_role() {
        let h = harness().await;
        let err = h
            .directory
            .create_principal(&h.admin, new_principal("x@example.com", system_role_id(&h)), AuditMeta::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ROLE_PROTECTED");
    }

    #[tokio::test]
    async fn duplicate_email_conflicts_on_email() {
        let h = harness().await;
        let viewer = h.directory.create_role(&h.admin, draft("Viewer"), AuditMeta::default()).await.unwrap();
        let err = h
            .directory
            .create_principal(&h.admin, new_principal("ROOT@example.com", viewer.id), AuditMeta::default())
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Conflict { field: "email".into() });
    }

    #[tokio::test]
    async fn role_in_use_cannot_be_deleted() {
        let h = harness().await;
        let viewer = h.directory.create_role(&h.admin, draft("Viewer"), AuditMeta::default()).await.unwrap();
        h.directory
            .create_principal(&h.admin, new_principal("staff@example.com", viewer.id), AuditMeta::default())
            .await
            .unwrap();

        let err = h.directory.delete_role(&h.admin, viewer.id, AuditMeta::default()).await.unwrap_err();
        assert_eq!(err, ServiceError::Conflict { field: "roleIds".into() });
    }

    #[tokio::test]
    async fn deactivation_rules() {
        let h = harness().await;
        let err = h
            .directory
            .update_principal(
                &h.admin,
                h.admin.principal.id,
                PrincipalPatch { is_active: Some(false), ..Default::default() },
                AuditMeta::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let viewer = h.directory.create_role(&h.admin, draft("Viewer"), AuditMeta::default()).await.unwrap();
        let staff = h
            .directory
            .create_principal(&h.admin, new_principal("staff@example.com", viewer.id), AuditMeta::default())
            .await
            .unwrap();

        let updated = h
            .directory
            .update_principal(
                &h.admin,
                staff.id,
                PrincipalPatch { is_active: Some(false), ..Default::default() },
                AuditMeta::default(),
            )
            .await
            .unwrap();
        assert!(!updated.is_active);
    }

    #[tokio::test]
    async fn concurrent_profile_edits_never_undo_a_reassignment() {
        let h = harness().await;
        let viewer = h.directory.create_role(&h.admin, draft("Viewer"), AuditMeta::default()).await.unwrap();
        let editor = h.directory.create_role(&h.admin, draft("Editor"), AuditMeta::default()).await.unwrap();
        let staff = h
            .directory
            .create_principal(&h.admin, new_principal("staff@example.com", viewer.id), AuditMeta::default())
            .await
            .unwrap();
        let (staff_id, editor_id) = (staff.id, editor.id);

        let mut handles = Vec::new();
        for i in 0..8 {
            let directory = h.directory.clone();
            let admin = h.admin.clone();
            handles.push(tokio::spawn(async move {
                let patch = PrincipalPatch { name: Some(format!("Staff {i}")), ..Default::default() };
                directory.update_principal(&admin, staff_id, patch, AuditMeta::default()).await.map(|_| ())
            }));
        }
        let directory = h.directory.clone();
        let admin = h.admin.clone();
        handles.push(tokio::spawn(async move {
            directory
                .assign_role(&admin, staff_id, vec![editor_id.to_string()], AuditMeta::default())
                .await
                .map(|_| ())
        }));
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = h.store.get_principal(staff.id).await.unwrap().unwrap();
        assert_eq!(stored.role_ids, vec![editor.id]);
        assert!(stored.name.starts_with("Staff "));

        let renamed = h
            .directory
            .update_principal(
                &h.admin,
                staff.id,
                PrincipalPatch { name: Some("Renamed".into()), ..Default::default() },
                AuditMeta::default(),
            )
            .await
            .unwrap();
        assert_eq!(renamed.role_ids, vec![editor.id]);
    }

    #[tokio::test]
    async fn reassignment_leaves_a_deactivated_principal_inactive() {
        let h = harness().await;
        let viewer = h.directory.create_role(&h.admin, draft("Viewer"), AuditMeta::default()).await.unwrap();
        let editor = h.directory.create_role(&h.admin, draft("Editor"), AuditMeta::default()).await.unwrap();
        let staff = h
            .directory
            .create_principal(&h.admin, new_principal("staff@example.com", viewer.id), AuditMeta::default())
            .await
            .unwrap();

        h.directory
            .update_principal(
                &h.admin,
                staff.id,
                PrincipalPatch { is_active: Some(false), ..Default::default() },
                AuditMeta::default(),
            )
            .await
            .unwrap();

        let updated = h
            .directory
            .assign_role(&h.admin, staff.id, vec![editor.id.to_string()], AuditMeta::default())
            .await
            .unwrap();
        assert!(!updated.is_active);
        assert!(!h.store.get_principal(staff.id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn profile_patch_clears_phone_and_leaves_other_fields() {
        let h = harness().await;
        let viewer = h.directory.create_role(&h.admin, draft("Viewer"), AuditMeta::default()).await.unwrap();
        let mut input = new_principal("staff@example.com", viewer.id);
        input.phone = Some("5550199".into());
        let staff = h.directory.create_principal(&h.admin, input, AuditMeta::default()).await.unwrap();

        let updated = h
            .directory
            .update_principal(
                &h.admin,
                staff.id,
                PrincipalPatch { phone: Some("  ".into()), ..Default::default() },
                AuditMeta::default(),
            )
            .await
            .unwrap();
        assert_eq!(updated.phone, None);
        assert_eq!(updated.name, "Staff");
        assert_eq!(updated.role_ids, vec![viewer.id]);
        assert!(updated.is_active);

        let err = h
            .directory
            .update_principal(
                &h.admin,
                PrincipalId::new(),
                PrincipalPatch { name: Some("Ghost".into()), ..Default::default() },
                AuditMeta::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::NotFound("User"));
    }

    #[tokio::test]
    async fn privileged_changes_are_audited_without_password_hashes() {
        let h = harness().await;
        let viewer = h.directory.create_role(&h.admin, draft("Viewer"), AuditMeta::default()).await.unwrap();
        h.directory
            .create_principal(&h.admin, new_principal("staff@example.com", viewer.id), AuditMeta::default())
            .await
            .unwrap();

        let page = h.directory.list_audit(&ListQuery::default()).await.unwrap();
        let actions: Vec<_> = page.items.iter().map(|a| format!("{}:{}", a.module, a.action)).collect();
        assert!(actions.contains(&"roles:create".to_string()));
        assert!(actions.contains(&"users:create".to_string()));

        let created = page.items.iter().find(|a| a.module == "users").unwrap();
        let after = created.after.as_ref().unwrap();
        assert!(after.get("passwordHash").is_none());
        assert!(!after.to_string().contains("$argon2"));
    }
}

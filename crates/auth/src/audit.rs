//! Audit records: immutable, append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keystone_core::{AuditId, PrincipalId};

/// Request metadata attached to every audit record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub route: Option<String>,
    pub method: Option<String>,
}

/// What a caller hands to the recorder.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub actor: Option<PrincipalId>,
    pub module: &'static str,
    pub action: &'static str,
    pub entity_id: Option<String>,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub meta: AuditMeta,
}

impl AuditEntry {
    pub fn new(module: &'static str, action: &'static str, meta: AuditMeta) -> Self {
        Self {
            actor: None,
            module,
            action,
            entity_id: None,
            before: None,
            after: None,
            meta,
        }
    }

    pub fn actor(mut self, actor: PrincipalId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn entity(mut self, id: impl ToString) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    pub fn before(mut self, snapshot: serde_json::Value) -> Self {
        self.before = Some(snapshot);
        self
    }

    pub fn after(mut self, snapshot: serde_json::Value) -> Self {
        self.after = Some(snapshot);
        self
    }

    pub fn into_record(self, now: DateTime<Utc>) -> AuditRecord {
        AuditRecord {
            id: AuditId::new(),
            actor: self.actor,
            module: self.module.to_string(),
            action: self.action.to_string(),
            entity_id: self.entity_id,
            before: self.before,
            after: self.after,
            meta: self.meta,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    #[serde(rename = "_id")]
    pub id: AuditId,
    #[serde(rename = "actorId")]
    pub actor: Option<PrincipalId>,
    pub module: String,
    pub action: String,
    pub entity_id: Option<String>,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub meta: AuditMeta,
    pub created_at: DateTime<Utc>,
}

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use keystone_auth::AuditEntry;

use crate::store::AuditStore;

/// Best-effort audit trail writer.
///
/// A failed append is logged at `warn` and swallowed; the triggering action
/// always proceeds.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, entry: AuditEntry) {
        let module = entry.module;
        let action = entry.action;
        let actor = entry.actor;

        if let Err(err) = self.store.append_audit(entry.into_record(Utc::now())).await {
            warn!(module, action, actor = ?actor, error = %err, "audit record dropped");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use keystone_auth::{AuditMeta, AuditRecord};

    use crate::store::{InMemoryCredentialStore, ListQuery, Page, StoreError, StoreResult};

    /// Audit store whose writes always fail.
    pub(crate) struct FailingAuditStore;

    #[async_trait]
    impl AuditStore for FailingAuditStore {
        async fn append_audit(&self, _record: AuditRecord) -> StoreResult<()> {
            Err(StoreError::Backend("audit table unavailable".into()))
        }

        async fn list_audit(&self, query: &ListQuery) -> StoreResult<Page<AuditRecord>> {
            Ok(Page::new(vec![], query, 0))
        }
    }

    #[tokio::test]
    async fn records_entries() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let recorder = AuditRecorder::new(store.clone());

        recorder
            .record(AuditEntry::new("auth", "logout", AuditMeta::default()))
            .await;

        let page = store.list_audit(&ListQuery::default()).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].module, "auth");
    }

    #[tokio::test]
    async fn swallows_store_failures() {
        let recorder = AuditRecorder::new(Arc::new(FailingAuditStore));
        recorder
            .record(AuditEntry::new("roles", "create", AuditMeta::default()))
            .await;
    }
}

//! Audit trail.
//!
//! Entries are written as detached tasks: a failed audit write is logged
//! and never fails or rolls back the operation it describes.

use std::sync::Arc;

use clubdesk_db::{DocumentStore, entities::AuditLogEntry, repositories::AuditLogRepository};
use serde_json::Value;
use tokio::task::JoinHandle;

use super::tasks::spawn_detached;

/// Fire-and-forget audit logger.
#[derive(Clone)]
pub struct AuditLogger {
    repo: AuditLogRepository,
}

impl AuditLogger {
    /// Create a new audit logger.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            repo: AuditLogRepository::new(store),
        }
    }

    /// Record `action` on `target` in the background.
    pub fn record(
        &self,
        action: &str,
        actor_uid: Option<String>,
        target: impl Into<String>,
        details: Value,
    ) -> JoinHandle<()> {
        let entry = AuditLogEntry::new(action, actor_uid, target, details);
        let repo = self.repo.clone();
        spawn_detached("audit_log", async move {
            repo.create(&entry).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clubdesk_common::{StoreErrorCode, StoreOperation};
    use clubdesk_db::{MemoryStore, paths};
    use clubdesk_db::repositories::AuditLogRepository;
    use serde_json::json;

    #[tokio::test]
    async fn test_record_writes_entry() {
        let store = MemoryStore::new();
        let audit = AuditLogger::new(Arc::new(store.clone()));

        audit
            .record("survey.deleted", Some("u1".to_string()), "surveys/s1", json!({}))
            .await
            .unwrap();

        let entries = AuditLogRepository::new(Arc::new(store)).find_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "survey.deleted");
        assert_eq!(entries[0].actor_uid.as_deref(), Some("u1"));
        assert_eq!(entries[0].target, "surveys/s1");
    }

    #[tokio::test]
    async fn test_failed_write_is_absorbed() {
        let store = MemoryStore::new();
        store.inject_fault(
            StoreOperation::Write,
            paths::AUDIT_LOGS,
            StoreErrorCode::PermissionDenied,
        );
        let audit = AuditLogger::new(Arc::new(store.clone()));

        let handle = audit.record("survey.deleted", None, "surveys/s1", Value::Null);
        assert!(handle.await.is_ok());
        let entries = AuditLogRepository::new(Arc::new(store)).find_all().await.unwrap();
        assert!(entries.is_empty());
    }
}

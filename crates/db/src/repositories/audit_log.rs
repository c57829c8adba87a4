//! Audit log repository.

use std::sync::Arc;

use clubdesk_common::{AppError, AppResult, IdGenerator};

use crate::entities::AuditLogEntry;
use crate::paths;
use crate::store::{DocumentStore, Fields, SetOptions};

/// Repository for `auditLogs/{id}`.
#[derive(Clone)]
pub struct AuditLogRepository {
    store: Arc<dyn DocumentStore>,
    id_gen: IdGenerator,
}

impl AuditLogRepository {
    /// Create a new audit log repository.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            id_gen: IdGenerator::new(),
        }
    }

    /// Store an entry under a fresh ID and return the ID.
    pub async fn create(&self, entry: &AuditLogEntry) -> AppResult<String> {
        let id = self.id_gen.generate();
        let serde_json::Value::Object(doc) = serde_json::to_value(entry)? else {
            return Err(AppError::Internal(
                "Audit entry did not serialize to an object".to_string(),
            ));
        };
        self.store
            .set(
                &paths::audit_logs().doc(&id),
                Fields::from(doc),
                SetOptions::replace(),
            )
            .await?;
        Ok(id)
    }

    /// All entries, oldest first.
    pub async fn find_all(&self) -> AppResult<Vec<AuditLogEntry>> {
        let docs = self.store.list(&paths::audit_logs()).await?;
        docs.into_iter()
            .map(|doc| Ok(serde_json::from_value(serde_json::Value::Object(doc.data))?))
            .collect()
    }
}

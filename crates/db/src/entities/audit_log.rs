//! Audit log entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One audit trail record under `auditLogs/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    /// What happened, e.g. `survey.verified`.
    pub action: String,
    /// Acting user, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_uid: Option<String>,
    /// Affected document path.
    pub target: String,
    /// Free-form details.
    #[serde(default)]
    pub details: Value,
    /// Client-side creation time.
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    /// New entry stamped with the current time.
    pub fn new(
        action: impl Into<String>,
        actor_uid: Option<String>,
        target: impl Into<String>,
        details: Value,
    ) -> Self {
        Self {
            action: action.into(),
            actor_uid,
            target: target.into(),
            details,
            created_at: Utc::now(),
        }
    }
}

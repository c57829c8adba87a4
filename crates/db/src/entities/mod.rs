//! Document entities.

pub mod audit_log;
pub mod survey;
pub mod usage;

pub use audit_log::AuditLogEntry;
pub use survey::{Survey, SurveyStatus, Vote};
pub use usage::UsageScope;

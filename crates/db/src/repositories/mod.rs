//! Repositories over the document store.

pub mod audit_log;
pub mod settings;
pub mod survey;
pub mod usage;
pub mod vote;

pub use audit_log::AuditLogRepository;
pub use settings::SettingsRepository;
pub use survey::SurveyRepository;
pub use usage::UsageRepository;
pub use vote::VoteRepository;

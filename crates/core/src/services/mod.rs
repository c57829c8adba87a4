//! Business logic services.

#![allow(missing_docs)]

pub mod audit;
pub mod flags;
pub mod live;
pub mod migration;
pub mod rate_limit;
pub mod registry;
pub mod retry;
pub mod session;
pub mod survey;
pub mod tasks;
pub mod verification;
pub mod vote_storage;

pub use audit::AuditLogger;
pub use flags::{FlagSnapshot, VoteStorageFlags, VoteStorageMode};
pub use live::{FeedGuard, LiveSubscriptions};
pub use migration::{MigrationEngine, MigrationResult, SurveyError};
pub use rate_limit::{
    LimitCheck, RateLimitUpdate, RateLimiter, RateLimits, ScopeKind, UsageCategory,
    ensure_pending_quota,
};
pub use registry::{ListenerDebugInfo, ListenerHandle, ListenerId, ListenerRegistry, ListenerScope};
pub use retry::with_retry;
pub use session::{Session, SessionState};
pub use survey::{CreateSurveyInput, SurveyService};
pub use tasks::spawn_detached;
pub use verification::{
    MismatchKind, VerificationEngine, VerificationResult, VoteMismatch, compare_votes,
};
pub use vote_storage::{
    ArrayVotes, DualWriteVotes, SubcollectionVotes, VoteStorage, VoteWriteOutcome, VoteWriter,
    dedupe_votes, upsert_vote,
};

//! ID generation utilities.

use ulid::Ulid;
use uuid::Uuid;

/// ID generator for documents.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new ULID-based document ID.
    ///
    /// ULIDs sort by creation time at millisecond resolution.
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// Generate a random correlation ID for a migration or verification run.
    #[must_use]
    pub fn generate_run_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

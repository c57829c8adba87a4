//! Runtime feature flags for vote storage.
//!
//! Flags are read on every call, so flipping them takes effect for the next
//! vote write or survey read without a restart.

use std::sync::atomic::{AtomicBool, Ordering};

use clubdesk_common::VoteStorageConfig;
use serde::Serialize;
use tracing::info;

/// Physical layout used for vote writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteStorageMode {
    /// Embedded `votes` array on the survey document.
    Array,
    /// One document per voter under `surveys/{id}/votes`.
    Subcollection,
    /// Both, in one atomic batch.
    DualWrite,
}

impl VoteStorageMode {
    /// Pure mode selection from the two flags. Dual write wins.
    #[must_use]
    pub const fn select(use_subcollection: bool, dual_write: bool) -> Self {
        if dual_write {
            Self::DualWrite
        } else if use_subcollection {
            Self::Subcollection
        } else {
            Self::Array
        }
    }
}

/// Point-in-time view of the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagSnapshot {
    pub use_subcollection: bool,
    pub dual_write: bool,
    pub mode: VoteStorageMode,
}

/// Shared, mutable vote storage flags.
#[derive(Debug, Default)]
pub struct VoteStorageFlags {
    use_subcollection: AtomicBool,
    dual_write: AtomicBool,
}

impl VoteStorageFlags {
    #[must_use]
    pub const fn new(use_subcollection: bool, dual_write: bool) -> Self {
        Self {
            use_subcollection: AtomicBool::new(use_subcollection),
            dual_write: AtomicBool::new(dual_write),
        }
    }

    #[must_use]
    pub const fn from_config(config: &VoteStorageConfig) -> Self {
        Self::new(config.use_subcollection, config.dual_write)
    }

    /// Whether reads overlay the sub-collection.
    #[must_use]
    pub fn use_subcollection(&self) -> bool {
        self.use_subcollection.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn dual_write(&self) -> bool {
        self.dual_write.load(Ordering::SeqCst)
    }

    /// Write mode for the next vote.
    #[must_use]
    pub fn mode(&self) -> VoteStorageMode {
        VoteStorageMode::select(self.use_subcollection(), self.dual_write())
    }

    pub fn set_use_subcollection(&self, enabled: bool) {
        self.use_subcollection.store(enabled, Ordering::SeqCst);
        info!(enabled, mode = ?self.mode(), "Sub-collection flag changed");
    }

    pub fn set_dual_write(&self, enabled: bool) {
        self.dual_write.store(enabled, Ordering::SeqCst);
        info!(enabled, mode = ?self.mode(), "Dual-write flag changed");
    }

    #[must_use]
    pub fn snapshot(&self) -> FlagSnapshot {
        let use_subcollection = self.use_subcollection();
        let dual_write = self.dual_write();
        FlagSnapshot {
            use_subcollection,
            dual_write,
            mode: VoteStorageMode::select(use_subcollection, dual_write),
        }
    }
}

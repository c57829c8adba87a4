//! Document store layer for clubdesk.
//!
//! The store itself is an external collaborator consumed through the
//! [`DocumentStore`] capability trait. [`MemoryStore`] implements it
//! in-process for tests and for operator tooling that works on exported
//! snapshots. Entities and repositories map surveys, votes, usage counters
//! and settings onto document paths.

pub mod entities;
pub mod memory;
pub mod path;
pub mod paths;
pub mod repositories;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use memory::{MemoryStore, StoreStats};
pub use path::{CollectionPath, DocumentPath};
pub use store::{
    CancelFn, ChangeCallback, Document, DocumentStore, ErrorCallback, FieldValue, Fields, Filter,
    FilterOp, MAX_BATCH_OPERATIONS, Query, SetOptions, Snapshot, StoredDocument,
    SubscriptionTarget, WriteBatch, WriteOp,
};

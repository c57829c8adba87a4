//! Document store capability interface.
//!
//! Mirrors what a managed cloud document database offers: keyed documents,
//! filtered collection queries, atomic batched writes with a bounded size,
//! an atomic increment value and real-time subscriptions that keep firing
//! until cancelled.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use clubdesk_common::StoreError;
use serde_json::{Map, Value};

use crate::path::{CollectionPath, DocumentPath};

/// Hard limit of operations per atomic batch.
pub const MAX_BATCH_OPERATIONS: usize = 500;

/// Document body.
pub type Document = Map<String, Value>;

/// Called with every new snapshot of a subscribed target.
pub type ChangeCallback = Arc<dyn Fn(Snapshot) + Send + Sync>;

/// Called when a subscription fails. The subscription is detached afterwards.
pub type ErrorCallback = Arc<dyn Fn(StoreError) + Send + Sync>;

/// Detaches a subscription from the store.
pub type CancelFn = Box<dyn FnOnce() -> Result<(), StoreError> + Send>;

/// Value written to a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Replace the field with this value.
    Set(Value),
    /// Atomically add to the numeric field (missing counts as zero).
    Increment(i64),
    /// Store-assigned commit time.
    ServerTimestamp,
    /// Remove the field.
    Delete,
}

/// Field writes for a set or update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(BTreeMap<String, FieldValue>);

impl Fields {
    /// Empty field set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), FieldValue::Set(value.into()));
        self
    }

    /// Atomically add `by` to `key`.
    #[must_use]
    pub fn increment(mut self, key: impl Into<String>, by: i64) -> Self {
        self.0.insert(key.into(), FieldValue::Increment(by));
        self
    }

    /// Set `key` to the commit time.
    #[must_use]
    pub fn server_timestamp(mut self, key: impl Into<String>) -> Self {
        self.0.insert(key.into(), FieldValue::ServerTimestamp);
        self
    }

    /// Remove `key`.
    #[must_use]
    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.0.insert(key.into(), FieldValue::Delete);
        self
    }

    /// Iterate field writes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    /// Number of field writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no field is written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Document> for Fields {
    fn from(doc: Document) -> Self {
        Self(
            doc.into_iter()
                .map(|(k, v)| (k, FieldValue::Set(v)))
                .collect(),
        )
    }
}

/// Options for [`DocumentStore::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Merge into an existing document instead of replacing it.
    pub merge: bool,
}

impl SetOptions {
    /// Create-or-merge.
    #[must_use]
    pub const fn merge() -> Self {
        Self { merge: true }
    }

    /// Create-or-replace.
    #[must_use]
    pub const fn replace() -> Self {
        Self { merge: false }
    }
}

/// Filter comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    /// Field equals the value.
    Equal(Value),
    /// Field equals one of the values.
    In(Vec<Value>),
}

/// A single field filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Field name.
    pub field: String,
    /// Comparison.
    pub op: FilterOp,
}

impl Filter {
    /// `field == value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Equal(value.into()),
        }
    }

    /// `field in values`
    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::In(values),
        }
    }

    /// Whether `doc` satisfies this filter.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        let Some(actual) = doc.get(&self.field) else {
            return false;
        };
        match &self.op {
            FilterOp::Equal(expected) => actual == expected,
            FilterOp::In(values) => values.contains(actual),
        }
    }
}

/// Collection query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Queried collection.
    pub collection: CollectionPath,
    /// Filters, all of which must match.
    pub filters: Vec<Filter>,
}

impl Query {
    /// All documents of a collection.
    #[must_use]
    pub const fn collection(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: Vec::new(),
        }
    }

    /// Add a filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Whether a document at `path` with `doc` belongs to the result set.
    #[must_use]
    pub fn matches(&self, path: &DocumentPath, doc: &Document) -> bool {
        self.collection.contains(path) && self.filters.iter().all(|f| f.matches(doc))
    }
}

/// A document returned by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Full path.
    pub path: DocumentPath,
    /// Document body.
    pub data: Document,
}

impl StoredDocument {
    /// Document ID.
    #[must_use]
    pub fn id(&self) -> &str {
        self.path.id()
    }
}

/// What a subscription watches.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionTarget {
    /// A single document.
    Document(DocumentPath),
    /// A query result set.
    Query(Query),
}

impl SubscriptionTarget {
    /// Path prefix the target lives under.
    #[must_use]
    pub fn path_str(&self) -> &str {
        match self {
            Self::Document(path) => path.as_str(),
            Self::Query(query) => query.collection.as_str(),
        }
    }

    /// Whether a write to `path` can change what this target sees.
    #[must_use]
    pub fn is_affected_by(&self, path: &DocumentPath) -> bool {
        match self {
            Self::Document(watched) => watched == path,
            Self::Query(query) => query.collection.contains(path),
        }
    }
}

/// Delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// Current state of a watched document (`None` when it does not exist).
    Document {
        /// Watched path.
        path: DocumentPath,
        /// Body, if present.
        data: Option<Document>,
    },
    /// Current result set of a watched query.
    Query(Vec<StoredDocument>),
}

/// One operation in a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create, replace or merge.
    Set {
        /// Target document.
        path: DocumentPath,
        /// Field writes.
        fields: Fields,
        /// Merge behaviour.
        options: SetOptions,
    },
    /// Modify an existing document.
    Update {
        /// Target document.
        path: DocumentPath,
        /// Field writes.
        fields: Fields,
    },
    /// Remove a document.
    Delete {
        /// Target document.
        path: DocumentPath,
    },
}

impl WriteOp {
    /// Target document.
    #[must_use]
    pub const fn path(&self) -> &DocumentPath {
        match self {
            Self::Set { path, .. } | Self::Update { path, .. } | Self::Delete { path } => path,
        }
    }
}

/// Writes committed atomically by [`DocumentStore::commit`].
///
/// A batch holding more than [`MAX_BATCH_OPERATIONS`] operations is
/// rejected at commit time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a set.
    pub fn set(&mut self, path: DocumentPath, fields: Fields, options: SetOptions) -> &mut Self {
        self.ops.push(WriteOp::Set {
            path,
            fields,
            options,
        });
        self
    }

    /// Queue an update.
    pub fn update(&mut self, path: DocumentPath, fields: Fields) -> &mut Self {
        self.ops.push(WriteOp::Update { path, fields });
        self
    }

    /// Queue a delete.
    pub fn delete(&mut self, path: DocumentPath) -> &mut Self {
        self.ops.push(WriteOp::Delete { path });
        self
    }

    /// Number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Queued operations in order.
    #[must_use]
    pub fn operations(&self) -> &[WriteOp] {
        &self.ops
    }
}

/// Capability interface of the remote document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document. `Ok(None)` when it does not exist.
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError>;

    /// Create or overwrite a document, or merge into it with [`SetOptions::merge`].
    async fn set(
        &self,
        path: &DocumentPath,
        fields: Fields,
        options: SetOptions,
    ) -> Result<(), StoreError>;

    /// Modify fields of an existing document. Fails with `not-found` otherwise.
    async fn update(&self, path: &DocumentPath, fields: Fields) -> Result<(), StoreError>;

    /// Remove a document. Removing a missing document succeeds.
    async fn delete(&self, path: &DocumentPath) -> Result<(), StoreError>;

    /// Run a collection query.
    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError>;

    /// Commit all operations of `batch` atomically.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Watch a document or query.
    ///
    /// `on_change` receives the current state immediately and after every
    /// change until the returned [`CancelFn`] is called. Failures arrive via
    /// `on_error`.
    fn subscribe(
        &self,
        target: SubscriptionTarget,
        on_change: ChangeCallback,
        on_error: ErrorCallback,
    ) -> Result<CancelFn, StoreError>;

    /// All documents of a collection.
    async fn list(&self, collection: &CollectionPath) -> Result<Vec<StoredDocument>, StoreError> {
        self.query(&Query::collection(collection.clone())).await
    }
}

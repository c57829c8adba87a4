//! In-process document store.
//!
//! Behaves like the managed store as far as this crate relies on it:
//! merge/replace semantics, atomic batches bounded by
//! [`MAX_BATCH_OPERATIONS`], numeric increments, and subscriptions that
//! receive a fresh snapshot after every committed write. It also records
//! operation statistics and can inject provider errors, which is what the
//! tests use it for.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use clubdesk_common::{StoreError, StoreErrorCode, StoreOperation};
use serde_json::Value;
use tracing::debug;

use crate::path::{CollectionPath, DocumentPath};
use crate::store::{
    CancelFn, ChangeCallback, Document, DocumentStore, ErrorCallback, FieldValue, Fields,
    MAX_BATCH_OPERATIONS, Query, SetOptions, Snapshot, StoredDocument, SubscriptionTarget,
    WriteBatch, WriteOp,
};

/// Operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// `get` and `query` calls.
    pub reads: u64,
    /// `set` and `update` calls.
    pub writes: u64,
    /// `delete` calls.
    pub deletes: u64,
    /// Committed batches.
    pub batches: u64,
    /// Operations inside committed batches.
    pub batched_operations: u64,
}

#[derive(Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    batches: AtomicU64,
    batched_operations: AtomicU64,
}

struct Listener {
    target: SubscriptionTarget,
    on_change: ChangeCallback,
    on_error: ErrorCallback,
}

#[derive(Debug, Clone)]
struct FaultRule {
    operation: StoreOperation,
    path_prefix: String,
    code: StoreErrorCode,
    remaining: Option<u32>,
}

#[derive(Default)]
struct Inner {
    docs: RwLock<BTreeMap<String, Document>>,
    listeners: Mutex<HashMap<u64, Listener>>,
    next_listener_id: AtomicU64,
    faults: Mutex<Vec<FaultRule>>,
    counters: Counters,
}

/// Thread-safe in-memory [`DocumentStore`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot of the form `{ "<document path>": { ...fields } }`.
    pub fn from_json(snapshot: &Value) -> Result<Self, StoreError> {
        let entries = snapshot.as_object().ok_or_else(|| {
            StoreError::read(
                StoreErrorCode::InvalidArgument,
                "Snapshot must be a JSON object keyed by document path",
            )
        })?;

        let store = Self::new();
        {
            let mut docs = store.write_docs();
            for (raw_path, body) in entries {
                let path = DocumentPath::parse(raw_path)?;
                let data = body.as_object().cloned().ok_or_else(|| {
                    StoreError::read(
                        StoreErrorCode::InvalidArgument,
                        format!("Document {raw_path} is not an object"),
                    )
                })?;
                docs.insert(path.as_str().to_string(), data);
            }
        }
        debug!(documents = entries.len(), "Loaded store snapshot");
        Ok(store)
    }

    /// Export every document as `{ "<document path>": { ...fields } }`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let docs = self.read_docs();
        Value::Object(
            docs.iter()
                .map(|(path, data)| (path.clone(), Value::Object(data.clone())))
                .collect(),
        )
    }

    /// Number of stored documents.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.read_docs().len()
    }

    /// Number of attached subscriptions.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }

    /// Operation counters since creation or the last [`Self::reset_stats`].
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let c = &self.inner.counters;
        StoreStats {
            reads: c.reads.load(Ordering::SeqCst),
            writes: c.writes.load(Ordering::SeqCst),
            deletes: c.deletes.load(Ordering::SeqCst),
            batches: c.batches.load(Ordering::SeqCst),
            batched_operations: c.batched_operations.load(Ordering::SeqCst),
        }
    }

    /// Zero all operation counters.
    pub fn reset_stats(&self) {
        let c = &self.inner.counters;
        c.reads.store(0, Ordering::SeqCst);
        c.writes.store(0, Ordering::SeqCst);
        c.deletes.store(0, Ordering::SeqCst);
        c.batches.store(0, Ordering::SeqCst);
        c.batched_operations.store(0, Ordering::SeqCst);
    }

    /// Fail every `operation` on paths starting with `path_prefix`.
    pub fn inject_fault(&self, operation: StoreOperation, path_prefix: &str, code: StoreErrorCode) {
        self.push_fault(operation, path_prefix, code, None);
    }

    /// Fail the next `times` matching operations, then recover.
    pub fn inject_fault_times(
        &self,
        operation: StoreOperation,
        path_prefix: &str,
        code: StoreErrorCode,
        times: u32,
    ) {
        self.push_fault(operation, path_prefix, code, Some(times));
    }

    /// Deliver `code` to every subscription under `path_prefix` and detach them,
    /// as the managed store does when a listener is revoked.
    pub fn fail_listeners(&self, path_prefix: &str, code: StoreErrorCode) -> usize {
        let failed: Vec<Listener> = {
            let mut listeners = self.lock_listeners();
            let ids: Vec<u64> = listeners
                .iter()
                .filter(|(_, l)| l.target.path_str().starts_with(path_prefix))
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| listeners.remove(id)).collect()
        };

        for listener in &failed {
            (listener.on_error)(StoreError::read(
                code,
                format!("Listener on {} failed", listener.target.path_str()),
            ));
        }
        failed.len()
    }

    fn push_fault(
        &self,
        operation: StoreOperation,
        path_prefix: &str,
        code: StoreErrorCode,
        remaining: Option<u32>,
    ) {
        self.inner
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(FaultRule {
                operation,
                path_prefix: path_prefix.to_string(),
                code,
                remaining,
            });
    }

    fn check_fault(&self, operation: StoreOperation, path: &str) -> Result<(), StoreError> {
        let mut faults = self
            .inner
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for rule in faults.iter_mut() {
            if rule.operation != operation || !path.starts_with(&rule.path_prefix) {
                continue;
            }
            match rule.remaining {
                Some(0) => continue,
                Some(ref mut n) => *n -= 1,
                None => {}
            }
            return Err(StoreError::new(
                operation,
                rule.code,
                format!("Injected fault on {path}"),
            ));
        }
        Ok(())
    }

    fn read_docs(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Document>> {
        self.inner.docs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_docs(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Document>> {
        self.inner
            .docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Listener>> {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn run_query(docs: &BTreeMap<String, Document>, query: &Query) -> Vec<StoredDocument> {
        let prefix = format!("{}/", query.collection.as_str());
        docs.range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| !key[prefix.len()..].contains('/'))
            .filter_map(|(key, data)| {
                let path = query.collection.doc(&key[prefix.len()..]);
                query.matches(&path, data).then(|| StoredDocument {
                    path,
                    data: data.clone(),
                })
            })
            .collect()
    }

    fn snapshot_for(&self, target: &SubscriptionTarget) -> Snapshot {
        let docs = self.read_docs();
        match target {
            SubscriptionTarget::Document(path) => Snapshot::Document {
                path: path.clone(),
                data: docs.get(path.as_str()).cloned(),
            },
            SubscriptionTarget::Query(query) => Snapshot::Query(Self::run_query(&docs, query)),
        }
    }

    /// Push fresh snapshots to every listener affected by `changed`.
    fn notify(&self, changed: &[DocumentPath]) {
        let affected: Vec<(SubscriptionTarget, ChangeCallback)> = {
            let listeners = self.lock_listeners();
            listeners
                .values()
                .filter(|l| changed.iter().any(|p| l.target.is_affected_by(p)))
                .map(|l| (l.target.clone(), Arc::clone(&l.on_change)))
                .collect()
        };

        for (target, on_change) in affected {
            on_change(self.snapshot_for(&target));
        }
    }
}

fn apply_fields(doc: &mut Document, fields: &Fields) {
    for (key, value) in fields.iter() {
        match value {
            FieldValue::Set(v) => {
                doc.insert(key.clone(), v.clone());
            }
            FieldValue::Increment(by) => {
                let next = match doc.get(key) {
                    Some(Value::Number(n)) if n.is_i64() => {
                        Value::from(n.as_i64().unwrap_or_default().saturating_add(*by))
                    }
                    Some(Value::Number(n)) => {
                        Value::from(n.as_f64().unwrap_or_default() + *by as f64)
                    }
                    _ => Value::from(*by),
                };
                doc.insert(key.clone(), next);
            }
            FieldValue::ServerTimestamp => {
                doc.insert(key.clone(), Value::from(Utc::now().to_rfc3339()));
            }
            FieldValue::Delete => {
                doc.remove(key);
            }
        }
    }
}

/// Compute the post-write state of one document.
fn staged_write(current: Option<&Document>, op: &WriteOp) -> Result<Option<Document>, StoreError> {
    match op {
        WriteOp::Set {
            fields, options, ..
        } => {
            let mut doc = if options.merge {
                current.cloned().unwrap_or_default()
            } else {
                Document::new()
            };
            apply_fields(&mut doc, fields);
            Ok(Some(doc))
        }
        WriteOp::Update { path, fields } => {
            let mut doc = current.cloned().ok_or_else(|| {
                StoreError::write(
                    StoreErrorCode::NotFound,
                    format!("No document to update: {path}"),
                )
            })?;
            apply_fields(&mut doc, fields);
            Ok(Some(doc))
        }
        WriteOp::Delete { .. } => Ok(None),
    }
}

const fn operation_kind(op: &WriteOp) -> StoreOperation {
    match op {
        WriteOp::Delete { .. } => StoreOperation::Delete,
        WriteOp::Set { .. } | WriteOp::Update { .. } => StoreOperation::Write,
    }
}

impl MemoryStore {
    fn apply_single(&self, op: &WriteOp) -> Result<(), StoreError> {
        let kind = operation_kind(op);
        let path = op.path();
        path.validate(kind)?;
        self.check_fault(kind, path.as_str())?;

        {
            let mut docs = self.write_docs();
            match staged_write(docs.get(path.as_str()), op)? {
                Some(doc) => {
                    docs.insert(path.as_str().to_string(), doc);
                }
                None => {
                    docs.remove(path.as_str());
                }
            }
        }

        let counter = match kind {
            StoreOperation::Delete => &self.inner.counters.deletes,
            _ => &self.inner.counters.writes,
        };
        counter.fetch_add(1, Ordering::SeqCst);

        self.notify(std::slice::from_ref(path));
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        path.validate(StoreOperation::Read)?;
        self.check_fault(StoreOperation::Read, path.as_str())?;
        self.inner.counters.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.read_docs().get(path.as_str()).cloned())
    }

    async fn set(
        &self,
        path: &DocumentPath,
        fields: Fields,
        options: SetOptions,
    ) -> Result<(), StoreError> {
        self.apply_single(&WriteOp::Set {
            path: path.clone(),
            fields,
            options,
        })
    }

    async fn update(&self, path: &DocumentPath, fields: Fields) -> Result<(), StoreError> {
        self.apply_single(&WriteOp::Update {
            path: path.clone(),
            fields,
        })
    }

    async fn delete(&self, path: &DocumentPath) -> Result<(), StoreError> {
        self.apply_single(&WriteOp::Delete { path: path.clone() })
    }

    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        query.collection.validate(StoreOperation::Read)?;
        self.check_fault(StoreOperation::Read, query.collection.as_str())?;
        self.inner.counters.reads.fetch_add(1, Ordering::SeqCst);
        Ok(Self::run_query(&self.read_docs(), query))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.len() > MAX_BATCH_OPERATIONS {
            return Err(StoreError::write(
                StoreErrorCode::InvalidArgument,
                format!(
                    "Batch holds {} operations, maximum is {MAX_BATCH_OPERATIONS}",
                    batch.len()
                ),
            ));
        }
        if batch.is_empty() {
            return Ok(());
        }

        for op in batch.operations() {
            let kind = operation_kind(op);
            op.path().validate(kind)?;
            self.check_fault(kind, op.path().as_str())?;
        }

        let op_count = batch.len() as u64;
        let changed: Vec<DocumentPath> = {
            let mut docs = self.write_docs();
            // Stage every write first so a failing operation leaves nothing applied.
            let mut staged: BTreeMap<String, Option<Document>> = BTreeMap::new();
            for op in batch.operations() {
                let key = op.path().as_str();
                let current = match staged.get(key) {
                    Some(pending) => pending.as_ref(),
                    None => docs.get(key),
                };
                let next = staged_write(current, op)?;
                staged.insert(key.to_string(), next);
            }

            let mut changed = Vec::with_capacity(staged.len());
            for (key, next) in staged {
                match next {
                    Some(doc) => {
                        docs.insert(key.clone(), doc);
                    }
                    None => {
                        docs.remove(&key);
                    }
                }
                changed.push(DocumentPath::parse(&key)?);
            }
            changed
        };

        self.inner.counters.batches.fetch_add(1, Ordering::SeqCst);
        self.inner
            .counters
            .batched_operations
            .fetch_add(op_count, Ordering::SeqCst);

        self.notify(&changed);
        Ok(())
    }

    fn subscribe(
        &self,
        target: SubscriptionTarget,
        on_change: ChangeCallback,
        on_error: ErrorCallback,
    ) -> Result<CancelFn, StoreError> {
        match &target {
            SubscriptionTarget::Document(path) => path.validate(StoreOperation::Read)?,
            SubscriptionTarget::Query(query) => {
                query.collection.validate(StoreOperation::Read)?;
            }
        }

        if let Err(err) = self.check_fault(StoreOperation::Read, target.path_str()) {
            on_error(err);
            return Ok(Box::new(|| Ok(())));
        }

        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.lock_listeners().insert(
            id,
            Listener {
                target: target.clone(),
                on_change: Arc::clone(&on_change),
                on_error,
            },
        );
        debug!(listener = id, path = target.path_str(), "Subscription attached");

        on_change(self.snapshot_for(&target));

        let store = self.clone();
        Ok(Box::new(move || {
            store.lock_listeners().remove(&id);
            debug!(listener = id, "Subscription detached");
            Ok(())
        }))
    }
}

impl MemoryStore {
    /// Convenience: read every document of a collection without touching stats.
    #[must_use]
    pub fn peek_collection(&self, collection: &CollectionPath) -> Vec<StoredDocument> {
        Self::run_query(&self.read_docs(), &Query::collection(collection.clone()))
    }

    /// Convenience: read a document without touching stats or faults.
    #[must_use]
    pub fn peek(&self, path: &DocumentPath) -> Option<Document> {
        self.read_docs().get(path.as_str()).cloned()
    }

    /// Write a document without touching stats or faults. Listeners are notified.
    pub fn seed(&self, path: &DocumentPath, data: Document) {
        self.write_docs().insert(path.as_str().to_string(), data);
        self.notify(std::slice::from_ref(path));
    }
}

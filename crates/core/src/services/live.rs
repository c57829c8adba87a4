//! Live subscriptions.
//!
//! Opens store subscriptions, tracks them in the [`ListenerRegistry`] and
//! applies the listener error policy: a failing listener degrades to an
//! empty result, except for `permission-denied`, which is handed to the
//! caller's `on_fatal` callback.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use clubdesk_common::{AppError, AppResult, StoreError};
use clubdesk_db::{CancelFn, DocumentStore, Snapshot, SubscriptionTarget};
use serde_json::Value;
use tracing::{debug, warn};

use super::registry::{ListenerId, ListenerRegistry};

/// Delivery gate of one live feed.
///
/// Closed when the feed's listener is cancelled. Snapshots are numbered as
/// they arrive and only a snapshot newer than the last delivered one may be
/// claimed, so late work started for an older snapshot is dropped.
#[derive(Debug, Clone, Default)]
pub struct FeedGuard {
    closed: Arc<AtomicBool>,
    issued: Arc<AtomicU64>,
    delivered: Arc<AtomicU64>,
}

impl FeedGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Number the next snapshot.
    pub fn next_sequence(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether the snapshot numbered `sequence` may still be delivered.
    /// A successful claim marks it as the latest delivery.
    pub fn claim(&self, sequence: u64) -> bool {
        self.is_open() && self.delivered.fetch_max(sequence, Ordering::SeqCst) < sequence
    }

    fn wrap(&self, cancel: CancelFn) -> CancelFn {
        let guard = self.clone();
        Box::new(move || {
            guard.close();
            cancel()
        })
    }
}

/// Opens registry-tracked subscriptions.
#[derive(Clone)]
pub struct LiveSubscriptions {
    store: Arc<dyn DocumentStore>,
    registry: Arc<ListenerRegistry>,
}

impl LiveSubscriptions {
    /// Create a new subscription helper.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, registry: Arc<ListenerRegistry>) -> Self {
        Self { store, registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    /// Subscribe to `target` under `id`, replacing any subscription already
    /// registered there.
    ///
    /// `on_data` receives every snapshot. Transient listener failures deliver
    /// an empty snapshot; permission failures go to `on_fatal`.
    pub fn watch<D, E>(
        &self,
        id: ListenerId,
        target: SubscriptionTarget,
        context: BTreeMap<String, Value>,
        on_data: D,
        on_fatal: E,
    ) -> AppResult<()>
    where
        D: Fn(Snapshot) + Send + Sync + 'static,
        E: Fn(AppError) + Send + Sync + 'static,
    {
        self.watch_guarded(id, target, context, FeedGuard::new(), on_data, on_fatal)
    }

    /// Like [`watch`](Self::watch), closing `guard` when the listener is
    /// cancelled. Callbacks that hand snapshots to other tasks check the
    /// guard before delivering.
    pub fn watch_guarded<D, E>(
        &self,
        id: ListenerId,
        target: SubscriptionTarget,
        context: BTreeMap<String, Value>,
        guard: FeedGuard,
        on_data: D,
        on_fatal: E,
    ) -> AppResult<()>
    where
        D: Fn(Snapshot) + Send + Sync + 'static,
        E: Fn(AppError) + Send + Sync + 'static,
    {
        let on_data = Arc::new(on_data);
        let empty = empty_snapshot(&target);

        let on_change = {
            let on_data = Arc::clone(&on_data);
            let guard = guard.clone();
            Arc::new(move |snapshot: Snapshot| {
                if guard.is_open() {
                    on_data(snapshot);
                }
            })
        };
        let error_guard = guard.clone();
        let on_error = Arc::new(move |err: StoreError| {
            if !error_guard.is_open() {
                return;
            }
            if err.is_permission_denied() {
                warn!(listener = %id, error = %err, "Listener lost permission");
                on_fatal(AppError::Store(err));
            } else {
                warn!(listener = %id, error = %err, "Listener failed, showing empty result");
                on_data(empty.clone());
            }
        });

        let cancel = self.store.subscribe(target, on_change, on_error)?;
        self.registry.register(id, guard.wrap(cancel), context);
        debug!(listener = %id, "Live subscription opened");
        Ok(())
    }
}

fn empty_snapshot(target: &SubscriptionTarget) -> Snapshot {
    match target {
        SubscriptionTarget::Document(path) => Snapshot::Document {
            path: path.clone(),
            data: None,
        },
        SubscriptionTarget::Query(_) => Snapshot::Query(Vec::new()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clubdesk_common::{StoreErrorCode, StoreOperation};
    use clubdesk_db::{Document, Fields, MemoryStore, Query, SetOptions, paths};
    use std::sync::Mutex;

    fn setup() -> (MemoryStore, LiveSubscriptions) {
        let store = MemoryStore::new();
        let live = LiveSubscriptions::new(
            Arc::new(store.clone()),
            Arc::new(ListenerRegistry::new()),
        );
        (store, live)
    }

    fn surveys_target() -> SubscriptionTarget {
        SubscriptionTarget::Query(Query::collection(paths::surveys()))
    }

    #[tokio::test]
    async fn test_watch_delivers_updates_until_unregistered() {
        let (store, live) = setup();
        let sizes = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&sizes);
        live.watch(
            ListenerId::Surveys,
            surveys_target(),
            BTreeMap::new(),
            move |snapshot| {
                if let Snapshot::Query(docs) = snapshot {
                    sink.lock().unwrap().push(docs.len());
                }
            },
            |_| {},
        )
        .unwrap();

        store
            .set(&paths::survey("s1"), Fields::new().set("teamId", "t1"), SetOptions::replace())
            .await
            .unwrap();
        assert!(live.registry().unregister(ListenerId::Surveys));
        store
            .set(&paths::survey("s2"), Fields::new().set("teamId", "t1"), SetOptions::replace())
            .await
            .unwrap();

        assert_eq!(*sizes.lock().unwrap(), vec![0, 1]);
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_degrades_to_empty() {
        let (store, live) = setup();
        store.seed(&paths::survey("s1"), Document::new());
        let last = Arc::new(Mutex::new(None));
        let fatal = Arc::new(Mutex::new(false));

        let sink = Arc::clone(&last);
        let fatal_sink = Arc::clone(&fatal);
        live.watch(
            ListenerId::Surveys,
            surveys_target(),
            BTreeMap::new(),
            move |snapshot| *sink.lock().unwrap() = Some(snapshot),
            move |_| *fatal_sink.lock().unwrap() = true,
        )
        .unwrap();

        store.fail_listeners(paths::SURVEYS, StoreErrorCode::Unavailable);
        assert_eq!(*last.lock().unwrap(), Some(Snapshot::Query(Vec::new())));
        assert!(!*fatal.lock().unwrap());
    }

    #[test]
    fn test_feed_guard_drops_stale_and_cancelled() {
        let guard = FeedGuard::new();
        let first = guard.next_sequence();
        let second = guard.next_sequence();

        assert!(guard.claim(second));
        assert!(!guard.claim(first));

        let third = guard.next_sequence();
        guard.close();
        assert!(!guard.claim(third));
    }

    #[tokio::test]
    async fn test_unregister_closes_guard() {
        let (_store, live) = setup();
        let guard = FeedGuard::new();

        live.watch_guarded(
            ListenerId::Surveys,
            surveys_target(),
            BTreeMap::new(),
            guard.clone(),
            |_| {},
            |_| {},
        )
        .unwrap();
        assert!(guard.is_open());

        assert!(live.registry().unregister(ListenerId::Surveys));
        assert!(!guard.is_open());
    }

    #[tokio::test]
    async fn test_permission_denied_is_surfaced() {
        let (store, live) = setup();
        store.inject_fault(
            StoreOperation::Read,
            paths::SURVEYS,
            StoreErrorCode::PermissionDenied,
        );
        let fatal = Arc::new(Mutex::new(None));

        let sink = Arc::clone(&fatal);
        live.watch(
            ListenerId::Surveys,
            surveys_target(),
            BTreeMap::new(),
            |_| {},
            move |err: AppError| *sink.lock().unwrap() = Some(err.error_code()),
        )
        .unwrap();

        assert_eq!(*fatal.lock().unwrap(), Some("STORE_READ_ERROR"));
        assert!(live.registry().is_active(ListenerId::Surveys));
    }
}

//! Listener registry.
//!
//! Tracks every live store subscription by a logical name. At most one
//! subscription per name is active; registering a name again cancels the
//! previous subscription first. Cancellation failures are logged and never
//! reach the caller, and the bookkeeping entry is removed regardless.
//!
//! The registry is constructed once at start-up and shared as an
//! `Arc<ListenerRegistry>`. [`ListenerRegistry::teardown`] is the reset point
//! used at sign-out.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use clubdesk_db::CancelFn;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Logical name of a live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListenerId {
    Auth,
    Teams,
    Surveys,
    Notifications,
    Messages,
    CashboxFines,
    CashboxPayments,
    CashboxRules,
    CashboxHistory,
    /// Live rate limit configuration. Belongs to neither scope.
    RateLimits,
}

impl ListenerId {
    /// Every listener name.
    pub const ALL: [Self; 10] = [
        Self::Auth,
        Self::Teams,
        Self::Surveys,
        Self::Notifications,
        Self::Messages,
        Self::CashboxFines,
        Self::CashboxPayments,
        Self::CashboxRules,
        Self::CashboxHistory,
        Self::RateLimits,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Teams => "teams",
            Self::Surveys => "surveys",
            Self::Notifications => "notifications",
            Self::Messages => "messages",
            Self::CashboxFines => "cashbox-fines",
            Self::CashboxPayments => "cashbox-payments",
            Self::CashboxRules => "cashbox-rules",
            Self::CashboxHistory => "cashbox-history",
            Self::RateLimits => "rate-limits",
        }
    }

    /// The teardown scope this listener belongs to, if any.
    #[must_use]
    pub const fn scope(self) -> Option<ListenerScope> {
        match self {
            Self::Auth | Self::Teams => Some(ListenerScope::User),
            Self::Surveys
            | Self::Notifications
            | Self::Messages
            | Self::CashboxFines
            | Self::CashboxPayments
            | Self::CashboxRules
            | Self::CashboxHistory => Some(ListenerScope::Team),
            Self::RateLimits => None,
        }
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Group of listeners torn down together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerScope {
    /// Listeners bound to the selected team.
    Team,
    /// Listeners bound to the signed-in user.
    User,
}

impl ListenerScope {
    /// Listener names covered by this scope.
    #[must_use]
    pub fn ids(self) -> Vec<ListenerId> {
        ListenerId::ALL
            .into_iter()
            .filter(|id| id.scope() == Some(self))
            .collect()
    }
}

/// One active subscription.
pub struct ListenerHandle {
    id: ListenerId,
    cancel: CancelFn,
    created_at: DateTime<Utc>,
    started: Instant,
    context: BTreeMap<String, Value>,
}

impl ListenerHandle {
    fn new(id: ListenerId, cancel: CancelFn, context: BTreeMap<String, Value>) -> Self {
        Self {
            id,
            cancel,
            created_at: Utc::now(),
            started: Instant::now(),
            context,
        }
    }

    /// Run the cancel function, absorbing errors and panics.
    fn cancel(self) {
        let id = self.id;
        match catch_unwind(AssertUnwindSafe(self.cancel)) {
            Ok(Ok(())) => debug!(listener = %id, "Listener cancelled"),
            Ok(Err(e)) => warn!(listener = %id, error = %e, "Listener cancel failed"),
            Err(_) => warn!(listener = %id, "Listener cancel panicked"),
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Diagnostic view of one active subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerDebugInfo {
    pub id: ListenerId,
    pub age_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub context: BTreeMap<String, Value>,
}

/// Registry of active subscriptions.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    handles: Mutex<HashMap<ListenerId, ListenerHandle>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ListenerId, ListenerHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `cancel` under `id`, cancelling any subscription already tracked there.
    pub fn register(&self, id: ListenerId, cancel: CancelFn, context: BTreeMap<String, Value>) {
        let previous = self.lock().remove(&id);
        if let Some(previous) = previous {
            debug!(listener = %id, "Replacing active listener");
            previous.cancel();
        }

        let displaced = self
            .lock()
            .insert(id, ListenerHandle::new(id, cancel, context));
        if let Some(displaced) = displaced {
            displaced.cancel();
        }
        debug!(listener = %id, "Listener registered");
    }

    /// Cancel and forget the subscription under `id`.
    ///
    /// Returns `false` when nothing was registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let Some(handle) = self.lock().remove(&id) else {
            return false;
        };
        handle.cancel();
        true
    }

    /// Cancel every tracked subscription.
    pub fn unregister_all(&self) {
        let handles: Vec<ListenerHandle> = self.lock().drain().map(|(_, h)| h).collect();
        let count = handles.len();
        for handle in handles {
            handle.cancel();
        }
        if count > 0 {
            info!(count, "All listeners unregistered");
        }
    }

    /// Cancel the active subscriptions of one scope, leaving the rest.
    ///
    /// Returns the number of cancelled subscriptions.
    pub fn unregister_by_scope(&self, scope: ListenerScope) -> usize {
        let removed = scope
            .ids()
            .into_iter()
            .filter(|id| self.unregister(*id))
            .count();
        debug!(?scope, removed, "Scoped listeners unregistered");
        removed
    }

    #[must_use]
    pub fn is_active(&self, id: ListenerId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Names of the active subscriptions, sorted.
    #[must_use]
    pub fn active_listeners(&self) -> Vec<ListenerId> {
        let mut ids: Vec<ListenerId> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn debug_info(&self) -> Vec<ListenerDebugInfo> {
        let handles = self.lock();
        let mut info: Vec<ListenerDebugInfo> = handles
            .values()
            .map(|h| ListenerDebugInfo {
                id: h.id,
                age_seconds: h.started.elapsed().as_secs(),
                created_at: h.created_at,
                context: h.context.clone(),
            })
            .collect();
        info.sort_by_key(|i| i.id);
        info
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Sign-out reset: cancels everything and leaves an empty registry.
    pub fn teardown(&self) {
        self.unregister_all();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clubdesk_common::{StoreError, StoreErrorCode};
    use maplit::btreemap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_cancel(counter: &Arc<AtomicUsize>) -> CancelFn {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn noop() -> CancelFn {
        Box::new(|| Ok(()))
    }

    #[test]
    fn test_reregister_cancels_previous_once() {
        let registry = ListenerRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        registry.register(ListenerId::Surveys, counting_cancel(&first), BTreeMap::new());
        registry.register(ListenerId::Surveys, counting_cancel(&second), BTreeMap::new());

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        assert!(registry.is_active(ListenerId::Surveys));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_unregister_absorbs_cancel_error() {
        let registry = ListenerRegistry::new();
        registry.register(
            ListenerId::Messages,
            Box::new(|| Err(StoreError::read(StoreErrorCode::Internal, "boom"))),
            BTreeMap::new(),
        );

        assert!(registry.unregister(ListenerId::Messages));
        assert!(!registry.is_active(ListenerId::Messages));
    }

    #[test]
    fn test_unregister_absorbs_cancel_panic() {
        let registry = ListenerRegistry::new();
        registry.register(
            ListenerId::Auth,
            Box::new(|| panic!("listener already gone")),
            BTreeMap::new(),
        );
        registry.register(ListenerId::Teams, noop(), BTreeMap::new());

        registry.unregister_all();
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_unregister_missing_returns_false() {
        let registry = ListenerRegistry::new();
        assert!(!registry.unregister(ListenerId::CashboxRules));
        registry.unregister_all();
        assert_eq!(registry.count(), 0);
    }

    fn register_mixed(registry: &ListenerRegistry) {
        for id in [
            ListenerId::Surveys,
            ListenerId::Notifications,
            ListenerId::Messages,
            ListenerId::CashboxFines,
            ListenerId::Auth,
            ListenerId::Teams,
        ] {
            registry.register(id, noop(), BTreeMap::new());
        }
    }

    #[test]
    fn test_team_scope_teardown() {
        let registry = ListenerRegistry::new();
        register_mixed(&registry);

        assert_eq!(registry.unregister_by_scope(ListenerScope::Team), 4);
        assert_eq!(
            registry.active_listeners(),
            vec![ListenerId::Auth, ListenerId::Teams]
        );
    }

    #[test]
    fn test_user_scope_teardown() {
        let registry = ListenerRegistry::new();
        register_mixed(&registry);

        assert_eq!(registry.unregister_by_scope(ListenerScope::User), 2);
        assert_eq!(
            registry.active_listeners(),
            vec![
                ListenerId::Surveys,
                ListenerId::Notifications,
                ListenerId::Messages,
                ListenerId::CashboxFines,
            ]
        );
    }

    #[test]
    fn test_rate_limits_outside_scopes() {
        let registry = ListenerRegistry::new();
        registry.register(ListenerId::RateLimits, noop(), BTreeMap::new());
        registry.unregister_by_scope(ListenerScope::Team);
        registry.unregister_by_scope(ListenerScope::User);
        assert!(registry.is_active(ListenerId::RateLimits));

        registry.teardown();
        assert!(!registry.is_active(ListenerId::RateLimits));
    }

    #[test]
    fn test_debug_info() {
        let registry = ListenerRegistry::new();
        registry.register(
            ListenerId::Surveys,
            noop(),
            btreemap! { "teamId".to_string() => Value::from("t1") },
        );

        let info = registry.debug_info();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].id, ListenerId::Surveys);
        assert_eq!(info[0].context["teamId"], "t1");
        assert_eq!(ListenerId::CashboxFines.to_string(), "cashbox-fines");
    }
}

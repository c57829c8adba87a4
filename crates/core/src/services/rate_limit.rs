//! Usage-counter rate limiting.
//!
//! A gated write first checks the caller's usage counter against the limit
//! of its category, runs, and only then increments the counter in a
//! detached task. Check and increment are separate round trips, so two
//! near-simultaneous requests can both pass the check; the limit is soft.
//!
//! Limits live in `config/rateLimits` and are streamed so operators can
//! tune them without a restart. Missing or invalid values fall back to the
//! configured defaults.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use clubdesk_common::{AppError, AppResult, RateLimitDefaults};
use clubdesk_db::{
    Document, DocumentStore, Fields, Snapshot, SubscriptionTarget,
    entities::UsageScope,
    paths,
    repositories::{SettingsRepository, UsageRepository},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use validator::Validate;

use super::audit::AuditLogger;
use super::live::LiveSubscriptions;
use super::registry::ListenerId;
use super::session::Session;
use super::tasks::spawn_detached;

/// A gated operation kind with its own counter and limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UsageCategory {
    TeamCreation,
    Messages,
    JoinRequests,
    Surveys,
    Fines,
}

/// Whose counter a category uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    User,
    Team,
}

impl UsageCategory {
    pub const ALL: [Self; 5] = [
        Self::TeamCreation,
        Self::Messages,
        Self::JoinRequests,
        Self::Surveys,
        Self::Fines,
    ];

    /// Counter and limit field name.
    #[must_use]
    pub const fn field(self) -> &'static str {
        match self {
            Self::TeamCreation => "teamCreation",
            Self::Messages => "messages",
            Self::JoinRequests => "joinRequests",
            Self::Surveys => "surveys",
            Self::Fines => "fines",
        }
    }

    #[must_use]
    pub const fn scope_kind(self) -> ScopeKind {
        match self {
            Self::TeamCreation | Self::JoinRequests => ScopeKind::User,
            Self::Messages | Self::Surveys | Self::Fines => ScopeKind::Team,
        }
    }

    const fn default_limit(self, defaults: &RateLimitDefaults) -> i64 {
        match self {
            Self::TeamCreation => defaults.team_creation,
            Self::Messages => defaults.messages,
            Self::JoinRequests => defaults.join_requests,
            Self::Surveys => defaults.surveys,
            Self::Fines => defaults.fines,
        }
    }
}

impl fmt::Display for UsageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

/// Effective limit per category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimits(BTreeMap<UsageCategory, i64>);

impl RateLimits {
    #[must_use]
    pub fn from_defaults(defaults: &RateLimitDefaults) -> Self {
        Self(
            UsageCategory::ALL
                .into_iter()
                .map(|c| (c, c.default_limit(defaults)))
                .collect(),
        )
    }

    /// Overlay the stored limits document on the defaults.
    ///
    /// Values that are not positive integers are ignored.
    #[must_use]
    pub fn from_document(doc: Option<&Document>, defaults: &RateLimitDefaults) -> Self {
        let mut limits = Self::from_defaults(defaults);
        let Some(doc) = doc else {
            return limits;
        };
        for category in UsageCategory::ALL {
            let Some(value) = doc.get(category.field()) else {
                continue;
            };
            match value.as_i64() {
                Some(limit) if limit > 0 => {
                    limits.0.insert(category, limit);
                }
                _ => warn!(
                    %category,
                    value = %value,
                    "Ignoring invalid stored limit, using default"
                ),
            }
        }
        limits
    }

    /// Limit of `category`.
    #[must_use]
    pub fn get(&self, category: UsageCategory) -> i64 {
        self.0.get(&category).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<UsageCategory, i64> {
        &self.0
    }
}

/// Outcome of [`RateLimiter::check_limit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitCheck {
    pub allowed: bool,
    pub current: i64,
    pub limit: i64,
}

/// Operator update of the live limits. Absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitUpdate {
    #[validate(range(min = 1, message = "Limit must be a positive number"))]
    pub team_creation: Option<i64>,
    #[validate(range(min = 1, message = "Limit must be a positive number"))]
    pub messages: Option<i64>,
    #[validate(range(min = 1, message = "Limit must be a positive number"))]
    pub join_requests: Option<i64>,
    #[validate(range(min = 1, message = "Limit must be a positive number"))]
    pub surveys: Option<i64>,
    #[validate(range(min = 1, message = "Limit must be a positive number"))]
    pub fines: Option<i64>,
}

impl RateLimitUpdate {
    /// The given values, by category.
    #[must_use]
    pub fn entries(&self) -> BTreeMap<UsageCategory, i64> {
        [
            (UsageCategory::TeamCreation, self.team_creation),
            (UsageCategory::Messages, self.messages),
            (UsageCategory::JoinRequests, self.join_requests),
            (UsageCategory::Surveys, self.surveys),
            (UsageCategory::Fines, self.fines),
        ]
        .into_iter()
        .filter_map(|(c, v)| v.map(|v| (c, v)))
        .collect()
    }
}

/// Reject a new pending request once `max` are outstanding.
pub fn ensure_pending_quota(pending: usize, max: usize) -> AppResult<()> {
    if pending >= max {
        return Err(AppError::Validation(format!(
            "You already have {pending} pending requests (maximum {max})"
        )));
    }
    Ok(())
}

/// Usage-counter rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    usage: UsageRepository,
    settings: SettingsRepository,
    session: Arc<dyn Session>,
    audit: AuditLogger,
    defaults: RateLimitDefaults,
    limits: Arc<RwLock<RateLimits>>,
}

impl RateLimiter {
    /// Create a rate limiter starting from `defaults`.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        session: Arc<dyn Session>,
        defaults: RateLimitDefaults,
    ) -> Self {
        Self {
            usage: UsageRepository::new(Arc::clone(&store)),
            settings: SettingsRepository::new(Arc::clone(&store)),
            audit: AuditLogger::new(store),
            session,
            limits: Arc::new(RwLock::new(RateLimits::from_defaults(&defaults))),
            defaults,
        }
    }

    /// Configured default limit per category.
    #[must_use]
    pub fn get_defaults(&self) -> BTreeMap<UsageCategory, i64> {
        RateLimits::from_defaults(&self.defaults).0
    }

    /// Limits currently in effect.
    #[must_use]
    pub fn limits(&self) -> RateLimits {
        self.limits
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_limits(&self, limits: RateLimits) {
        *self.limits.write().unwrap_or_else(PoisonError::into_inner) = limits;
    }

    fn scope_for(&self, category: UsageCategory) -> AppResult<UsageScope> {
        match category.scope_kind() {
            ScopeKind::User => self.session.require_user().map(UsageScope::User),
            ScopeKind::Team => self.session.require_team().map(UsageScope::Team),
        }
    }

    /// Compare the caller's counter for `category` with its limit.
    pub async fn check_limit(&self, category: UsageCategory) -> AppResult<LimitCheck> {
        let scope = self.scope_for(category)?;
        let current = self.usage.get_count(&scope, category.field()).await?;
        let limit = self.limits().get(category);
        let check = LimitCheck {
            allowed: current < limit,
            current,
            limit,
        };
        debug!(%category, %scope, current, limit, allowed = check.allowed, "Rate limit checked");
        Ok(check)
    }

    /// Like [`Self::check_limit`], but a denial is an error.
    pub async fn ensure_allowed(&self, category: UsageCategory) -> AppResult<LimitCheck> {
        let check = self.check_limit(category).await?;
        if !check.allowed {
            info!(%category, current = check.current, limit = check.limit, "Rate limit reached");
            return Err(AppError::RateLimited {
                category: category.field().to_string(),
                current: check.current,
                limit: check.limit,
            });
        }
        Ok(check)
    }

    /// Count one use of `category` in the background.
    ///
    /// Call only after the gated write succeeded. A failing increment is
    /// logged and never reaches the caller.
    pub fn increment_usage(&self, category: UsageCategory) -> JoinHandle<()> {
        let scope = self.scope_for(category);
        let usage = self.usage.clone();
        spawn_detached("usage_increment", async move {
            let scope = scope?;
            usage.increment(&scope, category.field(), 1).await?;
            debug!(%category, %scope, "Usage incremented");
            Ok(())
        })
    }

    /// Check, run `op`, then count it. `op` does not run when denied.
    pub async fn run_gated<T, F, Fut>(&self, category: UsageCategory, op: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let (value, _increment) = self.run_gated_tracked(category, op).await?;
        Ok(value)
    }

    /// Like [`Self::run_gated`], also returning the handle of the detached
    /// increment.
    pub async fn run_gated_tracked<T, F, Fut>(
        &self,
        category: UsageCategory,
        op: F,
    ) -> AppResult<(T, JoinHandle<()>)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        self.ensure_allowed(category).await?;
        let value = op().await?;
        Ok((value, self.increment_usage(category)))
    }

    /// Read the stored limits once and put them into effect.
    pub async fn load_limits(&self) -> AppResult<RateLimits> {
        let doc = self.settings.get_rate_limits().await?;
        let limits = RateLimits::from_document(doc.as_ref(), &self.defaults);
        self.replace_limits(limits.clone());
        Ok(limits)
    }

    /// Validate and store new limits.
    ///
    /// Validation runs before any store call; a non-positive value rejects
    /// the whole update.
    pub async fn update_limits(&self, update: RateLimitUpdate) -> AppResult<RateLimits> {
        update.validate()?;
        let entries = update.entries();
        if entries.is_empty() {
            return Err(AppError::Validation("No limits given".to_string()));
        }

        let fields = entries
            .iter()
            .fold(Fields::new(), |f, (c, v)| f.set(c.field(), *v));
        self.settings.merge_rate_limits(fields).await?;

        let mut limits = self.limits();
        for (category, value) in &entries {
            limits.0.insert(*category, *value);
        }
        self.replace_limits(limits.clone());

        info!(?entries, "Rate limits updated");
        self.audit.record(
            "rateLimits.updated",
            self.session.user_uid(),
            paths::rate_limits().as_str(),
            Value::Object(
                entries
                    .iter()
                    .map(|(c, v)| (c.field().to_string(), Value::from(*v)))
                    .collect(),
            ),
        );
        Ok(limits)
    }

    /// Stream the limits document into the limits in effect.
    pub fn watch_limits(&self, live: &LiveSubscriptions) -> AppResult<()> {
        let limits = Arc::clone(&self.limits);
        let defaults = self.defaults.clone();
        live.watch(
            ListenerId::RateLimits,
            SubscriptionTarget::Document(paths::rate_limits()),
            BTreeMap::from([("path".to_string(), Value::from(paths::rate_limits().as_str()))]),
            move |snapshot| {
                if let Snapshot::Document { data, .. } = snapshot {
                    let next = RateLimits::from_document(data.as_ref(), &defaults);
                    debug!(limits = ?next, "Live rate limits received");
                    *limits.write().unwrap_or_else(PoisonError::into_inner) = next;
                }
            },
            |e| error!(error = %e, "Rate limit listener lost permission, keeping last limits"),
        )
    }
}

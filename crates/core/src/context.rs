//! Service wiring.

use std::sync::Arc;

use clubdesk_common::{AppResult, Config};
use clubdesk_db::DocumentStore;
use tracing::info;

use crate::services::{
    LiveSubscriptions, ListenerRegistry, MigrationEngine, RateLimiter, RateLimits, Session,
    SurveyService, VerificationEngine, VoteStorage, VoteStorageFlags,
};

/// Every service of one client, built once at start-up.
#[derive(Clone)]
pub struct AppContext {
    /// Live listeners of this client.
    pub registry: Arc<ListenerRegistry>,
    /// Vote storage flags, flipped at runtime.
    pub flags: Arc<VoteStorageFlags>,
    /// Subscription helper bound to the registry.
    pub live: LiveSubscriptions,
    /// Usage gate for team and user writes.
    pub rate_limiter: RateLimiter,
    /// Vote reads and writes in the active layout.
    pub vote_storage: VoteStorage,
    /// Survey workflow.
    pub surveys: SurveyService,
    /// Operator-triggered vote migration.
    pub migration: MigrationEngine,
    /// Read-only layout comparison.
    pub verification: VerificationEngine,
}

impl AppContext {
    /// Wire the services on top of `store`.
    #[must_use]
    pub fn new(config: &Config, store: Arc<dyn DocumentStore>, session: Arc<dyn Session>) -> Self {
        let registry = Arc::new(ListenerRegistry::new());
        let flags = Arc::new(VoteStorageFlags::from_config(&config.vote_storage));
        let live = LiveSubscriptions::new(Arc::clone(&store), Arc::clone(&registry));
        let rate_limiter = RateLimiter::new(
            Arc::clone(&store),
            Arc::clone(&session),
            config.rate_limits.clone(),
        );
        let vote_storage = VoteStorage::new(Arc::clone(&store), Arc::clone(&flags));
        let surveys = SurveyService::new(
            Arc::clone(&store),
            session,
            rate_limiter.clone(),
            vote_storage.clone(),
            live.clone(),
            config.retry.clone(),
        );

        Self {
            migration: MigrationEngine::new(Arc::clone(&store), config.migration.clone()),
            verification: VerificationEngine::new(store),
            registry,
            flags,
            live,
            rate_limiter,
            vote_storage,
            surveys,
        }
    }

    /// Put the stored rate limits into effect and keep them streaming.
    ///
    /// Run once after [`AppContext::new`] and before the first gated write.
    pub async fn start(&self) -> AppResult<RateLimits> {
        let limits = self.rate_limiter.load_limits().await?;
        self.rate_limiter.watch_limits(&self.live)?;
        info!(limits = ?limits.as_map(), "Client started");
        Ok(limits)
    }

    /// Cancel every live subscription. Called on sign-out.
    pub fn sign_out(&self) {
        self.registry.teardown();
    }
}

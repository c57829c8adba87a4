//! Survey service.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use clubdesk_common::{AppError, AppResult, IdGenerator, RetryConfig};
use clubdesk_db::{
    DocumentStore, Filter, Query, Snapshot, SubscriptionTarget,
    entities::{Survey, SurveyStatus, Vote},
    paths,
    repositories::{SurveyRepository, VoteRepository, survey::parse_surveys},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::runtime::Handle;
use tracing::{debug, info};
use validator::Validate;

use super::audit::AuditLogger;
use super::live::{FeedGuard, LiveSubscriptions};
use super::rate_limit::{RateLimiter, UsageCategory};
use super::registry::ListenerId;
use super::retry::with_retry;
use super::session::Session;
use super::vote_storage::{VoteStorage, VoteWriteOutcome};

/// Input for creating a survey.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateSurveyInput {
    #[validate(length(min = 1, max = 200, message = "Title must be 1 to 200 characters"))]
    pub title: String,
}

/// Survey service for business logic.
#[derive(Clone)]
pub struct SurveyService {
    surveys: SurveyRepository,
    votes: VoteRepository,
    vote_storage: VoteStorage,
    rate_limiter: RateLimiter,
    live: LiveSubscriptions,
    session: Arc<dyn Session>,
    audit: AuditLogger,
    retry: RetryConfig,
    id_gen: IdGenerator,
}

impl SurveyService {
    /// Create a new survey service.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        session: Arc<dyn Session>,
        rate_limiter: RateLimiter,
        vote_storage: VoteStorage,
        live: LiveSubscriptions,
        retry: RetryConfig,
    ) -> Self {
        Self {
            surveys: SurveyRepository::new(Arc::clone(&store)),
            votes: VoteRepository::new(Arc::clone(&store)),
            audit: AuditLogger::new(store),
            vote_storage,
            rate_limiter,
            live,
            session,
            retry,
            id_gen: IdGenerator::new(),
        }
    }

    /// Create a survey in the selected team.
    ///
    /// Gated by the `surveys` limit; transient write failures are retried.
    pub async fn create_survey(&self, input: CreateSurveyInput) -> AppResult<Survey> {
        input.validate()?;
        if input.title.trim().is_empty() {
            return Err(AppError::Validation("Title cannot be blank".to_string()));
        }
        let user_uid = self.session.require_user()?;
        let team_id = self.session.require_team()?;

        let mut survey = Survey::new(self.id_gen.generate(), team_id, input.title.trim());
        survey.created_by = Some(user_uid.clone());

        let (surveys, retry, new_survey) = (&self.surveys, &self.retry, &survey);
        self.rate_limiter
            .run_gated(UsageCategory::Surveys, move || {
                with_retry(retry, "create_survey", move || surveys.create(new_survey))
            })
            .await?;

        info!(survey_id = %survey.id, team_id = %survey.team_id, "Survey created");
        self.audit.record(
            "survey.created",
            Some(user_uid),
            paths::survey(&survey.id).as_str(),
            json!({ "teamId": survey.team_id, "title": survey.title }),
        );
        Ok(survey)
    }

    /// A survey with its votes in the active layout.
    pub async fn get_survey(&self, survey_id: &str) -> AppResult<Survey> {
        let survey = self.surveys.get_by_id(survey_id).await?;
        Ok(self.vote_storage.hydrate_one(survey).await)
    }

    /// Surveys of a team with their votes in the active layout.
    pub async fn list_team_surveys(&self, team_id: &str) -> AppResult<Vec<Survey>> {
        let surveys = self.surveys.find_by_team(team_id).await?;
        Ok(self.vote_storage.hydrate(surveys).await)
    }

    /// Stream the surveys of a team.
    ///
    /// Replaces any survey feed already open. With sub-collection reads
    /// enabled every snapshot is hydrated on the runtime before delivery;
    /// nothing is delivered once the feed is cancelled, and a hydration that
    /// finishes after a newer snapshot was delivered is dropped.
    pub fn watch_team_surveys<D, E>(&self, team_id: &str, on_surveys: D, on_fatal: E) -> AppResult<()>
    where
        D: Fn(Vec<Survey>) + Send + Sync + 'static,
        E: Fn(AppError) + Send + Sync + 'static,
    {
        let runtime = Handle::try_current()
            .map_err(|e| AppError::Internal(format!("Live surveys need a runtime: {e}")))?;
        let storage = self.vote_storage.clone();
        let on_surveys = Arc::new(on_surveys);
        let guard = FeedGuard::new();
        let feed = guard.clone();

        self.live.watch_guarded(
            ListenerId::Surveys,
            SubscriptionTarget::Query(
                Query::collection(paths::surveys()).filter(Filter::eq("teamId", team_id)),
            ),
            BTreeMap::from([("teamId".to_string(), Value::from(team_id))]),
            guard,
            move |snapshot| {
                let Snapshot::Query(docs) = snapshot else {
                    return;
                };
                let sequence = feed.next_sequence();
                let surveys = parse_surveys(&docs);
                if storage.flags().use_subcollection() {
                    let storage = storage.clone();
                    let on_surveys = Arc::clone(&on_surveys);
                    let feed = feed.clone();
                    runtime.spawn(async move {
                        let hydrated = storage.hydrate(surveys).await;
                        if feed.claim(sequence) {
                            on_surveys(hydrated);
                        } else {
                            debug!(sequence, "Dropped stale survey snapshot");
                        }
                    });
                } else if feed.claim(sequence) {
                    on_surveys(surveys);
                }
            },
            on_fatal,
        )
    }

    /// Cast or change the signed-in user's vote.
    pub async fn cast_vote(&self, survey_id: &str, vote: bool) -> AppResult<VoteWriteOutcome> {
        let user_uid = self.session.require_user()?;
        let survey = self.get_survey(survey_id).await?;
        if survey.status != SurveyStatus::Active {
            return Err(AppError::BadRequest(
                "Survey is no longer open for votes".to_string(),
            ));
        }
        self.vote_storage
            .add_or_update_vote(survey_id, &user_uid, vote, &survey.votes)
            .await
    }

    /// Stop accepting votes; the survey then waits for verification.
    pub async fn close_voting(&self, survey_id: &str) -> AppResult<()> {
        let actor = self.session.require_user()?;
        let survey = self.surveys.get_by_id(survey_id).await?;
        if survey.status != SurveyStatus::Active {
            return Err(AppError::BadRequest("Survey is not open for votes".to_string()));
        }

        let (surveys, retry) = (&self.surveys, &self.retry);
        with_retry(retry, "close_voting", move || {
            surveys.update_status(survey_id, SurveyStatus::AwaitingVerification)
        })
        .await?;

        info!(survey_id, "Survey voting closed");
        self.audit.record(
            "survey.votingClosed",
            Some(actor),
            paths::survey(survey_id).as_str(),
            Value::Null,
        );
        Ok(())
    }

    /// Close a survey with the attendance confirmed by a power user.
    ///
    /// Both vote layouts are rewritten to `final_votes`.
    pub async fn verify_survey(&self, survey_id: &str, final_votes: &[Vote]) -> AppResult<Survey> {
        let verified_by = self.session.require_user()?;
        self.surveys.get_by_id(survey_id).await?;

        let fields =
            SurveyRepository::verification_fields(final_votes, &verified_by, Utc::now())?;
        self.vote_storage
            .replace_votes(survey_id, final_votes, fields)
            .await?;

        info!(survey_id, verified_by = %verified_by, "Survey verified");
        self.audit.record(
            "survey.verified",
            Some(verified_by),
            paths::survey(survey_id).as_str(),
            json!({ "votes": final_votes.len() }),
        );
        self.get_survey(survey_id).await
    }

    /// Delete a survey and its vote sub-collection. Never retried.
    pub async fn delete_survey(&self, survey_id: &str) -> AppResult<()> {
        let actor = self.session.require_user()?;
        self.surveys.get_by_id(survey_id).await?;

        let deleted_votes = self.votes.delete_all(survey_id).await?;
        self.surveys.delete(survey_id).await?;

        info!(survey_id, deleted_votes, "Survey deleted");
        self.audit.record(
            "survey.deleted",
            Some(actor),
            paths::survey(survey_id).as_str(),
            json!({ "deletedVotes": deleted_votes }),
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::flags::VoteStorageFlags;
    use crate::services::registry::ListenerRegistry;
    use crate::services::session::SessionState;
    use clubdesk_common::{RateLimitDefaults, StoreErrorCode, StoreOperation};
    use clubdesk_db::entities::UsageScope;
    use clubdesk_db::test_utils::{TestStore, votes};

    struct Fixture {
        t: TestStore,
        session: Arc<SessionState>,
        flags: Arc<VoteStorageFlags>,
        service: SurveyService,
    }

    fn fixture(use_subcollection: bool) -> Fixture {
        let t = TestStore::new();
        let session = Arc::new(SessionState::signed_in("u1", "t1"));
        let flags = Arc::new(VoteStorageFlags::new(use_subcollection, false));
        let store = t.handle();
        let service = SurveyService::new(
            Arc::clone(&store),
            session.clone(),
            RateLimiter::new(Arc::clone(&store), session.clone(), RateLimitDefaults::default()),
            VoteStorage::new(Arc::clone(&store), Arc::clone(&flags)),
            LiveSubscriptions::new(Arc::clone(&store), Arc::new(ListenerRegistry::new())),
            RetryConfig {
                max_retries: 2,
                initial_delay_ms: 1,
                max_delay_ms: 5,
                multiplier: 2.0,
            },
        );
        Fixture {
            t,
            session,
            flags,
            service,
        }
    }

    fn title(title: &str) -> CreateSurveyInput {
        CreateSurveyInput {
            title: title.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_survey() {
        let f = fixture(false);
        let survey = f.service.create_survey(title("Training")).await.unwrap();

        let stored = f.service.get_survey(&survey.id).await.unwrap();
        assert_eq!(stored.team_id, "t1");
        assert_eq!(stored.status, SurveyStatus::Active);
        assert_eq!(stored.created_by.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_create_survey_rejects_blank_title() {
        let f = fixture(false);
        assert!(matches!(
            f.service.create_survey(title("")).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            f.service.create_survey(title("   ")).await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(f.t.store.stats().writes, 0);
    }

    #[tokio::test]
    async fn test_create_survey_is_rate_limited() {
        let f = fixture(false);
        f.t.put(
            &paths::usage_counters(&UsageScope::Team("t1".to_string())),
            json!({ "surveys": 10 }),
        );

        let result = f.service.create_survey(title("One too many")).await;

        assert!(matches!(result, Err(AppError::RateLimited { .. })));
        assert!(f.t.store.peek_collection(&paths::surveys()).is_empty());
    }

    #[tokio::test]
    async fn test_create_survey_retries_transient_failure() {
        let f = fixture(false);
        f.t.store.inject_fault_times(
            StoreOperation::Write,
            paths::SURVEYS,
            StoreErrorCode::Unavailable,
            1,
        );

        let survey = f.service.create_survey(title("Match")).await.unwrap();
        assert!(f.t.survey_doc(&survey.id).is_some());
    }

    #[tokio::test]
    async fn test_cast_vote_on_closed_survey() {
        let f = fixture(false);
        f.t.put(
            &paths::survey("s1"),
            json!({ "teamId": "t1", "status": "CLOSED", "votes": [] }),
        );

        assert!(matches!(
            f.service.cast_vote("s1", true).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_close_voting_awaits_verification() {
        let f = fixture(false);
        f.t.seed_survey("s1", "t1", &votes(&[("u2", true)]));

        f.service.close_voting("s1").await.unwrap();

        let survey = f.service.get_survey("s1").await.unwrap();
        assert_eq!(survey.status, SurveyStatus::AwaitingVerification);
        assert!(matches!(
            f.service.cast_vote("s1", false).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            f.service.close_voting("s1").await,
            Err(AppError::BadRequest(_))
        ));

        f.service
            .verify_survey("s1", &votes(&[("u2", true)]))
            .await
            .unwrap();
        assert!(f.service.get_survey("s1").await.unwrap().is_finalized());
    }

    #[tokio::test]
    async fn test_list_team_surveys_overlays_subcollection() {
        let f = fixture(true);
        f.t.seed_survey("s1", "t1", &votes(&[("u1", true)]));
        f.t.seed_subcollection_votes("s1", &votes(&[("u1", false), ("u2", true)]));
        f.t.seed_survey("s2", "t2", &[]);

        let surveys = f.service.list_team_surveys("t1").await.unwrap();

        assert_eq!(surveys.len(), 1);
        assert_eq!(surveys[0].votes, votes(&[("u1", false), ("u2", true)]));
    }

    #[tokio::test]
    async fn test_watch_team_surveys_hydrates() {
        let f = fixture(true);
        f.t.seed_survey("s1", "t1", &[]);
        f.t.seed_subcollection_votes("s1", &votes(&[("u2", true)]));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        f.service
            .watch_team_surveys(
                "t1",
                move |surveys| {
                    let _ = tx.send(surveys);
                },
                |_| {},
            )
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].votes, votes(&[("u2", true)]));

        f.flags.set_use_subcollection(false);
        f.t.seed_survey("s2", "t1", &[]);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn test_watch_team_surveys_silent_after_unregister() {
        let f = fixture(true);
        f.t.seed_survey("s1", "t1", &[]);
        let delivered = Arc::new(std::sync::Mutex::new(Vec::new()));

        let sink = Arc::clone(&delivered);
        f.service
            .watch_team_surveys(
                "t1",
                move |surveys: Vec<Survey>| sink.lock().unwrap().push(surveys.len()),
                |_| {},
            )
            .unwrap();
        let registry = f.service.live.registry();
        assert!(registry.unregister(ListenerId::Surveys));
        assert!(!registry.is_active(ListenerId::Surveys));

        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        f.t.seed_survey("s2", "t1", &[]);
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert!(delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watch_team_surveys_replaced_feed_goes_quiet() {
        let f = fixture(true);
        f.t.seed_survey("s1", "t1", &[]);
        f.t.seed_survey("s2", "t2", &[]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let old_tx = tx.clone();
        f.service
            .watch_team_surveys(
                "t1",
                move |surveys: Vec<Survey>| {
                    let _ = old_tx.send(("t1", surveys));
                },
                |_| {},
            )
            .unwrap();
        f.service
            .watch_team_surveys(
                "t2",
                move |surveys: Vec<Survey>| {
                    let _ = tx.send(("t2", surveys));
                },
                |_| {},
            )
            .unwrap();

        let (team, surveys) = rx.recv().await.unwrap();
        assert_eq!(team, "t2");
        assert_eq!(surveys[0].id, "s2");
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_verify_survey_rewrites_both_layouts() {
        let f = fixture(true);
        f.t.seed_survey("s1", "t1", &votes(&[("u1", true), ("u2", true)]));
        f.t.seed_subcollection_votes("s1", &votes(&[("u1", true), ("u2", true), ("u3", false)]));
        f.session.sign_in("coach");

        let survey = f
            .service
            .verify_survey("s1", &votes(&[("u1", true), ("u2", false)]))
            .await
            .unwrap();

        assert!(survey.is_finalized());
        assert_eq!(survey.verified_by.as_deref(), Some("coach"));
        assert_eq!(survey.votes, votes(&[("u1", true), ("u2", false)]));
        assert_eq!(
            f.t.subcollection_votes("s1"),
            votes(&[("u1", true), ("u2", false)])
        );
    }

    #[tokio::test]
    async fn test_delete_survey_cascades() {
        let f = fixture(true);
        f.t.seed_survey("s1", "t1", &[]);
        let many: Vec<Vote> = (0..700).map(|i| Vote::new(format!("u{i}"), true)).collect();
        f.t.seed_subcollection_votes("s1", &many);

        f.service.delete_survey("s1").await.unwrap();

        assert!(f.t.survey_doc("s1").is_none());
        assert!(f.t.subcollection_votes("s1").is_empty());
        assert_eq!(f.t.store.stats().batches, 2);
    }

    #[tokio::test]
    async fn test_delete_is_not_retried() {
        let f = fixture(false);
        f.t.seed_survey("s1", "t1", &[]);
        f.t.store.inject_fault_times(
            StoreOperation::Delete,
            paths::SURVEYS,
            StoreErrorCode::Unavailable,
            1,
        );

        let err = f.service.delete_survey("s1").await.unwrap_err();

        assert!(!err.is_retryable());
        assert!(f.t.survey_doc("s1").is_some());
    }
}

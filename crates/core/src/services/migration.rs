//! Vote migration engine.
//!
//! Copies the embedded vote arrays of every survey into the per-voter
//! sub-collection. Every write is an upsert keyed by the voter, so the run
//! can be repeated at any time and always converges on the same state.
//! Batches stay below the store's per-batch ceiling and are paced to stay
//! under its sustained write quota.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clubdesk_common::{AppResult, IdGenerator, MigrationConfig};
use clubdesk_db::{
    DocumentStore, SetOptions, StoredDocument, WriteBatch, entities::survey::embedded_votes, paths,
    repositories::SurveyRepository,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::vote_storage::dedupe_votes;

/// A survey that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyError {
    pub survey_id: String,
    pub error: String,
}

/// Summary of one migration run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    pub run_id: String,
    pub total_surveys: usize,
    pub surveys_skipped: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_votes_migrated: usize,
    pub batches_committed: usize,
    pub errors: Vec<SurveyError>,
    /// Set when the run aborted before the per-survey loop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal_error: Option<String>,
    #[serde(serialize_with = "serialize_millis", rename = "durationMs")]
    pub duration: Duration,
}

impl MigrationResult {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            total_surveys: 0,
            surveys_skipped: 0,
            success_count: 0,
            failure_count: 0,
            total_votes_migrated: 0,
            batches_committed: 0,
            errors: Vec::new(),
            fatal_error: None,
            duration: Duration::ZERO,
        }
    }

    /// No survey failed and the run was not aborted.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.failure_count == 0 && self.fatal_error.is_none()
    }
}

pub(crate) fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// One-time copy of embedded votes into the sub-collection.
#[derive(Clone)]
pub struct MigrationEngine {
    store: Arc<dyn DocumentStore>,
    surveys: SurveyRepository,
    config: MigrationConfig,
    id_gen: IdGenerator,
}

impl MigrationEngine {
    /// Create a new migration engine.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, config: MigrationConfig) -> Self {
        Self {
            surveys: SurveyRepository::new(Arc::clone(&store)),
            store,
            config,
            id_gen: IdGenerator::new(),
        }
    }

    /// Migrate every survey.
    ///
    /// Per-survey failures are collected and the run continues. Only a
    /// failing initial scan aborts it; the duration is recorded either way.
    pub async fn migrate_all_survey_votes(&self) -> MigrationResult {
        let started = Instant::now();
        let mut result = MigrationResult::new(self.id_gen.generate_run_id());
        info!(run_id = %result.run_id, "Vote migration started");

        match self.surveys.find_all_documents().await {
            Ok(docs) => {
                result.total_surveys = docs.len();
                for doc in &docs {
                    self.migrate_one(doc, &mut result).await;
                }
            }
            Err(e) => {
                error!(run_id = %result.run_id, error = %e, "Vote migration aborted");
                result.fatal_error = Some(e.to_string());
            }
        }

        result.duration = started.elapsed();
        info!(
            run_id = %result.run_id,
            total = result.total_surveys,
            skipped = result.surveys_skipped,
            succeeded = result.success_count,
            failed = result.failure_count,
            votes = result.total_votes_migrated,
            duration_ms = result.duration.as_millis() as u64,
            "Vote migration finished"
        );
        result
    }

    async fn migrate_one(&self, doc: &StoredDocument, result: &mut MigrationResult) {
        let survey_id = doc.id();
        match self.copy_votes(doc, result).await {
            Ok(0) => {
                debug!(survey_id, "No votes, skipping");
                result.surveys_skipped += 1;
            }
            Ok(count) => {
                debug!(survey_id, votes = count, "Survey migrated");
                result.success_count += 1;
                result.total_votes_migrated += count;
            }
            Err(e) => {
                warn!(survey_id, error = %e, "Survey migration failed");
                result.failure_count += 1;
                result.errors.push(SurveyError {
                    survey_id: survey_id.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// Upsert the votes of one survey, batch by batch. Returns the number of
    /// copied votes.
    async fn copy_votes(&self, doc: &StoredDocument, result: &mut MigrationResult) -> AppResult<usize> {
        let survey_id = doc.id();
        let votes = dedupe_votes(&embedded_votes(&doc.data)?);
        if votes.is_empty() {
            return Ok(0);
        }

        for chunk in votes.chunks(self.config.effective_batch_size()) {
            let mut batch = WriteBatch::new();
            for vote in chunk {
                batch.set(
                    paths::survey_vote(survey_id, &vote.user_uid),
                    vote.subdocument_fields(),
                    SetOptions::merge(),
                );
            }
            self.store.commit(batch).await?;
            result.batches_committed += 1;

            let pause = self.config.pause_after(result.batches_committed);
            debug!(
                survey_id,
                batch = result.batches_committed,
                size = chunk.len(),
                pause_ms = pause.as_millis() as u64,
                "Batch committed"
            );
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
        Ok(votes.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clubdesk_common::{StoreErrorCode, StoreOperation};
    use clubdesk_db::entities::Vote;
    use clubdesk_db::test_utils::{TestStore, votes};
    use serde_json::json;

    fn engine(t: &TestStore) -> MigrationEngine {
        MigrationEngine::new(t.handle(), MigrationConfig::unpaced())
    }

    fn many_votes(n: usize) -> Vec<Vote> {
        (0..n).map(|i| Vote::new(format!("u{i:04}"), i % 3 == 0)).collect()
    }

    #[tokio::test]
    async fn test_empty_survey_is_skipped() {
        let t = TestStore::new();
        t.seed_survey("s1", "t1", &[]);
        t.seed_survey("s2", "t1", &votes(&[("u1", true), ("u2", false)]));

        let result = engine(&t).migrate_all_survey_votes().await;

        assert_eq!(result.total_surveys, 2);
        assert_eq!(result.surveys_skipped, 1);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.total_votes_migrated, 2);
        assert!(t.subcollection_votes("s1").is_empty());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let t = TestStore::new();
        t.seed_survey("s1", "t1", &votes(&[("u1", true), ("u2", false)]));
        t.seed_survey("s2", "t1", &votes(&[("u3", true)]));
        let engine = engine(&t);

        let first = engine.migrate_all_survey_votes().await;
        let after_first = (t.subcollection_votes("s1"), t.subcollection_votes("s2"));
        let second = engine.migrate_all_survey_votes().await;
        let after_second = (t.subcollection_votes("s1"), t.subcollection_votes("s2"));

        assert_eq!(after_first, after_second);
        assert_eq!(after_second.0, votes(&[("u1", true), ("u2", false)]));
        assert_eq!(first.success_count, 2);
        assert_eq!(second.success_count, 2);
        assert_eq!(second.failure_count, 0);
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_batches_stay_below_ceiling() {
        let t = TestStore::new();
        t.seed_survey("s1", "t1", &many_votes(1200));

        let result = engine(&t).migrate_all_survey_votes().await;

        assert_eq!(result.batches_committed, 3);
        let stats = t.store.stats();
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.batched_operations, 1200);
        assert_eq!(t.subcollection_votes("s1").len(), 1200);
    }

    #[tokio::test]
    async fn test_configured_batch_size_is_clamped() {
        let t = TestStore::new();
        t.seed_survey("s1", "t1", &many_votes(1000));
        let config = MigrationConfig {
            batch_size: 10_000,
            ..MigrationConfig::unpaced()
        };

        let result = MigrationEngine::new(t.handle(), config)
            .migrate_all_survey_votes()
            .await;

        assert_eq!(result.batches_committed, 3);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_survey() {
        let t = TestStore::new();
        t.seed_survey("s1", "t1", &votes(&[("u1", true)]));
        t.put(&paths::survey("s2"), json!({ "teamId": "t1", "votes": "corrupt" }));
        t.seed_survey("s3", "t1", &votes(&[("u3", true)]));
        t.seed_survey("s4", "t1", &votes(&[("u4", false)]));
        t.store.inject_fault(
            StoreOperation::Write,
            "surveys/s3/votes",
            StoreErrorCode::PermissionDenied,
        );

        let result = engine(&t).migrate_all_survey_votes().await;

        assert_eq!(result.success_count, 2);
        assert_eq!(result.failure_count, 2);
        let failed: Vec<&str> = result.errors.iter().map(|e| e.survey_id.as_str()).collect();
        assert_eq!(failed, vec!["s2", "s3"]);
        assert_eq!(t.subcollection_votes("s4"), votes(&[("u4", false)]));
        assert!(!result.is_complete());
    }

    #[tokio::test]
    async fn test_failed_scan_aborts_run() {
        let t = TestStore::new();
        t.seed_survey("s1", "t1", &votes(&[("u1", true)]));
        t.store
            .inject_fault(StoreOperation::Read, paths::SURVEYS, StoreErrorCode::Unavailable);

        let result = engine(&t).migrate_all_survey_votes().await;

        assert!(result.fatal_error.is_some());
        assert_eq!(result.total_surveys, 0);
        assert!(t.subcollection_votes("s1").is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_array_entries_last_wins() {
        let t = TestStore::new();
        t.seed_survey("s1", "t1", &votes(&[("u1", true), ("u1", false)]));

        let result = engine(&t).migrate_all_survey_votes().await;

        assert_eq!(result.total_votes_migrated, 1);
        assert_eq!(t.subcollection_votes("s1"), votes(&[("u1", false)]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_pause_every_tenth_batch() {
        let t = TestStore::new();
        for i in 0..11 {
            t.seed_survey(&format!("s{i:02}"), "t1", &votes(&[("u1", true)]));
        }
        let config = MigrationConfig {
            batch_size: 499,
            batch_pause_ms: 100,
            long_pause_every: 10,
            long_pause_ms: 1000,
        };

        let started = tokio::time::Instant::now();
        let result = MigrationEngine::new(t.handle(), config)
            .migrate_all_survey_votes()
            .await;

        assert_eq!(result.batches_committed, 11);
        // Ten short pauses and one long one.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(2000));
        assert!(elapsed < Duration::from_millis(2100));
    }

    #[test]
    fn test_result_serializes_duration_in_millis() {
        let mut result = MigrationResult::new("r1".to_string());
        result.duration = Duration::from_millis(1500);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["durationMs"], 1500);
        assert_eq!(value["runId"], "r1");
        assert!(value.get("fatalError").is_none());
    }
}

//! Vote storage strategies.
//!
//! Votes of a survey are kept either as the embedded `votes` array on the
//! survey document or as one document per voter in `surveys/{id}/votes`.
//! The strategy is picked from [`VoteStorageFlags`] on every write, so the
//! layout can be switched while the system runs. Dual write covers the
//! transition: one atomic batch updates both layouts.
//!
//! Array writes are read-modify-write on the parent document and can lose
//! concurrent updates from different voters. Sub-document writes touch only
//! the voter's own document and cannot.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use clubdesk_common::{AppError, AppResult, MigrationConfig};
use clubdesk_db::{
    DocumentStore, Fields, SetOptions, WriteBatch,
    entities::{Survey, Vote, survey::embedded_votes, survey::votes_value},
    paths,
    repositories::VoteRepository,
};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use super::flags::{VoteStorageFlags, VoteStorageMode};

/// Replace the vote of `vote.user_uid` or append it.
pub fn upsert_vote(votes: &mut Vec<Vote>, vote: Vote) {
    votes.retain(|v| v.user_uid != vote.user_uid);
    votes.push(vote);
}

/// Collapse duplicate voters, keeping each voter's last entry in the
/// position of that last entry.
#[must_use]
pub fn dedupe_votes(votes: &[Vote]) -> Vec<Vote> {
    let mut result = Vec::with_capacity(votes.len());
    for vote in votes {
        upsert_vote(&mut result, vote.clone());
    }
    result
}

/// Result of [`VoteStorage::add_or_update_vote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "mode")]
pub enum VoteWriteOutcome {
    /// The voter already had this value; nothing was written.
    Unchanged,
    /// The vote was written with this strategy.
    Written(VoteStorageMode),
}

/// One physical vote layout.
#[async_trait]
pub trait VoteWriter: Send + Sync {
    fn mode(&self) -> VoteStorageMode;

    /// Store `vote` for its voter on `survey_id`.
    async fn write_vote(&self, survey_id: &str, vote: &Vote) -> AppResult<()>;
}

async fn read_embedded(store: &dyn DocumentStore, survey_id: &str) -> AppResult<Vec<Vote>> {
    let doc = store
        .get(&paths::survey(survey_id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Survey {survey_id}")))?;
    embedded_votes(&doc)
}

/// Embedded array on the survey document.
pub struct ArrayVotes {
    store: Arc<dyn DocumentStore>,
}

#[async_trait]
impl VoteWriter for ArrayVotes {
    fn mode(&self) -> VoteStorageMode {
        VoteStorageMode::Array
    }

    async fn write_vote(&self, survey_id: &str, vote: &Vote) -> AppResult<()> {
        let mut votes = read_embedded(self.store.as_ref(), survey_id).await?;
        upsert_vote(&mut votes, vote.clone());
        self.store
            .update(
                &paths::survey(survey_id),
                Fields::new().set("votes", votes_value(&votes)?),
            )
            .await?;
        Ok(())
    }
}

/// One document per voter.
pub struct SubcollectionVotes {
    votes: VoteRepository,
}

#[async_trait]
impl VoteWriter for SubcollectionVotes {
    fn mode(&self) -> VoteStorageMode {
        VoteStorageMode::Subcollection
    }

    async fn write_vote(&self, survey_id: &str, vote: &Vote) -> AppResult<()> {
        self.votes.upsert(survey_id, vote).await
    }
}

/// Both layouts in one atomic batch.
pub struct DualWriteVotes {
    store: Arc<dyn DocumentStore>,
}

#[async_trait]
impl VoteWriter for DualWriteVotes {
    fn mode(&self) -> VoteStorageMode {
        VoteStorageMode::DualWrite
    }

    async fn write_vote(&self, survey_id: &str, vote: &Vote) -> AppResult<()> {
        let mut votes = read_embedded(self.store.as_ref(), survey_id).await?;
        upsert_vote(&mut votes, vote.clone());

        let mut batch = WriteBatch::new();
        batch
            .update(
                paths::survey(survey_id),
                Fields::new().set("votes", votes_value(&votes)?),
            )
            .set(
                paths::survey_vote(survey_id, &vote.user_uid),
                vote.subdocument_fields(),
                SetOptions::merge(),
            );
        self.store.commit(batch).await?;
        Ok(())
    }
}

/// Flag-driven access to survey votes.
#[derive(Clone)]
pub struct VoteStorage {
    store: Arc<dyn DocumentStore>,
    flags: Arc<VoteStorageFlags>,
    votes: VoteRepository,
}

impl VoteStorage {
    /// Create a new vote storage.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, flags: Arc<VoteStorageFlags>) -> Self {
        Self {
            votes: VoteRepository::new(Arc::clone(&store)),
            store,
            flags,
        }
    }

    #[must_use]
    pub fn flags(&self) -> &Arc<VoteStorageFlags> {
        &self.flags
    }

    /// Strategy for `mode`.
    #[must_use]
    pub fn writer(&self, mode: VoteStorageMode) -> Box<dyn VoteWriter> {
        match mode {
            VoteStorageMode::Array => Box::new(ArrayVotes {
                store: Arc::clone(&self.store),
            }),
            VoteStorageMode::Subcollection => Box::new(SubcollectionVotes {
                votes: self.votes.clone(),
            }),
            VoteStorageMode::DualWrite => Box::new(DualWriteVotes {
                store: Arc::clone(&self.store),
            }),
        }
    }

    /// Cast or change the vote of `user_uid`.
    ///
    /// `current_votes` is the caller's view of the survey. When it already
    /// holds the same value for this voter nothing is written.
    pub async fn add_or_update_vote(
        &self,
        survey_id: &str,
        user_uid: &str,
        vote: bool,
        current_votes: &[Vote],
    ) -> AppResult<VoteWriteOutcome> {
        if current_votes
            .iter()
            .any(|v| v.user_uid == user_uid && v.vote == vote)
        {
            debug!(survey_id, user_uid, vote, "Vote unchanged, skipping write");
            return Ok(VoteWriteOutcome::Unchanged);
        }

        let writer = self.writer(self.flags.mode());
        writer
            .write_vote(survey_id, &Vote::new(user_uid, vote))
            .await?;
        debug!(survey_id, user_uid, vote, mode = ?writer.mode(), "Vote written");
        Ok(VoteWriteOutcome::Written(writer.mode()))
    }

    /// Votes stored in the sub-collection of `survey_id`.
    pub async fn get_votes_from_subcollection(&self, survey_id: &str) -> AppResult<Vec<Vote>> {
        self.votes.find_by_survey(survey_id).await
    }

    /// Overlay sub-collection votes on one survey.
    ///
    /// The embedded array stays when the read fails or the sub-collection is
    /// still empty.
    pub async fn hydrate_one(&self, mut survey: Survey) -> Survey {
        if !self.flags.use_subcollection() {
            return survey;
        }
        match self.get_votes_from_subcollection(&survey.id).await {
            Ok(votes) if !votes.is_empty() => survey.votes = votes,
            Ok(_) => {}
            Err(e) => warn!(
                survey_id = %survey.id,
                error = %e,
                "Sub-collection read failed, using embedded votes"
            ),
        }
        survey
    }

    /// Overlay sub-collection votes on every survey. Reads run concurrently
    /// and fail independently.
    pub async fn hydrate(&self, surveys: Vec<Survey>) -> Vec<Survey> {
        if !self.flags.use_subcollection() {
            return surveys;
        }
        join_all(surveys.into_iter().map(|s| self.hydrate_one(s))).await
    }

    /// Make both layouts hold exactly `final_votes` and apply `survey_fields`
    /// to the survey document.
    ///
    /// Operations are committed in batches of at most
    /// [`MigrationConfig::MAX_BATCH_SIZE`]; the survey update goes into the
    /// last batch. Returns the number of committed batches.
    pub async fn replace_votes(
        &self,
        survey_id: &str,
        final_votes: &[Vote],
        survey_fields: Fields,
    ) -> AppResult<usize> {
        let final_votes = dedupe_votes(final_votes);
        let keep: BTreeSet<&str> = final_votes.iter().map(|v| v.user_uid.as_str()).collect();
        let existing = self.votes.find_by_survey(survey_id).await?;

        let mut ops = Vec::new();
        for vote in &final_votes {
            ops.push((
                paths::survey_vote(survey_id, &vote.user_uid),
                Some(vote.subdocument_fields()),
            ));
        }
        for stale in existing.iter().filter(|v| !keep.contains(v.user_uid.as_str())) {
            ops.push((paths::survey_vote(survey_id, &stale.user_uid), None));
        }

        let mut batches: Vec<WriteBatch> = ops
            .chunks(MigrationConfig::MAX_BATCH_SIZE)
            .map(|chunk| {
                let mut batch = WriteBatch::new();
                for (path, fields) in chunk {
                    match fields {
                        Some(fields) => batch.set(path.clone(), fields.clone(), SetOptions::replace()),
                        None => batch.delete(path.clone()),
                    };
                }
                batch
            })
            .collect();

        let survey_update = survey_fields.set("votes", votes_value(&final_votes)?);
        match batches.last_mut() {
            Some(last) if last.len() < MigrationConfig::MAX_BATCH_SIZE => {
                last.update(paths::survey(survey_id), survey_update);
            }
            _ => {
                let mut batch = WriteBatch::new();
                batch.update(paths::survey(survey_id), survey_update);
                batches.push(batch);
            }
        }

        let count = batches.len();
        for batch in batches {
            self.store.commit(batch).await?;
        }
        debug!(survey_id, votes = final_votes.len(), batches = count, "Votes replaced");
        Ok(count)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clubdesk_common::{StoreErrorCode, StoreOperation};
    use clubdesk_db::test_utils::{TestStore, votes};

    fn storage(t: &TestStore, use_subcollection: bool, dual_write: bool) -> VoteStorage {
        VoteStorage::new(
            t.handle(),
            Arc::new(VoteStorageFlags::new(use_subcollection, dual_write)),
        )
    }

    fn embedded(t: &TestStore, survey_id: &str) -> Vec<Vote> {
        embedded_votes(&t.survey_doc(survey_id).unwrap()).unwrap()
    }

    #[test]
    fn test_dedupe_keeps_last() {
        let deduped = dedupe_votes(&votes(&[("u1", true), ("u2", true), ("u1", false)]));
        assert_eq!(deduped, votes(&[("u2", true), ("u1", false)]));
    }

    #[tokio::test]
    async fn test_same_vote_twice_writes_once() {
        let t = TestStore::new();
        t.seed_survey("s1", "t1", &[]);
        let storage = storage(&t, false, false);

        let first = storage.add_or_update_vote("s1", "u1", true, &[]).await.unwrap();
        let current = embedded(&t, "s1");
        let second = storage
            .add_or_update_vote("s1", "u1", true, &current)
            .await
            .unwrap();

        assert_eq!(first, VoteWriteOutcome::Written(VoteStorageMode::Array));
        assert_eq!(second, VoteWriteOutcome::Unchanged);
        assert_eq!(t.store.stats().writes, 1);
    }

    #[tokio::test]
    async fn test_array_flip_keeps_one_entry() {
        let t = TestStore::new();
        t.seed_survey("s1", "t1", &votes(&[("u2", true)]));
        let storage = storage(&t, false, false);

        for value in [true, false, true, false] {
            let current = embedded(&t, "s1");
            storage.add_or_update_vote("s1", "u1", value, &current).await.unwrap();
        }

        assert_eq!(embedded(&t, "s1"), votes(&[("u2", true), ("u1", false)]));
        assert!(t.subcollection_votes("s1").is_empty());
    }

    #[tokio::test]
    async fn test_subcollection_mode_leaves_array_alone() {
        let t = TestStore::new();
        t.seed_survey("s1", "t1", &[]);
        let storage = storage(&t, true, false);

        storage.add_or_update_vote("s1", "u1", true, &[]).await.unwrap();
        storage
            .add_or_update_vote("s1", "u1", false, &votes(&[("u1", true)]))
            .await
            .unwrap();

        assert_eq!(t.subcollection_votes("s1"), votes(&[("u1", false)]));
        assert!(embedded(&t, "s1").is_empty());
    }

    #[tokio::test]
    async fn test_dual_write_updates_both_in_one_batch() {
        let t = TestStore::new();
        t.seed_survey("s1", "t1", &votes(&[("u1", true)]));
        let storage = storage(&t, false, true);

        let outcome = storage.add_or_update_vote("s1", "u2", false, &[]).await.unwrap();

        assert_eq!(outcome, VoteWriteOutcome::Written(VoteStorageMode::DualWrite));
        assert_eq!(t.store.stats().batches, 1);
        assert_eq!(embedded(&t, "s1"), votes(&[("u1", true), ("u2", false)]));
        assert_eq!(t.subcollection_votes("s1"), votes(&[("u2", false)]));
    }

    #[tokio::test]
    async fn test_dual_write_failure_changes_nothing() {
        let t = TestStore::new();
        t.seed_survey("s1", "t1", &[]);
        t.store.inject_fault(
            StoreOperation::Write,
            "surveys/s1/votes",
            StoreErrorCode::Unavailable,
        );
        let storage = storage(&t, false, true);

        let err = storage.add_or_update_vote("s1", "u1", true, &[]).await.unwrap_err();

        assert!(err.is_retryable());
        assert!(embedded(&t, "s1").is_empty());
        assert!(t.subcollection_votes("s1").is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_voters_are_not_lost() {
        let t = TestStore::new();
        t.seed_survey("s1", "t1", &[]);
        let storage = storage(&t, true, false);

        let uids: Vec<String> = (0..20).map(|i| format!("u{i:02}")).collect();
        let writes = uids
            .iter()
            .map(|uid| storage.add_or_update_vote("s1", uid, true, &[]));
        for result in join_all(writes).await {
            result.unwrap();
        }

        assert_eq!(t.subcollection_votes("s1").len(), 20);
    }

    #[tokio::test]
    async fn test_array_write_on_missing_survey() {
        let t = TestStore::new();
        let storage = storage(&t, false, false);
        let result = storage.add_or_update_vote("nope", "u1", true, &[]).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_hydrate_falls_back_per_survey() {
        let t = TestStore::new();
        t.seed_survey("s1", "t1", &votes(&[("u1", true)]));
        t.seed_survey("s2", "t1", &votes(&[("u1", true)]));
        t.seed_subcollection_votes("s1", &votes(&[("u1", false)]));
        t.seed_subcollection_votes("s2", &votes(&[("u1", false)]));
        t.store.inject_fault(
            StoreOperation::Read,
            "surveys/s2/votes",
            StoreErrorCode::Unavailable,
        );
        let storage = storage(&t, true, false);

        let mut surveys = vec![Survey::new("s1", "t1", "A"), Survey::new("s2", "t1", "B")];
        surveys[1].votes = votes(&[("u1", true)]);
        let hydrated = storage.hydrate(surveys).await;

        assert_eq!(hydrated[0].votes, votes(&[("u1", false)]));
        assert_eq!(hydrated[1].votes, votes(&[("u1", true)]));
    }

    #[tokio::test]
    async fn test_hydrate_is_noop_in_array_mode() {
        let t = TestStore::new();
        t.seed_subcollection_votes("s1", &votes(&[("u1", false)]));
        let storage = storage(&t, false, false);

        let hydrated = storage.hydrate(vec![Survey::new("s1", "t1", "A")]).await;
        assert!(hydrated[0].votes.is_empty());
        assert_eq!(t.store.stats().reads, 0);
    }

    #[tokio::test]
    async fn test_replace_votes_rewrites_both_layouts() {
        let t = TestStore::new();
        t.seed_survey("s1", "t1", &votes(&[("u1", true), ("u2", true)]));
        t.seed_subcollection_votes("s1", &votes(&[("u1", true), ("u3", true)]));
        let storage = storage(&t, true, false);

        let batches = storage
            .replace_votes(
                "s1",
                &votes(&[("u1", false), ("u2", true)]),
                Fields::new().set("status", "CLOSED"),
            )
            .await
            .unwrap();

        assert_eq!(batches, 1);
        assert_eq!(embedded(&t, "s1"), votes(&[("u1", false), ("u2", true)]));
        assert_eq!(
            t.subcollection_votes("s1"),
            votes(&[("u1", false), ("u2", true)])
        );
        assert_eq!(t.survey_doc("s1").unwrap()["status"], "CLOSED");
    }

    #[tokio::test]
    async fn test_replace_votes_splits_large_sets() {
        let t = TestStore::new();
        t.seed_survey("s1", "t1", &[]);
        let storage = storage(&t, true, false);
        let many: Vec<Vote> = (0..600).map(|i| Vote::new(format!("u{i:03}"), true)).collect();

        let batches = storage.replace_votes("s1", &many, Fields::new()).await.unwrap();

        assert_eq!(batches, 2);
        assert_eq!(t.subcollection_votes("s1").len(), 600);
        assert_eq!(embedded(&t, "s1").len(), 600);
    }
}

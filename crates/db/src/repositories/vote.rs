//! Vote sub-collection repository.

use std::sync::Arc;

use clubdesk_common::{AppResult, MigrationConfig};
use tracing::debug;

use crate::entities::Vote;
use crate::paths;
use crate::store::{DocumentStore, SetOptions, WriteBatch};

/// Repository for `surveys/{id}/votes/{userUid}` documents.
#[derive(Clone)]
pub struct VoteRepository {
    store: Arc<dyn DocumentStore>,
}

impl VoteRepository {
    /// Create a new vote repository.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// All votes of a survey.
    pub async fn find_by_survey(&self, survey_id: &str) -> AppResult<Vec<Vote>> {
        let docs = self.store.list(&paths::survey_votes(survey_id)).await?;
        docs.iter()
            .map(|doc| Vote::from_subdocument(doc.id(), &doc.data))
            .collect()
    }

    /// Create or merge the vote document of `vote.user_uid`.
    pub async fn upsert(&self, survey_id: &str, vote: &Vote) -> AppResult<()> {
        self.store
            .set(
                &paths::survey_vote(survey_id, &vote.user_uid),
                vote.subdocument_fields(),
                SetOptions::merge(),
            )
            .await?;
        Ok(())
    }

    /// Delete every vote document of a survey in bounded batches.
    ///
    /// Returns the number of deleted documents.
    pub async fn delete_all(&self, survey_id: &str) -> AppResult<usize> {
        let docs = self.store.list(&paths::survey_votes(survey_id)).await?;
        let total = docs.len();

        for chunk in docs.chunks(MigrationConfig::MAX_BATCH_SIZE) {
            let mut batch = WriteBatch::new();
            for doc in chunk {
                batch.delete(doc.path.clone());
            }
            self.store.commit(batch).await?;
            debug!(survey_id, deleted = chunk.len(), "Deleted vote batch");
        }

        Ok(total)
    }
}

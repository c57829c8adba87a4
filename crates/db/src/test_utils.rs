//! Test utilities for store-backed tests.
//!
//! Provides an in-memory store with seeding helpers for surveys and votes.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::info;

use crate::entities::Vote;
use crate::memory::MemoryStore;
use crate::path::DocumentPath;
use crate::paths;
use crate::store::{Document, DocumentStore};

/// Build a vote list from `(user_uid, vote)` pairs.
#[must_use]
pub fn votes(pairs: &[(&str, bool)]) -> Vec<Vote> {
    pairs.iter().map(|(uid, v)| Vote::new(*uid, *v)).collect()
}

/// A seeded in-memory store.
#[derive(Clone, Default)]
pub struct TestStore {
    /// Underlying store, for stats and fault injection.
    pub store: MemoryStore,
}

impl TestStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The store as a trait object.
    #[must_use]
    pub fn handle(&self) -> Arc<dyn DocumentStore> {
        Arc::new(self.store.clone())
    }

    /// Write a raw document, bypassing stats and faults.
    pub fn put(&self, path: &DocumentPath, body: Value) {
        if let Value::Object(data) = body {
            self.store.seed(path, data);
        }
    }

    /// Seed a survey of `team_id` with an embedded vote array.
    pub fn seed_survey(&self, survey_id: &str, team_id: &str, votes: &[Vote]) {
        self.put(
            &paths::survey(survey_id),
            json!({
                "teamId": team_id,
                "title": format!("Survey {survey_id}"),
                "status": "ACTIVE",
                "votes": votes,
            }),
        );
    }

    /// Seed vote documents in the sub-collection of `survey_id`.
    pub fn seed_subcollection_votes(&self, survey_id: &str, votes: &[Vote]) {
        for vote in votes {
            self.put(
                &paths::survey_vote(survey_id, &vote.user_uid),
                json!({ "userUid": vote.user_uid, "vote": vote.vote }),
            );
        }
        info!(survey_id, count = votes.len(), "Seeded sub-collection votes");
    }

    /// Raw survey document.
    #[must_use]
    pub fn survey_doc(&self, survey_id: &str) -> Option<Document> {
        self.store.peek(&paths::survey(survey_id))
    }

    /// Sub-collection votes, ordered by voter.
    #[must_use]
    pub fn subcollection_votes(&self, survey_id: &str) -> Vec<Vote> {
        self.store
            .peek_collection(&paths::survey_votes(survey_id))
            .iter()
            .filter_map(|doc| Vote::from_subdocument(doc.id(), &doc.data).ok())
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_seeding() {
        let t = TestStore::new();
        t.seed_survey("s1", "t1", &votes(&[("u1", true)]));
        t.seed_subcollection_votes("s1", &votes(&[("u2", false), ("u1", true)]));

        assert_eq!(t.survey_doc("s1").unwrap()["teamId"], "t1");
        assert_eq!(
            t.subcollection_votes("s1"),
            votes(&[("u1", true), ("u2", false)])
        );
    }
}

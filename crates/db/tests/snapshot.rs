//! Snapshot integration tests.
//!
//! The operator tooling loads the store from a JSON export keyed by document
//! path and writes it back after a run.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use clubdesk_db::{
    DocumentStore, MemoryStore,
    entities::{SurveyStatus, Vote},
    repositories::{SurveyRepository, VoteRepository},
};
use serde_json::json;

fn export() -> serde_json::Value {
    json!({
        "surveys/s1": { "teamId": "t1", "title": "Training", "status": "ACTIVE",
                        "votes": [{ "userUid": "u1", "vote": true }] },
        "surveys/s1/votes/u1": { "userUid": "u1", "vote": true },
        "surveys/s2": { "teamId": "t1", "title": "Match", "status": "CLOSED",
                        "verifiedAt": "2024-05-01T18:00:00Z", "verifiedBy": "coach" },
        "surveys/s3": { "teamId": "t1", "votes": "broken" },
        "surveys/s4": { "teamId": "t2", "title": "Other team" },
        "teams/t1/usage/counters": { "surveys": 3 }
    })
}

#[test]
fn test_export_survives_reload() {
    let store = MemoryStore::from_json(&export()).unwrap();
    assert_eq!(store.document_count(), 6);

    let reloaded = MemoryStore::from_json(&store.to_json()).unwrap();
    assert_eq!(reloaded.to_json(), export());
}

#[test]
fn test_malformed_exports_are_rejected() {
    assert!(MemoryStore::from_json(&json!([1, 2])).is_err());
    assert!(MemoryStore::from_json(&json!({ "surveys": {} })).is_err());
}

#[tokio::test]
async fn test_repositories_read_loaded_snapshot() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::from_json(&export()).unwrap());
    let surveys = SurveyRepository::new(Arc::clone(&store));
    let votes = VoteRepository::new(store);

    let team = surveys.find_by_team("t1").await.unwrap();
    let ids: Vec<&str> = team.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["s1", "s2"]);
    assert!(team[1].is_finalized());
    assert_eq!(team[1].status, SurveyStatus::Closed);

    assert_eq!(
        votes.find_by_survey("s1").await.unwrap(),
        vec![Vote::new("u1", true)]
    );
    assert!(votes.find_by_survey("s2").await.unwrap().is_empty());
    assert!(surveys.find_embedded_votes("s3").await.is_err());
}

//! Vote migration integrity check.
//!
//! Compares the embedded vote array of every survey with its sub-collection
//! and reports discrepancies. Read-only: nothing is ever written.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clubdesk_common::{AppResult, IdGenerator};
use clubdesk_db::{
    DocumentStore, StoredDocument,
    entities::{Vote, survey::embedded_votes},
    repositories::{SurveyRepository, VoteRepository},
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::migration::{SurveyError, serialize_millis};

/// Kind of discrepancy between the two layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    /// Different number of votes; per-vote checks were skipped.
    CountMismatch,
    /// An array vote has no sub-document.
    MissingInSubcollection,
    /// Both layouts have the voter with different values.
    ValueMismatch,
    /// A sub-document has no array entry.
    MissingInArray,
}

/// One discrepancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteMismatch {
    pub survey_id: String,
    pub kind: MismatchKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub array_value: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcollection_value: Option<bool>,
    pub array_count: usize,
    pub subcollection_count: usize,
}

/// Summary of one verification run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub run_id: String,
    pub total_surveys: usize,
    pub perfect_matches: usize,
    pub surveys_with_mismatches: usize,
    pub total_mismatches: usize,
    pub mismatches: Vec<VoteMismatch>,
    /// Surveys that could not be read. They count against `passed`.
    pub read_errors: Vec<SurveyError>,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal_error: Option<String>,
    #[serde(serialize_with = "serialize_millis", rename = "durationMs")]
    pub duration: Duration,
}

impl VerificationResult {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            total_surveys: 0,
            perfect_matches: 0,
            surveys_with_mismatches: 0,
            total_mismatches: 0,
            mismatches: Vec::new(),
            read_errors: Vec::new(),
            passed: false,
            fatal_error: None,
            duration: Duration::ZERO,
        }
    }

    /// Discrepancies of one survey.
    #[must_use]
    pub fn mismatches_for(&self, survey_id: &str) -> Vec<&VoteMismatch> {
        self.mismatches
            .iter()
            .filter(|m| m.survey_id == survey_id)
            .collect()
    }
}

/// Compare two vote sets of one survey.
///
/// A count difference is reported once and ends the comparison. Otherwise
/// every array vote is looked up in the sub-collection, then every
/// sub-document in the array.
#[must_use]
pub fn compare_votes(survey_id: &str, array: &[Vote], subcollection: &[Vote]) -> Vec<VoteMismatch> {
    let array_count = array.len();
    let subcollection_count = subcollection.len();
    let mismatch = |kind, user_uid: Option<&str>, array_value, subcollection_value| VoteMismatch {
        survey_id: survey_id.to_string(),
        kind,
        user_uid: user_uid.map(str::to_string),
        array_value,
        subcollection_value,
        array_count,
        subcollection_count,
    };

    if array_count != subcollection_count {
        return vec![mismatch(MismatchKind::CountMismatch, None, None, None)];
    }

    let by_uid: BTreeMap<&str, bool> = subcollection
        .iter()
        .map(|v| (v.user_uid.as_str(), v.vote))
        .collect();
    let mut found = Vec::new();

    for vote in array {
        match by_uid.get(vote.user_uid.as_str()) {
            None => found.push(mismatch(
                MismatchKind::MissingInSubcollection,
                Some(vote.user_uid.as_str()),
                Some(vote.vote),
                None,
            )),
            Some(&sub) if sub != vote.vote => found.push(mismatch(
                MismatchKind::ValueMismatch,
                Some(vote.user_uid.as_str()),
                Some(vote.vote),
                Some(sub),
            )),
            Some(_) => {}
        }
    }

    for vote in subcollection {
        if !array.iter().any(|a| a.user_uid == vote.user_uid) {
            found.push(mismatch(
                MismatchKind::MissingInArray,
                Some(vote.user_uid.as_str()),
                None,
                Some(vote.vote),
            ));
        }
    }
    found
}

/// Read-only comparison of both vote layouts.
#[derive(Clone)]
pub struct VerificationEngine {
    surveys: SurveyRepository,
    votes: VoteRepository,
    id_gen: IdGenerator,
}

impl VerificationEngine {
    /// Create a new verification engine.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            surveys: SurveyRepository::new(Arc::clone(&store)),
            votes: VoteRepository::new(store),
            id_gen: IdGenerator::new(),
        }
    }

    /// Check every survey. Mismatches never stop the scan.
    pub async fn verify_migration_integrity(&self) -> VerificationResult {
        let started = Instant::now();
        let mut result = VerificationResult::new(self.id_gen.generate_run_id());
        info!(run_id = %result.run_id, "Vote verification started");

        match self.surveys.find_all_documents().await {
            Ok(docs) => {
                result.total_surveys = docs.len();
                for doc in &docs {
                    self.verify_one(doc, &mut result).await;
                }
                result.passed = result.total_mismatches == 0 && result.read_errors.is_empty();
            }
            Err(e) => {
                error!(run_id = %result.run_id, error = %e, "Vote verification aborted");
                result.fatal_error = Some(e.to_string());
            }
        }

        result.duration = started.elapsed();
        info!(
            run_id = %result.run_id,
            total = result.total_surveys,
            perfect = result.perfect_matches,
            mismatches = result.total_mismatches,
            read_errors = result.read_errors.len(),
            passed = result.passed,
            "Vote verification finished"
        );
        result
    }

    async fn verify_one(&self, doc: &StoredDocument, result: &mut VerificationResult) {
        let survey_id = doc.id();
        let (array, subcollection) = match self.read_both(doc).await {
            Ok(both) => both,
            Err(e) => {
                warn!(survey_id, error = %e, "Survey could not be verified");
                result.read_errors.push(SurveyError {
                    survey_id: survey_id.to_string(),
                    error: e.to_string(),
                });
                return;
            }
        };

        let found = compare_votes(survey_id, &array, &subcollection);
        if found.is_empty() {
            result.perfect_matches += 1;
        } else {
            debug!(survey_id, count = found.len(), "Mismatches found");
            result.surveys_with_mismatches += 1;
            result.total_mismatches += found.len();
            result.mismatches.extend(found);
        }
    }

    async fn read_both(&self, doc: &StoredDocument) -> AppResult<(Vec<Vote>, Vec<Vote>)> {
        let array = embedded_votes(&doc.data)?;
        let subcollection = self.votes.find_by_survey(doc.id()).await?;
        Ok((array, subcollection))
    }
}

//! Survey repository.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clubdesk_common::{AppError, AppResult};
use tracing::warn;

use crate::entities::survey::{Survey, SurveyStatus, Vote, embedded_votes, votes_value};
use crate::paths;
use crate::store::{DocumentStore, Fields, Filter, Query, SetOptions, StoredDocument};

/// Survey repository for document operations.
#[derive(Clone)]
pub struct SurveyRepository {
    store: Arc<dyn DocumentStore>,
}

impl SurveyRepository {
    /// Create a new survey repository.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Find a survey by ID.
    pub async fn find_by_id(&self, survey_id: &str) -> AppResult<Option<Survey>> {
        self.store
            .get(&paths::survey(survey_id))
            .await?
            .map(|doc| Survey::from_document(survey_id, &doc))
            .transpose()
    }

    /// Get a survey by ID, returning error if not found.
    pub async fn get_by_id(&self, survey_id: &str) -> AppResult<Survey> {
        self.find_by_id(survey_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Survey {survey_id}")))
    }

    /// Every survey document, unparsed. Callers decide how to treat corrupt ones.
    pub async fn find_all_documents(&self) -> AppResult<Vec<StoredDocument>> {
        Ok(self.store.list(&paths::surveys()).await?)
    }

    /// Surveys of a team. Documents that fail to parse are skipped.
    pub async fn find_by_team(&self, team_id: &str) -> AppResult<Vec<Survey>> {
        let query = Query::collection(paths::surveys()).filter(Filter::eq("teamId", team_id));
        let docs = self.store.query(&query).await?;
        Ok(parse_surveys(&docs))
    }

    /// Embedded vote array of a survey.
    pub async fn find_embedded_votes(&self, survey_id: &str) -> AppResult<Vec<Vote>> {
        let doc = self
            .store
            .get(&paths::survey(survey_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Survey {survey_id}")))?;
        embedded_votes(&doc)
    }

    /// Create a survey document.
    pub async fn create(&self, survey: &Survey) -> AppResult<()> {
        let fields = survey.to_fields()?.server_timestamp("createdAt");
        self.store
            .set(&paths::survey(&survey.id), fields, SetOptions::replace())
            .await?;
        Ok(())
    }

    /// Overwrite the embedded vote array.
    pub async fn update_votes(&self, survey_id: &str, votes: &[Vote]) -> AppResult<()> {
        self.store
            .update(
                &paths::survey(survey_id),
                Fields::new().set("votes", votes_value(votes)?),
            )
            .await?;
        Ok(())
    }

    /// Change the lifecycle state.
    pub async fn update_status(&self, survey_id: &str, status: SurveyStatus) -> AppResult<()> {
        self.store
            .update(
                &paths::survey(survey_id),
                Fields::new().set("status", serde_json::to_value(status)?),
            )
            .await?;
        Ok(())
    }

    /// Fields closing a survey as verified.
    pub fn verification_fields(
        votes: &[Vote],
        verified_by: &str,
        verified_at: DateTime<Utc>,
    ) -> AppResult<Fields> {
        Ok(Fields::new()
            .set("votes", votes_value(votes)?)
            .set("status", serde_json::to_value(SurveyStatus::Closed)?)
            .set("verifiedAt", verified_at.to_rfc3339())
            .set("verifiedBy", verified_by.to_string()))
    }

    /// Delete the survey document only. Sub-collections are not touched.
    pub async fn delete(&self, survey_id: &str) -> AppResult<()> {
        self.store.delete(&paths::survey(survey_id)).await?;
        Ok(())
    }
}

/// Parse documents, logging and skipping the ones that fail.
#[must_use]
pub fn parse_surveys(docs: &[StoredDocument]) -> Vec<Survey> {
    docs.iter()
        .filter_map(|doc| match Survey::from_document(doc.id(), &doc.data) {
            Ok(survey) => Some(survey),
            Err(e) => {
                warn!(survey_id = doc.id(), error = %e, "Skipping malformed survey document");
                None
            }
        })
        .collect()
}

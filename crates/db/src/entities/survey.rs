//! Survey and vote entities.

use chrono::{DateTime, Utc};
use clubdesk_common::AppResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{Document, Fields};

/// A single attendee ballot. One per (survey, user).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    /// Voter.
    pub user_uid: String,
    /// Attending or not.
    pub vote: bool,
}

impl Vote {
    /// Create a vote.
    pub fn new(user_uid: impl Into<String>, vote: bool) -> Self {
        Self {
            user_uid: user_uid.into(),
            vote,
        }
    }

    /// Parse a vote sub-document. The document ID is the voter when the
    /// body carries no `userUid`.
    pub fn from_subdocument(id: &str, doc: &Document) -> AppResult<Self> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Body {
            user_uid: Option<String>,
            vote: bool,
        }

        let body: Body = serde_json::from_value(Value::Object(doc.clone()))?;
        Ok(Self {
            user_uid: body.user_uid.unwrap_or_else(|| id.to_string()),
            vote: body.vote,
        })
    }

    /// Fields written for the vote sub-document.
    #[must_use]
    pub fn subdocument_fields(&self) -> Fields {
        Fields::new()
            .set("userUid", self.user_uid.clone())
            .set("vote", self.vote)
            .server_timestamp("updatedAt")
    }
}

/// Survey lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SurveyStatus {
    /// Open for votes.
    #[default]
    Active,
    /// Voting ended, a power user has to confirm attendance.
    AwaitingVerification,
    /// Final.
    Closed,
}

/// A team survey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Survey {
    /// Document ID (not stored in the body).
    #[serde(skip)]
    pub id: String,
    /// Owning team.
    #[serde(default)]
    pub team_id: String,
    /// Title shown to members.
    #[serde(default)]
    pub title: String,
    /// Embedded votes, or the overlaid sub-collection after hydration.
    #[serde(default)]
    pub votes: Vec<Vote>,
    /// Lifecycle state.
    #[serde(default)]
    pub status: SurveyStatus,
    /// Set when a power user confirmed the final votes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    /// Power user who verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<String>,
    /// Creator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Survey {
    /// New active survey without votes.
    pub fn new(id: impl Into<String>, team_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            team_id: team_id.into(),
            title: title.into(),
            votes: Vec::new(),
            status: SurveyStatus::Active,
            verified_at: None,
            verified_by: None,
            created_by: None,
            created_at: None,
        }
    }

    /// Parse a stored survey document.
    pub fn from_document(id: &str, doc: &Document) -> AppResult<Self> {
        let mut survey: Self = serde_json::from_value(Value::Object(doc.clone()))?;
        survey.id = id.to_string();
        Ok(survey)
    }

    /// Serialize the body for storage.
    pub fn to_fields(&self) -> AppResult<Fields> {
        match serde_json::to_value(self)? {
            Value::Object(doc) => Ok(Fields::from(doc)),
            _ => Ok(Fields::new()),
        }
    }

    /// Votes are final once the survey is closed and verified.
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        matches!(self.status, SurveyStatus::Closed) && self.verified_at.is_some()
    }

    /// The ballot of `user_uid`, if any.
    #[must_use]
    pub fn vote_of(&self, user_uid: &str) -> Option<&Vote> {
        self.votes.iter().find(|v| v.user_uid == user_uid)
    }
}

/// Parse the embedded `votes` array of a raw survey document.
///
/// A missing field is an empty list; a malformed one is an error.
pub fn embedded_votes(doc: &Document) -> AppResult<Vec<Vote>> {
    match doc.get("votes") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => Ok(serde_json::from_value(value.clone())?),
    }
}

/// The array form of `votes` for a field write.
pub fn votes_value(votes: &[Vote]) -> AppResult<Value> {
    Ok(serde_json::to_value(votes)?)
}

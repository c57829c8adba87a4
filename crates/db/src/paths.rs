//! Persisted document layout.
//!
//! ```text
//! surveys/{surveyId}                      survey document (embedded `votes` array)
//! surveys/{surveyId}/votes/{userUid}      one vote per voter
//! users/{userUid}/usage/counters          user-scoped usage counters
//! teams/{teamId}/usage/counters           team-scoped usage counters
//! config/rateLimits                       live rate limit configuration
//! auditLogs/{id}                          audit trail
//! ```

use crate::entities::UsageScope;
use crate::path::{CollectionPath, DocumentPath};

/// Root collection of surveys.
pub const SURVEYS: &str = "surveys";
/// Vote sub-collection under a survey.
pub const VOTES: &str = "votes";
/// Root collection of users.
pub const USERS: &str = "users";
/// Root collection of teams.
pub const TEAMS: &str = "teams";
/// Usage sub-collection under a user or team.
pub const USAGE: &str = "usage";
/// Document holding all counters of one scope.
pub const USAGE_COUNTERS: &str = "counters";
/// Root collection of runtime configuration documents.
pub const CONFIG: &str = "config";
/// Rate limit configuration document ID.
pub const RATE_LIMITS: &str = "rateLimits";
/// Root collection of audit log entries.
pub const AUDIT_LOGS: &str = "auditLogs";

/// `surveys`
#[must_use]
pub fn surveys() -> CollectionPath {
    CollectionPath::new(SURVEYS)
}

/// `surveys/{survey_id}`
#[must_use]
pub fn survey(survey_id: &str) -> DocumentPath {
    surveys().doc(survey_id)
}

/// `surveys/{survey_id}/votes`
#[must_use]
pub fn survey_votes(survey_id: &str) -> CollectionPath {
    survey(survey_id).collection(VOTES)
}

/// `surveys/{survey_id}/votes/{user_uid}`
#[must_use]
pub fn survey_vote(survey_id: &str, user_uid: &str) -> DocumentPath {
    survey_votes(survey_id).doc(user_uid)
}

/// Counter document of a user or team.
#[must_use]
pub fn usage_counters(scope: &UsageScope) -> DocumentPath {
    let owner = match scope {
        UsageScope::User(uid) => DocumentPath::new(USERS, uid),
        UsageScope::Team(team_id) => DocumentPath::new(TEAMS, team_id),
    };
    owner.collection(USAGE).doc(USAGE_COUNTERS)
}

/// `config/rateLimits`
#[must_use]
pub fn rate_limits() -> DocumentPath {
    DocumentPath::new(CONFIG, RATE_LIMITS)
}

/// `auditLogs`
#[must_use]
pub fn audit_logs() -> CollectionPath {
    CollectionPath::new(AUDIT_LOGS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(survey_vote("s1", "u1").as_str(), "surveys/s1/votes/u1");
        assert_eq!(
            usage_counters(&UsageScope::Team("t1".to_string())).as_str(),
            "teams/t1/usage/counters"
        );
        assert_eq!(
            usage_counters(&UsageScope::User("u1".to_string())).as_str(),
            "users/u1/usage/counters"
        );
        assert_eq!(rate_limits().as_str(), "config/rateLimits");
    }
}

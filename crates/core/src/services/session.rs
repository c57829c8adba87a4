//! Signed-in identity.
//!
//! Authentication itself happens elsewhere; services only need to know who
//! is acting and which team is selected.

use std::sync::{PoisonError, RwLock};

use clubdesk_common::{AppError, AppResult};

/// Identity of the current caller.
pub trait Session: Send + Sync {
    /// Signed-in user, if any.
    fn user_uid(&self) -> Option<String>;

    /// Selected team, if any.
    fn team_id(&self) -> Option<String>;

    /// Signed-in user or `Unauthorized`.
    fn require_user(&self) -> AppResult<String> {
        self.user_uid().ok_or(AppError::Unauthorized)
    }

    /// Selected team or `BadRequest`.
    fn require_team(&self) -> AppResult<String> {
        self.team_id()
            .ok_or_else(|| AppError::BadRequest("No team selected".to_string()))
    }
}

#[derive(Debug, Default)]
struct Identity {
    user_uid: Option<String>,
    team_id: Option<String>,
}

/// Session held in process memory, switched on sign-in, team selection
/// and sign-out.
#[derive(Debug, Default)]
pub struct SessionState {
    identity: RwLock<Identity>,
}

impl SessionState {
    /// Signed-out session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Session for `user_uid` with `team_id` selected.
    #[must_use]
    pub fn signed_in(user_uid: impl Into<String>, team_id: impl Into<String>) -> Self {
        let session = Self::new();
        session.sign_in(user_uid);
        session.select_team(team_id);
        session
    }

    pub fn sign_in(&self, user_uid: impl Into<String>) {
        self.write().user_uid = Some(user_uid.into());
    }

    pub fn select_team(&self, team_id: impl Into<String>) {
        self.write().team_id = Some(team_id.into());
    }

    pub fn sign_out(&self) {
        *self.write() = Identity::default();
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Identity> {
        self.identity.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Identity> {
        self.identity.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Session for SessionState {
    fn user_uid(&self) -> Option<String> {
        self.read().user_uid.clone()
    }

    fn team_id(&self) -> Option<String> {
        self.read().team_id.clone()
    }
}

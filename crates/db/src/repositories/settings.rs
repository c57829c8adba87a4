//! Runtime settings repository.

use std::sync::Arc;

use clubdesk_common::AppResult;

use crate::paths;
use crate::store::{Document, DocumentStore, Fields, SetOptions};

/// Repository for documents under `config/`.
#[derive(Clone)]
pub struct SettingsRepository {
    store: Arc<dyn DocumentStore>,
}

impl SettingsRepository {
    /// Create a new settings repository.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// The raw rate limit document, if one was ever written.
    pub async fn get_rate_limits(&self) -> AppResult<Option<Document>> {
        Ok(self.store.get(&paths::rate_limits()).await?)
    }

    /// Merge limit values into the rate limit document.
    pub async fn merge_rate_limits(&self, fields: Fields) -> AppResult<()> {
        self.store
            .set(
                &paths::rate_limits(),
                fields.server_timestamp("updatedAt"),
                SetOptions::merge(),
            )
            .await?;
        Ok(())
    }
}

//! Usage counter repository.

use std::sync::Arc;

use clubdesk_common::AppResult;

use crate::entities::UsageScope;
use crate::paths;
use crate::store::{DocumentStore, Fields, SetOptions};

/// Repository for `{users|teams}/{id}/usage/counters`.
#[derive(Clone)]
pub struct UsageRepository {
    store: Arc<dyn DocumentStore>,
}

impl UsageRepository {
    /// Create a new usage repository.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Current counter value; a missing document or field reads as zero.
    pub async fn get_count(&self, scope: &UsageScope, counter: &str) -> AppResult<i64> {
        let doc = self.store.get(&paths::usage_counters(scope)).await?;
        Ok(doc
            .as_ref()
            .and_then(|d| d.get(counter))
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .unwrap_or(0))
    }

    /// Atomically add `by` to the counter, creating the document if needed.
    pub async fn increment(&self, scope: &UsageScope, counter: &str, by: i64) -> AppResult<()> {
        self.store
            .set(
                &paths::usage_counters(scope),
                Fields::new()
                    .increment(counter, by)
                    .server_timestamp("updatedAt"),
                SetOptions::merge(),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[tokio::test]
    async fn test_missing_counter_reads_zero() {
        let repo = UsageRepository::new(Arc::new(MemoryStore::new()));
        let scope = UsageScope::Team("t1".to_string());
        assert_eq!(repo.get_count(&scope, "surveys").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_increment_is_scoped() {
        let repo = UsageRepository::new(Arc::new(MemoryStore::new()));
        let team = UsageScope::Team("t1".to_string());
        let user = UsageScope::User("t1".to_string());

        repo.increment(&team, "surveys", 1).await.unwrap();
        repo.increment(&team, "surveys", 1).await.unwrap();

        assert_eq!(repo.get_count(&team, "surveys").await.unwrap(), 2);
        assert_eq!(repo.get_count(&user, "surveys").await.unwrap(), 0);
    }
}

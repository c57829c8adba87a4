//! Retry of transient store failures.

use std::future::Future;

use clubdesk_common::{AppResult, RetryConfig};
use tracing::warn;

/// Run `op` until it succeeds, fails permanently, or retries run out.
///
/// Only errors for which [`clubdesk_common::AppError::is_retryable`] holds are
/// retried, so deletes are never repeated.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && config.should_retry(attempt) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

//! Detached background tasks.
//!
//! A detached task runs beside the critical path: the caller does not await
//! it, and its failure is only logged. Usage increments and audit writes go
//! through here so their errors can never fail the operation they follow.

use std::future::Future;

use clubdesk_common::AppResult;
use tokio::task::JoinHandle;
use tracing::debug;

/// Spawn `fut` on the current runtime and log its outcome.
///
/// The returned handle exists for tests and shutdown paths; dropping it
/// does not cancel the task.
pub fn spawn_detached<F>(name: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = AppResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match fut.await {
            Ok(()) => debug!(task = name, "Detached task finished"),
            Err(e) => e.log(name),
        }
    })
}

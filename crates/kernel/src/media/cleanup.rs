//! Detached follow-up work.
//!
//! Failure bookkeeping must not be cancelled along with the request that
//! triggered it, so it runs on its own task under its own deadline.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Deadline for a single detached task.
pub const DETACHED_TIMEOUT: Duration = Duration::from_secs(30);

/// Run `work` on a separate task. Errors and timeouts are logged, never
/// propagated.
pub fn detach<F>(task: &'static str, media_id: Uuid, work: F) -> JoinHandle<()>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match tokio::time::timeout(DETACHED_TIMEOUT, work).await {
            Ok(Ok(())) => debug!(task, %media_id, "detached task completed"),
            Ok(Err(e)) => warn!(task, %media_id, error = %e, "detached task failed"),
            Err(_) => warn!(task, %media_id, "detached task timed out"),
        }
    })
}

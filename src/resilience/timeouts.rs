//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap store fetches with the configured deadline
//! - Map an elapsed deadline to the caller's own "unavailable" error
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the inner future is dropped on expiry
//! - Timeout errors are distinct from other errors in logs

use std::future::Future;
use std::time::Duration;

/// Run `fut` with a deadline, converting expiry into `on_timeout()`.
pub async fn with_deadline<T, E, F>(
    deadline: Duration,
    fut: F,
    on_timeout: impl FnOnce() -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(deadline = ?deadline, "Operation exceeded deadline");
            Err(on_timeout())
        }
    }
}

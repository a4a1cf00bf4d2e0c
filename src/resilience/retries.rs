//! Retry logic.
//!
//! # Responsibilities
//! - Re-run an operation while its failure is transient
//! - Sleep with exponential backoff + jitter between attempts
//! - Stop after `max_attempts` (or immediately when retries are disabled)
//!
//! # Design Decisions
//! - The caller decides what is transient; permanent errors return at once
//! - Jittered backoff prevents a thundering herd against a recovering source

use std::future::Future;

use crate::config::RetryConfig;
use crate::resilience::backoff::backoff_for;

/// Run `op` until it succeeds, fails permanently, or attempts run out.
pub async fn retry_transient<T, E, F, Fut>(
    config: &RetryConfig,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = if config.enabled { config.max_attempts.max(1) } else { 1 };
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_transient(&e) => {
                let delay = backoff_for(config, attempt);
                tracing::info!(attempt, delay = ?delay, error = %e, "Retrying after transient failure");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

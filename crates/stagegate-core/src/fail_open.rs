//! Fail-open and retry helpers
//!
//! `fail_open` is for side channels such as the activity journal, where a
//! failure must never change the outcome of a pipeline call. `retry_once`
//! gives an operation exactly one more attempt when its error is retryable.
//!
//! DO NOT use fail-open for:
//! - Checkpoint writes (durability)
//! - Stage execution (business logic)

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::Result;

/// Pause between the first failure and the retry
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Execute an operation that should fail open
///
/// Logs the error via `tracing::warn!` on failure and returns `None`.
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

/// Run `f`, and run it once more if the first error is retryable
///
/// The second error, or a non-retryable first error, is returned as is.
pub async fn retry_once<F, Fut, T, E, R>(operation_name: &str, mut f: F, retryable: R) -> std::result::Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    match f(1).await {
        Ok(val) => Ok(val),
        Err(e) if retryable(&e) => {
            warn!("{} failed (attempt 1/2, retrying): {}", operation_name, e);
            tokio::time::sleep(RETRY_BACKOFF).await;
            f(2).await
        }
        Err(e) => Err(e),
    }
}

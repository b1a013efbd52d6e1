//! Call-site retry with exponential backoff.
//!
//! Transient provider failures are retried up to 3 attempts with
//! exponential backoff (base 2 s, factor 2, capped at 10 s). The same
//! schedule drives queue-level job retries.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, ErrorClass, ProviderError, Result};

/// Maximum attempts per call site.
pub const MAX_ATTEMPTS: u32 = 3;

/// Backoff delay before retry number `attempt` (1-based).
///
/// Exponential with factor 2 from a 2 s base, capped at 10 s:
/// 2 s, 4 s, 8 s, 10 s, 10 s, ...
#[must_use]
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(8);
    let secs = 2u64.saturating_mul(1u64 << exp).min(10);
    Duration::from_secs(secs)
}

/// Runs a fallible async operation, retrying transient failures.
///
/// Non-transient errors propagate immediately.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted.
pub async fn with_retry<T, F, Fut>(operation: &'static str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.class() == ErrorClass::Transient && attempt < MAX_ATTEMPTS => {
                let delay = backoff_delay(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Bounds a future with an operation timeout.
///
/// # Errors
///
/// Returns [`ProviderError::Timeout`] when the deadline passes, or the
/// inner error otherwise.
pub async fn with_timeout<T, Fut>(
    operation: &'static str,
    timeout: Duration,
    fut: Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Provider(ProviderError::Timeout {
            operation,
            seconds: timeout.as_secs(),
        })),
    }
}

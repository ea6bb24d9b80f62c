//! Bounded retry for single `ArcGIS` queries.
//!
//! Every client call goes through [`with_retry`]:
//!
//! ```ignore
//! let parcel = retry::with_retry(&policy, "parcel", || client.query_parcel(coordinate)).await;
//! ```
//!
//! A successful response ends the loop immediately, whatever it contains.
//! Rate limiting (HTTP 429/503) backs off linearly (3s, 6s, ...); any
//! other failure waits a fixed delay (2s). Nothing is slept after the last
//! attempt.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

use crate::QueryError;

/// How many times to retry a query and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (`2` means 3 attempts in total).
    pub max_retries: u32,
    /// Base backoff for rate-limited responses; attempt `n` (0-based)
    /// waits `(n + 1) * rate_limit_backoff_secs`.
    pub rate_limit_backoff_secs: u64,
    /// Fixed wait after any other failure.
    pub error_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            rate_limit_backoff_secs: 3,
            error_delay_secs: 2,
        }
    }
}

impl RetryPolicy {
    /// Total attempts, including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Wait before the next attempt after `error` on 0-based `attempt`.
    #[must_use]
    pub fn delay_after(&self, error: &QueryError, attempt: u32) -> Duration {
        if error.is_rate_limited() {
            Duration::from_secs(self.rate_limit_backoff_secs * u64::from(attempt + 1))
        } else {
            Duration::from_secs(self.error_delay_secs)
        }
    }
}

/// Runs `operation` until it succeeds or the retry budget is spent.
///
/// The `operation` closure is called once per attempt to build a fresh
/// request future.
///
/// # Errors
///
/// Returns the last [`QueryError`] once all attempts have failed.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, QueryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, QueryError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= policy.max_retries => {
                log::debug!(
                    "{label}: giving up after {} attempts: {e}",
                    policy.max_attempts()
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(&e, attempt);
                log::warn!(
                    "{label}: {e} (retry {}/{} in {delay:?})",
                    attempt + 1,
                    policy.max_retries
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

//! wa-retry
//!
//! Exponential backoff for transient gateway failures (`spec.md` §4.G
//! step 5, §5). A send that fails with a retryable
//! [`wa_error::ErrorCode`] is retried with backoff; a permanent failure is
//! returned immediately.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use wa_core::random::RandomSource;
use wa_error::CoreError;

/// Backoff configuration for a retry loop.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    /// Base delay for the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay between attempts, in milliseconds.
    pub max_delay_ms: u64,
    /// Maximum number of attempts, including the first (non-retry) one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    /// `spec.md` §5: base 500ms, cap 15s, up to 5 attempts.
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 15_000,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// The backoff delay before retry attempt `attempt` (0-indexed,
    /// counting from the first retry), without jitter.
    #[must_use]
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt);
        let delay_ms = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// The backoff delay before retry attempt `attempt`, with up to 25%
    /// full jitter subtracted, drawn from `source`.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32, source: &dyn RandomSource) -> Duration {
        let nominal = self.nominal_delay(attempt).as_millis() as u64;
        let jitter_range = nominal / 4;
        if jitter_range == 0 {
            return Duration::from_millis(nominal);
        }
        let jitter = source.uint64n(jitter_range + 1);
        Duration::from_millis(nominal.saturating_sub(jitter))
    }
}

/// A single recorded retry attempt, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    /// Zero-indexed attempt number that failed.
    pub attempt: u32,
    /// The error that triggered the retry.
    pub error: String,
    /// The backoff delay applied before the next attempt.
    pub delay: Duration,
}

/// The outcome of a successful [`retry_async`] call.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The value the operation eventually produced.
    pub value: T,
    /// Every failed attempt that preceded success, in order.
    pub failed_attempts: Vec<RetryAttempt>,
    /// Total wall-clock attempts made, including the successful one.
    pub total_attempts: u32,
}

/// Run `op` up to `policy.max_attempts` times, retrying only errors for
/// which `retryable` returns `true`, backing off between attempts using
/// `source` for jitter.
///
/// # Errors
///
/// Returns the last error if every attempt is exhausted, or immediately
/// on the first non-retryable error.
pub async fn retry_async<T, F, Fut>(
    policy: &RetryPolicy,
    source: &dyn RandomSource,
    retryable: fn(&CoreError) -> bool,
    mut op: F,
) -> Result<RetryOutcome<T>, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut failed_attempts = Vec::new();
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 0..max_attempts {
        match op().await {
            Ok(value) => {
                debug!(target: "wa.retry", attempt, "send succeeded");
                return Ok(RetryOutcome {
                    value,
                    failed_attempts,
                    total_attempts: attempt + 1,
                });
            }
            Err(err) => {
                let is_last = attempt + 1 >= max_attempts;
                if !retryable(&err) {
                    debug!(target: "wa.retry", attempt, code = %err.code.as_str(), "non-retryable, giving up");
                    return Err(err);
                }
                if is_last {
                    warn!(target: "wa.retry", attempt, "retries exhausted");
                    return Err(err);
                }
                let delay = policy.jittered_delay(attempt, source);
                warn!(target: "wa.retry", attempt, delay_ms = delay.as_millis() as u64, "retrying after transient failure");
                failed_attempts.push(RetryAttempt {
                    attempt,
                    error: err.to_string(),
                    delay,
                });
                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!("loop always returns before exhausting max_attempts iterations")
}

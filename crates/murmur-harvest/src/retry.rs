//! Retry with exponential back-off and jitter for remote source calls.
//!
//! [`retry_with_backoff`] wraps any fallible async operation and retries on
//! transient errors (rate limits, network failures, 5xx). Everything else —
//! decode failures, missing configuration, store errors — is returned
//! immediately.

use std::future::Future;
use std::time::Duration;

use crate::error::HarvestError;

/// Bounded retry schedule for one remote operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first try.
    pub max_retries: u32,
    /// Base delay; attempt `n` sleeps roughly `base * 2^(n-1)`.
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 1_000,
        }
    }
}

/// Returns `true` for errors that are worth retrying after a back-off delay.
///
/// **Retriable:**
/// - [`HarvestError::RateLimited`] — the server asked us to slow down.
/// - [`HarvestError::Http`] network-level failures: timeout, connection reset.
/// - [`HarvestError::UnexpectedStatus`] in the 5xx range.
///
/// **Not retriable (hard stop):**
/// - [`HarvestError::Deserialize`] — malformed response; retrying won't fix it.
/// - [`HarvestError::NoData`], [`HarvestError::Config`] — state/config issues.
/// - Store and commit errors — handled by the tick loop, not by HTTP retry.
pub(crate) fn is_retriable(err: &HarvestError) -> bool {
    match err {
        HarvestError::RateLimited { .. } => true,
        HarvestError::Http(e) => {
            e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
        }
        HarvestError::UnexpectedStatus { status, .. } => (500..600).contains(status),
        HarvestError::Deserialize { .. }
        | HarvestError::NoData { .. }
        | HarvestError::Config { .. }
        | HarvestError::ConflictExhausted { .. }
        | HarvestError::CommitUnqueued { .. }
        | HarvestError::Store(_) => false,
    }
}

/// Runs `operation` with up to `policy.max_retries` additional attempts on
/// transient errors. Delay doubles per attempt with ±25% jitter, capped at 60s.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, HarvestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HarvestError>>,
{
    const MAX_DELAY_MS: u64 = 60_000;
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retriable(&err) || attempt >= policy.max_retries {
                    return Err(err);
                }
                attempt += 1;
                let computed = policy
                    .backoff_base_ms
                    .saturating_mul(1u64 << (attempt - 1).min(10));
                // A 429 with Retry-After overrides the exponential schedule.
                let capped = match &err {
                    HarvestError::RateLimited {
                        retry_after_secs: Some(secs),
                        ..
                    } => secs.saturating_mul(1_000).min(MAX_DELAY_MS),
                    _ => computed.min(MAX_DELAY_MS),
                };
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss
                )]
                let delay_ms = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
                tracing::warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms,
                    error = %err,
                    "transient source error — retrying after back-off"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

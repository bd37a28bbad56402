//! Retry helpers for node API calls.

use crate::error::NodeApiError;
use std::future::Future;
use testbed_core::RetryPolicy;
use tokio::time::{sleep, sleep_until, timeout_at, Instant};

/// Run `op`, retrying transient failures with exponential backoff.
///
/// Gives up after `policy.max_attempts` attempts or on the first
/// non-transient error, returning the last error.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, NodeApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, NodeApiError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!("{what} succeeded after {attempt} attempts");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "{what} failed (attempt {attempt}/{max_attempts}): {e}. Retrying in {delay:?}"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Poll `op` until it succeeds or `deadline` passes.
///
/// Used for readiness checks: transient failures are retried with backoff
/// (the attempt budget of `policy` is ignored, the deadline bounds the loop).
/// Each attempt is itself cut off at the deadline.
pub async fn poll_until_ready<T, F, Fut>(
    deadline: Instant,
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, NodeApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, NodeApiError>>,
{
    let mut attempt: u32 = 1;
    loop {
        let err = match timeout_at(deadline, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if !e.is_transient() => return Err(e),
            Ok(Err(e)) => e,
            Err(_) => return Err(NodeApiError::timeout(what)),
        };
        let delay = policy.delay_for(attempt);
        if Instant::now() + delay >= deadline {
            tracing::warn!("{what} not ready before deadline: {err}");
            sleep_until(deadline).await;
            return Err(err);
        }
        tracing::debug!("{what} not ready yet (attempt {attempt}): {err}");
        sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}

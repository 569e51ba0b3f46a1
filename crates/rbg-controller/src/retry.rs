//! Bounded conflict retry and requeue backoff

use crate::config::RetryConfig;
use crate::error::{ReconcileError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Run `op` until it succeeds or fails with something other than a conflict.
///
/// Each attempt must re-read the object it writes; the closure is invoked
/// fresh per attempt for that reason. After `config.steps` conflicting
/// attempts the last error is surfaced as [`ReconcileError::RetriesExhausted`].
pub async fn retry_on_conflict<T, F, Fut>(config: &RetryConfig, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let steps = config.steps.max(1);
    let mut delay = config.initial_backoff();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_conflict() && attempt < steps => {
                debug!(operation, attempt, "Conflict, retrying");
                tokio::time::sleep(jittered(delay, config.jitter)).await;
                delay = delay.mul_f64(config.factor.max(1.0));
            }
            Err(err) if err.is_conflict() => {
                return Err(ReconcileError::RetriesExhausted {
                    attempts: attempt,
                    last: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }
}

fn jittered(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let spread = rand::thread_rng().gen_range(0.0..jitter);
    delay.mul_f64(1.0 + spread)
}

/// Exponential requeue delay after `failures` consecutive failures, capped at `max`
pub fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(20);
    base.saturating_mul(1u32 << exponent).min(max)
}

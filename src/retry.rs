use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::limiter::Limiter;
use crate::{AppError, Result};

const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Exponential backoff used when the server does not say how long to wait:
/// 1s, 2s, 4s ... capped at two minutes.
pub fn backoff(attempt: u32) -> Duration {
    let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

/// Runs `f` behind `limiter`, retrying throttled and transient failures.
///
/// Each attempt first takes a token from the limiter. A rate-limit error
/// sleeps for the server-provided delay (or [`backoff`]), a transient error
/// sleeps for [`backoff`]; both are retried until the limiter's attempt bound
/// is reached, after which [`AppError::RetryExhausted`] is returned. Any other
/// error is returned at once, annotated with `operation`.
pub async fn with_retry<T, F, Fut>(
    cancel: &CancellationToken,
    limiter: &Limiter,
    operation: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = limiter.max_attempts();
    for attempt in 0..max_attempts {
        limiter.wait(cancel).await?;

        let err = match f().await {
            Ok(v) => return Ok(v),
            Err(err) => err,
        };
        if !err.is_retryable() {
            return Err(match err {
                AppError::Cancelled => AppError::Cancelled,
                other => other.in_call(operation),
            });
        }

        let delay = match &err {
            AppError::SlackRateLimit {
                retry_after: Some(after),
            } => *after,
            _ => backoff(attempt),
        };
        if matches!(err, AppError::SlackRateLimit { .. }) {
            warn!(
                operation,
                tier = %limiter.tier(),
                attempt = attempt + 1,
                max_attempts,
                delay_secs = delay.as_secs_f64(),
                "rate limited, backing off"
            );
        } else {
            warn!(
                operation,
                attempt = attempt + 1,
                max_attempts,
                error = %err,
                "transient failure, retrying"
            );
        }

        if attempt + 1 == max_attempts {
            break;
        }
        debug!(operation, "retrying after {:?}", delay);
        tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            _ = sleep(delay) => {}
        }
    }

    Err(AppError::RetryExhausted {
        operation: operation.to_string(),
        attempts: max_attempts,
    })
}

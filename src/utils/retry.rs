use std::time::Duration;
use tokio::time::sleep;

// ============================================================================
// Transient-Failure Retry
// ============================================================================
//
// Backoff retry for the calling boundary around store/broker I/O. Transient
// infrastructure errors are retried with exponential backoff; anything the
// error type classifies as permanent short-circuits immediately so poison
// events reach the dead-letter path without burning retry budget.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Budget for the consumer path, where giving up dead-letters the event.
    pub fn consumer() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

}

/// Classifies failures for the retry loop: transient infrastructure errors
/// are worth another attempt, everything else is permanent.
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success(T),
    /// Transient failures exhausted the attempt budget.
    Exhausted(E),
    /// Permanent failure; no retry was attempted.
    Permanent(E),
}

/// Run `operation` until it succeeds, fails permanently, or runs out of
/// attempts. The closure receives the 1-based attempt number.
pub async fn retry_on_transient<F, Fut, T, E>(
    config: RetryConfig,
    mut operation: F,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    let mut delay = config.initial_delay;

    for attempt in 1..=config.max_attempts {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "operation succeeded after retry");
                }
                return RetryResult::Success(value);
            }
            Err(error) if !error.is_transient() => {
                tracing::debug!(error = %error, "permanent failure, not retrying");
                return RetryResult::Permanent(error);
            }
            Err(error) if attempt == config.max_attempts => {
                tracing::error!(
                    attempt,
                    error = %error,
                    "transient failure persisted through all attempts"
                );
                return RetryResult::Exhausted(error);
            }
            Err(error) => {
                tracing::warn!(
                    attempt,
                    error = %error,
                    delay_ms = delay.as_millis(),
                    "transient failure, backing off"
                );
                sleep(delay).await;
                delay = Duration::from_millis(
                    ((delay.as_millis() as f64) * config.multiplier) as u64,
                )
                .min(config.max_delay);
            }
        }
    }

    unreachable!("loop returns on the final attempt")
}

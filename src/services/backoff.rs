use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

/// Default number of retried attempts before the final call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default ceiling of the exponential curve, in seconds.
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 15;

/// Classifies an error as worth retrying against a throttling service.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Capped exponential backoff with full jitter over the upper half.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    max_attempts: u32,
    max_backoff: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            Duration::from_secs(DEFAULT_MAX_BACKOFF_SECS),
        )
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            max_backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `min(max, 2^attempt)` in seconds.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponential = Duration::from_secs(2u64.saturating_pow(attempt));
        exponential.min(self.max_backoff)
    }

    /// `ceiling/2 + uniform(0, ceiling/2)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let half = self.ceiling(attempt).as_secs_f64() / 2.0;
        let jitter = rand::rng().random_range(0.0..=half);
        Duration::from_secs_f64(half + jitter)
    }

    /// Run `call`, sleeping and retrying on retryable errors.
    ///
    /// Non-retryable errors return immediately. Once the attempt budget is
    /// spent the call is made one last time and its result is returned
    /// whatever it is.
    pub async fn retry<T, E, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        for attempt in 0..self.max_attempts {
            tracing::debug!(operation, attempt, "Calling external service");

            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    tracing::error!(operation, attempt, error = %e, "Non-retryable error");
                    return Err(e);
                }
                Err(e) => {
                    let wait = self.delay(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        ceiling_secs = self.ceiling(attempt).as_secs(),
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "BACKOFF"
                    );
                    metrics::counter!("fanout_backoff_retries_total", "operation" => operation.to_string())
                        .increment(1);
                    sleep(wait).await;
                }
            }
        }

        tracing::error!(
            operation,
            attempts = self.max_attempts,
            "BACKOFF limit breached, making final attempt"
        );
        call().await
    }
}

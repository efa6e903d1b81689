//! Retry with exponential backoff around a single backend call

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Upper bound for a single backoff sleep
    pub cap: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cap: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay after a failed attempt (1-based): `min(2^attempt + jitter, cap)`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = 2f64.powi(attempt.min(30) as i32);
        let jitter: f64 = rand::random();
        Duration::from_secs_f64((base + jitter).min(self.cap.as_secs_f64()))
    }
}

/// Run `op`, retrying transient failures.
///
/// Non-transient errors are returned as-is after the first failure. A
/// transient failure on the last attempt becomes [`Error::RetryExhausted`].
pub async fn call_with_retry<T, F, Fut>(name: &str, config: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                if attempt == max_attempts {
                    warn!(agent = name, attempts = attempt, error = %e, "Retries exhausted");
                    break;
                }
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    agent = name,
                    attempt,
                    error = %e,
                    "Backend busy, retrying in {:.1}s",
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::RetryExhausted {
        agent: name.to_string(),
        attempts: max_attempts,
    })
}

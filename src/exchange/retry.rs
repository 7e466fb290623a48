use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use super::ExchangeError;

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts in total, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// A single attempt.
    pub fn none() -> Self {
        Self::new(1)
    }

    /// Delay before attempt `attempt + 1`, between half and all of `base * 2^(attempt - 1)`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);
        let jitter = rand::rng().random_range(0.5..=1.0);
        exp.mul_f64(jitter)
    }

    /// Runs `op` until it succeeds, fails with an error `retryable` rejects, or attempts run out.
    ///
    /// A rate limit with a suggested delay waits at least that long.
    pub async fn run<T, F, Fut, R>(&self, what: &str, retryable: R, mut op: F) -> Result<T, ExchangeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
        R: Fn(&ExchangeError) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && retryable(&e) => {
                    let mut delay = self.delay(attempt);
                    if let ExchangeError::RateLimited {
                        retry_after: Some(after),
                    } = &e
                    {
                        delay = delay.max(*after);
                    }
                    warn!(what, attempt, ?delay, error = %e, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

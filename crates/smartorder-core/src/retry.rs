use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Bounded retry with a fixed delay schedule. `delays[n]` is slept after
/// failed attempt `n + 1`; the last attempt is never followed by a delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delays,
        }
    }

    pub fn language_model() -> Self {
        Self::new(
            3,
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)],
        )
    }

    pub fn invoice_export() -> Self {
        Self::new(
            3,
            vec![Duration::from_secs(2), Duration::from_secs(5), Duration::from_secs(10)],
        )
    }

    pub fn order_number() -> Self {
        Self::new(
            3,
            (1..=3).map(|attempt| Duration::from_millis(100 * attempt)).collect(),
        )
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        self.delays
            .get(index)
            .or(self.delays.last())
            .copied()
            .unwrap_or_default()
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are exhausted. The last error is returned.
    pub async fn run<T, E, F, Fut, R>(&self, mut op: F, is_retryable: R) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && is_retryable(&err) => {
                    let delay = self.delay_after(attempt);
                    warn!(attempt, max_attempts = self.max_attempts, ?delay, error = %err, "retrying after failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

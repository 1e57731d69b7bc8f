//! A general transient-failure retry helper for things like model downloads
//! and `ffprobe` invocations, distinct from `task_queue`'s task-level retry
//! bookkeeping. Mirrors the `RetryStrategy`/`exponential_backoff` helper this
//! grew from: attempt count, initial delay, multiplier, delay cap, optional
//! jitter.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct RetryStrategy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: false,
        }
    }
}

impl RetryStrategy {
    pub fn new(max_attempts: u32, initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            multiplier,
            max_delay,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the given 1-based attempt number, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = base_secs.min(self.max_delay.as_secs_f64());
        let secs = if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..1.5);
            capped * factor
        } else {
            capped
        };
        Duration::from_secs_f64(secs.max(0.0))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Run `op` until it succeeds or the strategy is exhausted, sleeping between
/// attempts via `tokio::time::sleep`. Returns the last error on exhaustion.
pub async fn retry_async<T, E, F, Fut>(strategy: RetryStrategy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if strategy.should_retry(attempt) {
                    let delay = strategy.delay_for(attempt);
                    tracing::warn!(attempt, max = strategy.max_attempts, %err, delay_ms = delay.as_millis() as u64, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                } else {
                    tracing::error!(attempts = attempt, %err, "all retry attempts exhausted");
                    return Err(err);
                }
            }
        }
    }
}

/// Synchronous variant for blocking call sites (e.g. inside
/// `spawn_blocking`), sleeping via `std::thread::sleep`.
pub fn retry_blocking<T, E, F>(strategy: RetryStrategy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if strategy.should_retry(attempt) {
                    let delay = strategy.delay_for(attempt);
                    tracing::warn!(attempt, max = strategy.max_attempts, %err, delay_ms = delay.as_millis() as u64, "retrying");
                    std::thread::sleep(delay);
                    attempt += 1;
                } else {
                    tracing::error!(attempts = attempt, %err, "all retry attempts exhausted");
                    return Err(err);
                }
            }
        }
    }
}

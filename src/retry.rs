//! Bounded retry with a uniformly random delay between attempts.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Retry configuration for one publish call.
///
/// Attempts are numbered from 1. The first attempt is never delayed; every
/// later attempt waits a random duration in `[min_delay, max_delay]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(1);
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

    /// Creates a policy with the default one second lower bound.
    ///
    /// # Arguments
    /// * `max_attempts` - Total attempts, including the first one. Zero is treated as one.
    /// * `max_delay` - Upper bound of the random wait before a retry.
    pub fn new(max_attempts: u32, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            min_delay: Self::DEFAULT_MIN_DELAY,
            max_delay,
        }
    }

    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    /// Attempts actually made when every attempt fails.
    pub fn attempt_cap(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Checks whether another attempt may follow attempt number `attempt`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.attempt_cap()
    }

    /// Returns the wait before attempt number `attempt`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let upper = self.max_delay.as_millis() as u64;
        let lower = (self.min_delay.as_millis() as u64).min(upper);
        Duration::from_millis(rand::thread_rng().gen_range(lower..=upper))
    }

    /// Runs `operation` until it succeeds or the attempt cap is reached.
    /// The closure receives the attempt number.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(attempt) => {
                    attempt += 1;
                    let delay = self.delay_before(attempt);
                    log::debug!(
                        "Attempt {} of {} failed, retrying in {:?}: {}",
                        attempt - 1,
                        self.attempt_cap(),
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(RetryExhausted { attempts: attempt, last_error: e }),
            }
        }
    }

    /// Blocking twin of [`RetryPolicy::run`], sleeping the calling thread.
    pub fn run_blocking<T, E, F>(&self, mut operation: F) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(attempt) => {
                    attempt += 1;
                    let delay = self.delay_before(attempt);
                    log::debug!(
                        "Attempt {} of {} failed, retrying in {:?}: {}",
                        attempt - 1,
                        self.attempt_cap(),
                        delay,
                        e
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(RetryExhausted { attempts: attempt, last_error: e }),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS, Self::DEFAULT_MAX_DELAY)
    }
}

/// The last error after every attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

//! Bounded retries with exponential backoff.
//!
//! The n-th retry waits `base_delay * multiplier^(n-1)`, capped at
//! `max_delay`. With jitter enabled each wait is scaled by a random factor in
//! `[0.5, 1.5)` and capped again.

use crate::config::NetworkConfig;
use crate::ProbeError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff policy for one logical request.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: NetworkConfig::MAX_RETRIES,
            base_delay: NetworkConfig::RETRY_BASE_DELAY,
            max_delay: NetworkConfig::RETRY_MAX_DELAY,
            multiplier: NetworkConfig::BACKOFF_MULTIPLIER,
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// 1.0 gives a constant delay.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.max_attempts == 0 {
            return Err(ProbeError::Config {
                message: "max_attempts must be at least 1".into(),
            });
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ProbeError::Config {
                message: format!(
                    "multiplier must be a finite value >= 1.0, got {}",
                    self.multiplier
                ),
            });
        }
        Ok(())
    }

    /// Wait before retry number `retry` (1 = the wait after the first failure).
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let cap = self.max_delay.as_secs_f64();
        let mut secs = (self.base_delay.as_secs_f64() * self.multiplier.powi(exponent)).min(cap);

        if self.jitter {
            secs = (secs * rand::rng().random_range(0.5..1.5)).min(cap);
        }

        // Rounded to whole microseconds so the schedule is exact for
        // millisecond inputs
        Duration::from_micros((secs * 1_000_000.0).round() as u64)
    }

    /// The full wait schedule: one entry per retry.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.max_attempts).map(|retry| self.delay_before_retry(retry))
    }
}

/// What a retried operation produced, and how much it took.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Times the operation was invoked.
    pub attempts: u32,
    /// Sum of the backoff waits.
    pub waited: Duration,
}

/// Run `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or `config.max_attempts` invocations have been made.
///
/// No wait follows the final attempt. A zero `max_attempts` still runs the
/// operation once; use [`RetryConfig::validate`] to reject it up front.
pub async fn retry_async<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut waited = Duration::ZERO;
    let mut attempts = 0;

    loop {
        attempts += 1;
        let err = match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!("Recovered on attempt {}/{}", attempts, max_attempts);
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                    waited,
                };
            }
            Err(err) => err,
        };

        let give_up = if !should_retry(&err) {
            debug!("Not retrying: {}", err);
            true
        } else if attempts >= max_attempts {
            if max_attempts > 1 {
                warn!("Giving up after {} attempts: {}", attempts, err);
            }
            true
        } else {
            false
        };
        if give_up {
            return RetryOutcome {
                result: Err(err),
                attempts,
                waited,
            };
        }

        let delay = config.delay_before_retry(attempts);
        warn!(
            "Attempt {}/{} failed ({}), next in {:?}",
            attempts, max_attempts, err, delay
        );
        tokio::time::sleep(delay).await;
        waited += delay;
    }
}

//! Capped retry with backoff
//!
//! Wraps `chrono_machines::ExponentialBackoff` so transient operations retry
//! under a named policy built from `[retry]` config. The stock policy is three
//! attempts one second apart.

use crate::error::{Error, Result};
use crate::manifest::RetryConfig;
use chrono_machines::{BackoffStrategy, ExponentialBackoff};
use rand::rng;
use std::thread;
use std::time::Duration;

/// Retry policy for transient failures
pub struct RetryPolicy {
    max_attempts: u8,
    base_delay_ms: u64,
    backoff: ExponentialBackoff,
}

impl RetryPolicy {
    /// Create backoff strategy from RetryConfig
    pub fn from_config(config: &RetryConfig) -> Self {
        let backoff = ExponentialBackoff::new()
            .base_delay_ms(config.base_delay_ms)
            .max_delay_ms(config.max_delay_ms)
            .multiplier(config.multiplier)
            .max_attempts(config.max_attempts)
            .jitter_factor(config.jitter_factor);

        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u8 {
        self.max_attempts
    }

    /// Delay before the attempt following `attempt`
    fn delay(&self, attempt: u8) -> Duration {
        let mut rng = rng();
        let ms = self
            .backoff
            .delay(attempt, &mut rng)
            .unwrap_or(self.base_delay_ms);
        Duration::from_millis(ms)
    }

    /// Run `op` until it succeeds or the attempts run out
    ///
    /// `op` receives the 1-based attempt number. Exhaustion returns
    /// [`Error::RetriesExhausted`] wrapping the last failure.
    pub fn run<T, F>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u8) -> Result<T>,
    {
        let mut attempt: u8 = 0;

        loop {
            attempt += 1;

            match op(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("{} succeeded on attempt {}", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.max_attempts => {
                    let delay = self.delay(attempt);
                    tracing::warn!(
                        "{} attempt {}/{} failed: {}; retrying in {}ms",
                        operation,
                        attempt,
                        self.max_attempts,
                        e,
                        delay.as_millis()
                    );
                    thread::sleep(delay);
                }
                Err(e) => {
                    return Err(Error::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
            }
        }
    }
}

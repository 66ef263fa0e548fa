//! Bounded retry with backoff for backend calls.

use crate::services::backend::BackendResult;
use std::{future::Future, time::Duration};
use tracing::warn;

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffConfig {
    /// Fixed delay between attempts.
    Fixed { delay: Duration },

    /// Exponential backoff.
    Exponential {
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::Exponential {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Calculate the delay after a failed attempt (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                initial_delay,
                max_delay,
                multiplier,
            } => {
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                let delay_secs = initial_delay.as_secs_f64() * multiplier.powi(exponent);
                if !delay_secs.is_finite() || delay_secs >= max_delay.as_secs_f64() {
                    return *max_delay;
                }
                Duration::from_secs_f64(delay_secs)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffConfig::Fixed {
                delay: Duration::ZERO,
            },
        }
    }

    /// Run `call` until it succeeds, fails with a non-transient error, or
    /// `max_attempts` is reached.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> BackendResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient backend error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

//! Bounded retry with exponential backoff for single-batch delivery.
//!
//! [`RetryingSender`] never touches session statistics; it only reports
//! whether a batch made it to the sink and, if not, why.

use crate::batch::Batch;
use crate::config::RetryConfig;
use crate::sink::{SendError, Sink};
use crate::{Error, Result};
use std::time::Duration;
use tracing::{debug, warn};

/// Attempt ceiling and backoff bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts in total, including the first.
    pub max_attempts: u32,
    /// Delay unit doubled after each failed attempt.
    pub multiplier: Duration,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        multiplier: Duration,
        min_backoff: Duration,
        max_backoff: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            multiplier,
            min_backoff,
            max_backoff: max_backoff.max(min_backoff),
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }

    /// Delay to wait after `failed_attempts` consecutive failures.
    ///
    /// Zero before the first attempt, otherwise
    /// `multiplier * 2^(failed_attempts - 1)` clamped to `[min, max]`.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }

        let exponent = (failed_attempts - 1).min(31);
        let raw = self.multiplier.saturating_mul(1u32 << exponent);
        raw.max(self.min_backoff).min(self.max_backoff)
    }

    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.backoff_multiplier(),
            config.min_backoff(),
            config.max_backoff(),
        )
    }
}

/// Delivers one batch, retrying transient failures under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryingSender {
    policy: RetryPolicy,
}

impl RetryingSender {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sends `batch` through `sink`.
    ///
    /// Permanent errors return after the attempt that produced them. Transient
    /// errors are retried until the attempt ceiling, then reported as
    /// [`Error::TransientSend`] with the last sink message.
    pub async fn send<S: Sink + ?Sized>(&self, sink: &S, batch: &Batch) -> Result<()> {
        let mut failed_attempts = 0u32;

        loop {
            let delay = self.policy.delay_for(failed_attempts);
            if !delay.is_zero() {
                debug!(
                    attempt = failed_attempts + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }

            match sink.send_batch(batch.partition_key(), batch.records()).await {
                Ok(()) => {
                    if failed_attempts > 0 {
                        debug!(attempts = failed_attempts + 1, "Batch delivered after retry");
                    }
                    return Ok(());
                }
                Err(SendError::Permanent(message)) => {
                    warn!(
                        partition_key = %batch.partition_key(),
                        "Batch rejected permanently: {}",
                        message
                    );
                    return Err(Error::PermanentSend { message });
                }
                Err(SendError::Transient(message)) => {
                    failed_attempts += 1;
                    if !self.policy.should_retry(failed_attempts) {
                        warn!(
                            partition_key = %batch.partition_key(),
                            attempts = failed_attempts,
                            "Batch send failed after exhausting retries: {}",
                            message
                        );
                        return Err(Error::TransientSend {
                            attempts: failed_attempts,
                            message,
                        });
                    }
                    debug!(
                        attempt = failed_attempts,
                        "Transient send failure: {}",
                        message
                    );
                }
            }
        }
    }
}

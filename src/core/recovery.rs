//! Recovery policy - One place deciding what happens after an operation fails.
//!
//! Errors are classified by [`Error::class`]. Validation errors go straight back to
//! the caller, transient store failures are retried with capped exponential
//! backoff, and fatal errors stop the operation.

use crate::{
    config::settings::RecoveryConfig,
    errors::{Error, ErrorClass, Result},
};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// What to do about a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Report the error to the caller as-is
    Reject,
    /// Try again after the delay
    Retry {
        /// Time to wait before the next attempt
        delay: Duration,
    },
    /// Give up; the error indicates broken state or retries are exhausted
    Abort,
}

/// Retry policy for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::from(&RecoveryConfig::default())
    }
}

impl From<&RecoveryConfig> for RecoveryPolicy {
    fn from(config: &RecoveryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay(), config.max_delay())
    }
}

impl RecoveryPolicy {
    /// Creates a policy allowing `max_attempts` tries in total (at least one).
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Decides what to do after `attempt` (1-based) failed with `error`.
    #[must_use]
    pub fn action_for(&self, error: &Error, attempt: u32) -> RecoveryAction {
        match error.class() {
            ErrorClass::Validation => RecoveryAction::Reject,
            ErrorClass::FatalState => RecoveryAction::Abort,
            ErrorClass::TransientNetwork if attempt >= self.max_attempts => RecoveryAction::Abort,
            ErrorClass::TransientNetwork => RecoveryAction::Retry {
                delay: self.delay_for(attempt),
            },
        }
    }

    /// Backoff before the retry that follows `attempt`: base, 2×base, 4×base, … capped.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }

    /// Runs `operation`, retrying transient failures according to the policy.
    ///
    /// Only idempotent operations, or ones that roll back on failure, should be
    /// run through here.
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match self.action_for(&err, attempt) {
                RecoveryAction::Reject => return Err(err),
                RecoveryAction::Retry { delay } => {
                    warn!(
                        operation = operation_name,
                        attempt,
                        ?delay,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RecoveryAction::Abort => {
                    error!(operation = operation_name, attempt, error = %err, "operation aborted");
                    return Err(err);
                }
            }
        }
    }
}

//! Bounded retry for best-effort cluster operations.
//!
//! Teardown deletes are retried a fixed number of times and then given up on.
//! There is no backoff by default: attempts follow each other immediately
//! unless a delay is configured.
//!
//! # Example
//!
//! ```ignore
//! use db_provisioner::retry::{retry_with_limit, RetryConfig};
//!
//! let result = retry_with_limit(
//!     &RetryConfig::with_max_attempts(3),
//!     &clock,
//!     "StatefulSet",
//!     || async { cluster.delete_resource(kind, "default", "db").await },
//! ).await;
//! ```

use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::Clock;

/// Default number of attempts for teardown deletes
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Configuration for bounded retries
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first (minimum 1)
    pub max_attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::ZERO,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts and no delay
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Set the pause between attempts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Execute an async operation up to `config.max_attempts` times.
///
/// # Arguments
/// * `config` - Retry configuration
/// * `clock` - Time source used for the optional inter-attempt delay
/// * `description` - Name for logging purposes
/// * `operation` - The async operation to retry
///
/// # Returns
/// The first successful result, or the last error once attempts are exhausted.
pub async fn retry_with_limit<F, Fut, T, E>(
    config: &RetryConfig,
    clock: &dyn Clock,
    description: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                debug!(operation = %description, attempt, "Operation succeeded");
                return Ok(result);
            }
            Err(e) => {
                warn!(
                    operation = %description,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Operation failed"
                );

                if attempt >= max_attempts {
                    return Err(e);
                }

                if !config.delay.is_zero() {
                    clock.sleep(config.delay).await;
                }
            }
        }
    }
}

//! Injectable time source
//!
//! The reconciler never calls `tokio::time::sleep` directly. Waits go through
//! [`Clock`] so tests can run drain-wait loops without real delays.

use std::time::Duration;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

/// Suspends the current task
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Clock: Send + Sync {
    /// Sleep for the given duration
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

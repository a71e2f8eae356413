//! Wall-clock waits behind a swappable abstraction.
//!
//! The harness never calls `tokio::time::sleep` directly. Every real-world
//! delay (cloud propagation, retry intervals) goes through [`Clock::advance`],
//! so tests can substitute [`ManualClock`] and run without sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

/// Source of wall-clock delays.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Waits for `duration` to pass.
    async fn advance(&self, duration: Duration);
}

/// A [`Clock`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn advance(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// A virtual [`Clock`] that records advances and returns immediately.
#[derive(Debug, Default)]
pub struct ManualClock {
    elapsed_nanos: AtomicU64,
    advances: AtomicU64,
}

impl ManualClock {
    /// Creates a clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total virtual time advanced so far.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.load(Ordering::SeqCst))
    }

    /// Number of calls to [`Clock::advance`], including zero-length ones.
    pub fn advance_count(&self) -> u64 {
        self.advances.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Clock for ManualClock {
    async fn advance(&self, duration: Duration) {
        self.elapsed_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
        self.advances.fetch_add(1, Ordering::SeqCst);
    }
}

//! Shared per-upstream rate limiting.
//!
//! One limiter instance per upstream source, shared by reference across all
//! concurrent workers of a session (and across sessions within a process).
//! Each `acquire` reserves the next send slot under the lock, then sleeps
//! outside it, so concurrent workers space their requests exactly
//! `min_interval` apart instead of racing the clock.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Minimum-interval rate limiter with increment-and-wait semantics.
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Wait until this caller's reserved request slot arrives.
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + self.min_interval;
            slot
        };
        sleep_until(slot).await;
    }
}

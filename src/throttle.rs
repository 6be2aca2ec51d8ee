//! Global spacing between remote service invocations.
//!
//! Every invocation of the test service draws on a quota shared across the
//! whole process, and the service degrades under bursty concurrent use. A
//! single [`Throttle`] is therefore injected into every invocation path,
//! regardless of which module issues the attempt.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Process-wide minimum-spacing gate for service invocations.
///
/// Holds a single timestamp behind one lock. Fair in the sense that no two
/// acquisitions complete within the configured spacing of each other; no
/// stronger ordering is promised.
pub struct Throttle {
    min_spacing: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    /// Create a throttle with the given minimum spacing between
    /// acquisitions.
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            last: Mutex::new(None),
        }
    }

    /// Block until at least the configured spacing has elapsed since the
    /// previous acquisition, then claim the current instant as the new
    /// reference point. Never fails; only delays.
    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;

        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_spacing {
                tokio::time::sleep(self.min_spacing - elapsed).await;
            }
        }

        // The slot is claimed while the lock is still held, so concurrent
        // callers measure from this acquisition rather than their own
        // wake-up time.
        *last = Some(Instant::now());
    }
}

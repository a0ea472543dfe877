//! Request pacer for the Gmail REST surface
//!
//! Gmail enforces per-user quota; the cleaner stays under it by spacing
//! outbound calls rather than bursting. The pacer holds a single slot:
//! every call waits out the remainder of `min_interval` since the previous
//! call, where `min_interval = 1s / requests_per_second`. All clones share
//! one slot so concurrent tasks are serialized process-wide.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::trace;

/// Single-slot pacer shared by every outbound API call
#[derive(Debug)]
pub struct RequestPacer {
    inner: Arc<Mutex<PacerState>>,
    min_interval: Duration,
}

#[derive(Debug)]
struct PacerState {
    last_request: Option<Instant>,
    /// Total requests paced (for stats)
    total_requests: u64,
    /// Cumulative time spent waiting (for stats)
    total_waited: Duration,
}

impl RequestPacer {
    /// Create a pacer admitting `requests_per_second` calls
    pub fn new(requests_per_second: u32) -> Self {
        let rps = requests_per_second.max(1);
        Self {
            inner: Arc::new(Mutex::new(PacerState {
                last_request: None,
                total_requests: 0,
                total_waited: Duration::ZERO,
            })),
            min_interval: Duration::from_millis(1000 / rps as u64),
        }
    }

    /// Wait until the next request is allowed, then claim the slot
    ///
    /// The lock is held across the sleep on purpose: callers queue up and
    /// are released one interval apart, which is the whole point.
    pub async fn acquire(&self) {
        let mut state = self.inner.lock().await;

        if let Some(last) = state.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                trace!("Pacing request, waiting {:?}", wait);
                tokio::time::sleep(wait).await;
                state.total_waited += wait;
            }
        }

        state.last_request = Some(Instant::now());
        state.total_requests += 1;
    }

    /// Minimum spacing between requests
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Pacing statistics since creation
    pub async fn stats(&self) -> PacerStats {
        let state = self.inner.lock().await;
        PacerStats {
            total_requests: state.total_requests,
            total_waited: state.total_waited,
        }
    }
}

impl Default for RequestPacer {
    fn default() -> Self {
        Self::new(10)
    }
}

impl Clone for RequestPacer {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            min_interval: self.min_interval,
        }
    }
}

/// Statistics about request pacing
#[derive(Debug, Clone)]
pub struct PacerStats {
    pub total_requests: u64,
    pub total_waited: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_interval_from_rate() {
        assert_eq!(RequestPacer::new(10).min_interval(), Duration::from_millis(100));
        assert_eq!(RequestPacer::new(50).min_interval(), Duration::from_millis(20));
        // Zero is clamped rather than dividing by it
        assert_eq!(RequestPacer::new(0).min_interval(), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_first_request_immediate() {
        let pacer = RequestPacer::new(1);

        let start = Instant::now();
        pacer.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_requests_are_spaced() {
        let pacer = RequestPacer::new(20); // 50ms interval

        let start = Instant::now();
        pacer.acquire().await;
        pacer.acquire().await;
        pacer.acquire().await;
        let elapsed = start.elapsed();

        // Three calls means two full intervals of spacing
        assert!(
            elapsed >= Duration::from_millis(95),
            "expected >= ~100ms of pacing, got {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_no_wait_after_idle_period() {
        let pacer = RequestPacer::new(20); // 50ms interval

        pacer.acquire().await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        // Interval already elapsed while idle
        let start = Instant::now();
        pacer.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_clone_shares_slot() {
        let pacer1 = RequestPacer::new(20);
        let pacer2 = pacer1.clone();

        let start = Instant::now();
        pacer1.acquire().await;
        pacer2.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(45));

        let stats = pacer1.stats().await;
        assert_eq!(stats.total_requests, 2);
    }
}

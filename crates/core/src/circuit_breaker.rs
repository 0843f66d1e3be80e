//! Circuit breaker shared by the TTS fallback layer and the backend
//! RPC client.
//!
//! Grounded verbatim on the original Python `CircuitBreaker`: three
//! logical positions tracked by two fields (consecutive failure
//! count, opened-at monotonic instant), `failure_threshold = 3`,
//! `cooldown_seconds = 60`.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Closed/open/half-open gate in front of one external dependency.
///
/// One instance per dependency per process (spec §4.7): never shared
/// across calls for *different* dependencies, but the single instance
/// for, say, the backend RPC client, is shared by every concurrent
/// call that talks to that backend.
pub struct CircuitBreaker {
    label: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

struct Inner {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_params(label, 3, Duration::from_secs(60))
    }

    pub fn with_params(label: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            label: label.into(),
            failure_threshold,
            cooldown,
            inner: Mutex::new(Inner {
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// `true` when a caller may attempt the primary path: closed, or
    /// half-open (cooldown has elapsed since the breaker tripped).
    pub fn should_try(&self) -> bool {
        let inner = self.inner.lock();
        if inner.consecutive_failures < self.failure_threshold {
            return true;
        }
        match inner.opened_at {
            Some(opened_at) => opened_at.elapsed() >= self.cooldown,
            None => true,
        }
    }

    /// Alias used by the TTS fallback call sites, matching the
    /// original source's `should_try_primary`.
    pub fn should_try_primary(&self) -> bool {
        self.should_try()
    }

    /// Record a successful call: resets the breaker fully closed.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Record a failed call. The clock starts only on the failure
    /// that first crosses the threshold (half-open failures re-open
    /// and restart the clock, matching the original's behavior of
    /// always stamping `opened_at` once over threshold).
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.failure_threshold {
            inner.opened_at = Some(Instant::now());
            tracing::warn!(
                breaker = %self.label,
                failures = inner.consecutive_failures,
                "circuit breaker open"
            );
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_until_threshold() {
        let b = CircuitBreaker::with_params("svc", 3, Duration::from_millis(50));
        assert!(b.should_try());
        b.record_failure();
        assert!(b.should_try());
        b.record_failure();
        assert!(b.should_try());
        b.record_failure();
        assert!(!b.should_try());
    }

    #[test]
    fn half_open_after_cooldown_then_success_resets() {
        let b = CircuitBreaker::with_params("svc", 2, Duration::from_millis(20));
        b.record_failure();
        b.record_failure();
        assert!(!b.should_try());
        std::thread::sleep(Duration::from_millis(30));
        assert!(b.should_try());
        b.record_success();
        b.record_failure();
        // a single failure after a reset is below threshold=2, still closed
        assert!(b.should_try());
    }

    #[test]
    fn half_open_failure_reopens_and_restarts_clock() {
        let b = CircuitBreaker::with_params("svc", 1, Duration::from_millis(30));
        b.record_failure();
        std::thread::sleep(Duration::from_millis(40));
        assert!(b.should_try()); // half-open
        b.record_failure(); // re-open, restart clock
        assert!(!b.should_try());
        std::thread::sleep(Duration::from_millis(40));
        assert!(b.should_try());
    }
}

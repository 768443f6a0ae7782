//! Monotonic time capability (component A). The core never calls
//! `Instant::now()` directly so that the state machine's timing logic can be
//! driven deterministically in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Returns a monotonic timestamp in seconds, matching the source library's
/// `VoIPController::GetCurrentTime()`.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Production clock backed by `std::time::Instant`.
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock { epoch: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

/// Deterministic clock for tests: time only advances when `advance` is
/// called, never on its own.
pub struct FakeClock {
    micros: AtomicU64,
}

impl FakeClock {
    pub fn new() -> Self {
        FakeClock { micros: AtomicU64::new(0) }
    }

    pub fn advance(&self, secs: f64) {
        let delta = (secs * 1_000_000.0).round() as u64;
        self.micros.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set(&self, secs: f64) {
        self.micros.store((secs * 1_000_000.0).round() as u64, Ordering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_monotonically() {
        let clock = FakeClock::new();
        assert_eq!(clock.now(), 0.0);
        clock.advance(1.5);
        assert!((clock.now() - 1.5).abs() < 1e-9);
        clock.advance(0.5);
        assert!((clock.now() - 2.0).abs() < 1e-9);
    }
}

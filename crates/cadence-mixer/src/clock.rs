//! Stream clock: the time domain all scheduling math happens in.

use std::sync::atomic::Ordering;
use std::time::Instant;

use crate::atomic::AtomicF64;

/// A monotonic clock measured in seconds.
///
/// Buffer start instants handed to the mixer and explicit sound start times
/// must share this domain.
pub trait StreamClock: Send + Sync {
    /// Current stream time in seconds.
    fn now(&self) -> f64;
}

/// Stream clock backed by [`Instant`], starting at zero when created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Stream time of an arbitrary instant (negative if before the origin).
    pub fn at(&self, instant: Instant) -> f64 {
        match instant.checked_duration_since(self.origin) {
            Some(elapsed) => elapsed.as_secs_f64(),
            None => -self.origin.duration_since(instant).as_secs_f64(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamClock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock for offline mixing and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    time: AtomicF64,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            time: AtomicF64::new(start),
        }
    }

    pub fn set(&self, time: f64) {
        self.time.store(time, Ordering::Relaxed);
    }

    pub fn advance(&self, secs: f64) {
        self.set(self.now() + secs);
    }
}

impl StreamClock for ManualClock {
    fn now(&self) -> f64 {
        self.time.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1.0);
        assert_eq!(clock.now(), 1.0);
        clock.advance(0.5);
        assert_eq!(clock.now(), 1.5);
        clock.set(0.25);
        assert_eq!(clock.now(), 0.25);
        assert_eq!(ManualClock::default().now(), 0.0);
    }

    #[test]
    fn test_monotonic_clock_is_monotonic() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(a >= 0.0);
        assert!(b >= a);
    }

    #[test]
    fn test_monotonic_clock_at() {
        let clock = MonotonicClock::new();
        let later = clock.origin + Duration::from_millis(250);
        assert!((clock.at(later) - 0.25).abs() < 1e-9);
    }
}

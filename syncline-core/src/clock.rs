//! Monotonic time for the delay queues.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Opaque monotonic timestamp. Ordering and second-granularity addition are
/// the only operations the engine performs on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// Timestamp `secs` seconds after the clock origin.
    pub fn from_secs(secs: u64) -> Timestamp {
        Timestamp(Duration::from_secs(secs))
    }

    /// This timestamp shifted `secs` seconds into the future.
    pub fn add_secs(self, secs: u64) -> Timestamp {
        Timestamp(self.0 + Duration::from_secs(secs))
    }

    /// How long from `earlier` until this timestamp; zero if already passed.
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

/// Source of monotonic "now".
pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// Production clock anchored at construction time.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.origin.elapsed())
    }
}

/// Settable clock for tests. Time is stored atomically so a shared handle
/// can be advanced while the engine holds its own reference.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at_secs(secs: u64) -> Self {
        let clock = Self::new();
        clock.set_secs(secs);
        clock
    }

    pub fn set_secs(&self, secs: u64) {
        self.millis.store(secs * 1000, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.millis.fetch_add(secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(Duration::from_millis(self.millis.load(Ordering::SeqCst)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_ordering() {
        let t0 = Timestamp::from_secs(10);
        let t1 = t0.add_secs(5);
        assert!(t0 < t1);
        assert_eq!(t1, Timestamp::from_secs(15));
        assert_eq!(t1.min(t0), t0);
    }

    #[test]
    fn saturating_duration_never_underflows() {
        let t0 = Timestamp::from_secs(10);
        let t1 = Timestamp::from_secs(12);
        assert_eq!(t1.saturating_duration_since(t0), Duration::from_secs(2));
        assert_eq!(t0.saturating_duration_since(t1), Duration::ZERO);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at_secs(3);
        assert_eq!(clock.now(), Timestamp::from_secs(3));
        clock.advance_secs(4);
        assert_eq!(clock.now(), Timestamp::from_secs(7));
    }

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(a <= b);
    }
}

//! Clock capability: a single `now()` used for all expiration arithmetic.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Monotone "now", injected for testability.
///
/// All expiration arithmetic in the engine goes through a `Clock`; nothing
/// reads `SystemTime::now()` directly outside of `SystemClock`.
pub trait Clock: Send + Sync + 'static {
    /// Current instant, in ticks since the fixed epoch used by the schema
    /// (microseconds since the Unix epoch, UTC).
    fn now(&self) -> i64;
}

/// Wall-clock time, backed by `SystemTime::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0)
    }
}

/// Settable clock for tests. Starts at zero; advance or set explicitly.
#[derive(Debug, Default)]
pub struct VirtualClock {
    ticks: AtomicI64,
}

impl VirtualClock {
    /// A clock starting at the given tick value.
    pub fn at(ticks: i64) -> Self {
        Self {
            ticks: AtomicI64::new(ticks),
        }
    }

    /// Overwrite the current instant.
    pub fn set(&self, ticks: i64) {
        self.ticks.store(ticks, Ordering::SeqCst);
    }

    /// Move the clock forward by `delta` ticks, returning the new value.
    pub fn advance(&self, delta: i64) -> i64 {
        self.ticks.fetch_add(delta, Ordering::SeqCst) + delta
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> i64 {
        self.ticks.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_positive_and_increasing() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn virtual_clock_advances() {
        let clock = VirtualClock::at(100);
        assert_eq!(clock.now(), 100);
        assert_eq!(clock.advance(50), 150);
        assert_eq!(clock.now(), 150);
        clock.set(0);
        assert_eq!(clock.now(), 0);
    }
}

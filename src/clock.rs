//! Time sources for scheduling and record timestamps
//!
//! Scheduling decisions use the monotonic reading only; the wall clock is
//! consulted solely to stamp records, so clock adjustments never shift the
//! sampling loop.

use crate::scheduler::CancelToken;
use chrono::{DateTime, Local};
use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Monotonic and wall-clock time plus blocking sleep
pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin
    fn monotonic(&self) -> Duration;

    /// Current local wall-clock time
    fn wall_now(&self) -> DateTime<Local>;

    /// Block for `duration`, or until `cancel` is set
    fn sleep(&self, duration: Duration, cancel: &CancelToken);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn monotonic(&self) -> Duration {
        (**self).monotonic()
    }

    fn wall_now(&self) -> DateTime<Local> {
        (**self).wall_now()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) {
        (**self).sleep(duration, cancel)
    }
}

/// The host's real clocks
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose monotonic origin is now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }

    fn wall_now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) {
        cancel.wait_timeout(duration);
    }
}

/// Virtual clock that only moves when told to
///
/// `sleep` advances time instantly unless the run is already cancelled. Clones share the same time, so a test can
/// hand one clone to the code under test and advance another to model
/// sampling latency.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
    wall_origin: DateTime<Local>,
}

impl ManualClock {
    /// Start at zero with the wall clock anchored to `wall_origin`
    pub fn new(wall_origin: DateTime<Local>) -> Self {
        Self {
            now: Rc::new(Cell::new(Duration::ZERO)),
            wall_origin,
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn monotonic(&self) -> Duration {
        self.now.get()
    }

    fn wall_now(&self) -> DateTime<Local> {
        // Duration -> chrono: microsecond resolution is all records carry
        self.wall_origin + chrono::Duration::microseconds(self.now.get().as_micros() as i64)
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) {
        // A cancelled sleep returns at once
        if !cancel.is_cancelled() {
            self.advance(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_system_clock_sleep() {
        let clock = SystemClock::new();
        clock.sleep(Duration::from_millis(10), &CancelToken::new());
        let elapsed = clock.monotonic();
        assert!(elapsed >= Duration::from_millis(10));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let origin = Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(origin);
        let other = clock.clone();

        other.advance(Duration::from_millis(1500));
        clock.sleep(Duration::from_micros(250), &CancelToken::new());

        assert_eq!(clock.monotonic(), Duration::from_micros(1_500_250));
        assert_eq!(
            clock.wall_now(),
            origin + chrono::Duration::microseconds(1_500_250)
        );
    }

    #[test]
    fn test_system_clock_sleep_wakes_on_cancel() {
        let clock = SystemClock::new();
        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });

        clock.sleep(Duration::from_secs(30), &cancel);
        handle.join().unwrap();

        assert!(clock.monotonic() < Duration::from_secs(5));
    }

    #[test]
    fn test_manual_clock_cancelled_sleep_does_not_advance() {
        let clock = ManualClock::new(Local::now());
        let cancel = CancelToken::new();
        cancel.cancel();
        clock.sleep(Duration::from_secs(1), &cancel);
        assert_eq!(clock.monotonic(), Duration::ZERO);
    }
}

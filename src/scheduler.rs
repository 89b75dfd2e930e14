//! Fixed-rate, time-bounded sampling loop

use crate::clock::Clock;
use crate::error::{Error, Result};
use std::str::FromStr;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Shared stop flag, set from a signal handler and polled between ticks
///
/// Threads blocked in [`CancelToken::wait_timeout`] wake as soon as the token
/// is cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop at the next tick boundary
    pub fn cancel(&self) {
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.inner.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Block for up to `timeout`, returning early once cancelled
    ///
    /// # Returns
    /// `true` if the token is cancelled
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (cancelled, _) = self
            .inner
            .wake
            .wait_timeout_while(cancelled, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled
    }
}

/// How the wait between ticks is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    /// Sleep one full period after every tick; latency lowers the achieved rate
    #[default]
    FixedDelay,
    /// Sleep until the next period deadline; when behind, start the next tick
    /// immediately
    FixedRate,
}

impl FromStr for Pacing {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fixed-delay" => Ok(Pacing::FixedDelay),
            "fixed-rate" => Ok(Pacing::FixedRate),
            other => Err(Error::InvalidParameter(format!(
                "pacing must be 'fixed-delay' or 'fixed-rate', got '{}'",
                other
            ))),
        }
    }
}

/// Why a sub-run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The requested duration elapsed
    Elapsed,
    /// The cancel token was set
    Cancelled,
}

/// Result of one scheduler run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubRun {
    /// Number of completed ticks
    pub samples: u64,
    /// Time from start to exit
    pub elapsed: Duration,
    pub stop: StopReason,
}

/// Drives a sampling function at a target rate for a bounded wall time
pub struct SamplingScheduler<C: Clock> {
    clock: C,
    cancel: CancelToken,
    pacing: Pacing,
}

impl<C: Clock> SamplingScheduler<C> {
    pub fn new(clock: C, cancel: CancelToken) -> Self {
        Self {
            clock,
            cancel,
            pacing: Pacing::default(),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Sample at `rate_hz` until `duration` has elapsed
    ///
    /// Each tick calls `sample` and hands its result to `on_sample` together
    /// with the time since the run started, measured when the tick began.
    /// Termination is decided on elapsed time, never on a sample count, and
    /// sleeps are clamped to the time remaining, so the run ends no later than
    /// `duration` plus the latency of the last tick.
    ///
    /// The cancel token is checked before every tick and takes precedence over
    /// the elapsed-time check. A tick in progress is always completed; the wait
    /// after it ends as soon as the token is cancelled.
    ///
    /// # Returns
    /// * `Ok(SubRun)` - Ticks completed and why the loop stopped
    /// * `Err(Error)` - The first failure from `sample` or `on_sample`; the run
    ///   is abandoned immediately
    pub fn run<T, S, F>(
        &self,
        duration: Duration,
        rate_hz: f64,
        mut sample: S,
        mut on_sample: F,
    ) -> Result<SubRun>
    where
        S: FnMut() -> Result<T>,
        F: FnMut(T, Duration) -> Result<()>,
    {
        let period = period_for(rate_hz)?;
        let start = self.clock.monotonic();
        let mut next_deadline = period;
        let mut samples = 0u64;

        loop {
            let elapsed = self.clock.monotonic().saturating_sub(start);
            // A stop requested during the final tick still counts as a cancel
            if self.cancel.is_cancelled() {
                return Ok(SubRun {
                    samples,
                    elapsed,
                    stop: StopReason::Cancelled,
                });
            }
            if elapsed >= duration {
                return Ok(SubRun {
                    samples,
                    elapsed,
                    stop: StopReason::Elapsed,
                });
            }

            let value = sample()?;
            on_sample(value, elapsed)?;
            samples += 1;

            let now = self.clock.monotonic().saturating_sub(start);
            let wait = match self.pacing {
                Pacing::FixedDelay => period,
                Pacing::FixedRate => {
                    let wait = next_deadline.saturating_sub(now);
                    next_deadline += period;
                    wait
                }
            };
            let wait = wait.min(duration.saturating_sub(now));
            if !wait.is_zero() {
                self.clock.sleep(wait, &self.cancel);
            }
        }
    }
}

/// Sampling period for a rate in Hz
pub fn period_for(rate_hz: f64) -> Result<Duration> {
    if !rate_hz.is_finite() || rate_hz <= 0.0 {
        return Err(Error::InvalidParameter(format!(
            "Sample rate must be a positive number of Hz, got {}",
            rate_hz
        )));
    }
    Duration::try_from_secs_f64(1.0 / rate_hz).map_err(|e| {
        Error::InvalidParameter(format!("Sample rate {} Hz is out of range: {}", rate_hz, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Local;

    fn scheduler(clock: &ManualClock) -> SamplingScheduler<ManualClock> {
        SamplingScheduler::new(clock.clone(), CancelToken::new())
    }

    #[test]
    fn test_rejects_bad_rates() {
        for rate in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(period_for(rate), Err(Error::InvalidParameter(_))));
        }
        assert_eq!(period_for(100.0).unwrap(), Duration::from_millis(10));
    }

    #[test]
    fn test_pacing_from_str() {
        assert_eq!("fixed-rate".parse::<Pacing>().unwrap(), Pacing::FixedRate);
        assert_eq!("fixed-delay".parse::<Pacing>().unwrap(), Pacing::FixedDelay);
        assert!("asap".parse::<Pacing>().is_err());
    }

    #[test]
    fn test_zero_duration_takes_no_samples() {
        let clock = ManualClock::new(Local::now());
        let run = scheduler(&clock)
            .run(Duration::ZERO, 10.0, || Ok(()), |_, _| Ok(()))
            .unwrap();
        assert_eq!(run.samples, 0);
        assert_eq!(run.stop, StopReason::Elapsed);
    }

    #[test]
    fn test_time_bound_without_latency() {
        let clock = ManualClock::new(Local::now());
        let duration = Duration::from_secs(2);
        let mut stamps = Vec::new();

        let run = scheduler(&clock)
            .run(duration, 10.0, || Ok(()), |_, elapsed| {
                stamps.push(elapsed);
                Ok(())
            })
            .unwrap();

        assert_eq!(run.samples, 20);
        assert_eq!(run.elapsed, duration);
        assert_eq!(run.stop, StopReason::Elapsed);
        assert_eq!(stamps.first(), Some(&Duration::ZERO));
        assert!(stamps.iter().all(|&t| t < duration));
    }

    #[test]
    fn test_time_bound_with_latency() {
        // 7 ms of latency per tick at 100 Hz
        for pacing in [Pacing::FixedDelay, Pacing::FixedRate] {
            let clock = ManualClock::new(Local::now());
            let latency = clock.clone();
            let duration = Duration::from_millis(1234);
            let period = Duration::from_millis(10);
            let mut last_stamp = Duration::ZERO;

            let run = scheduler(&clock)
                .with_pacing(pacing)
                .run(
                    duration,
                    100.0,
                    || {
                        latency.advance(Duration::from_millis(7));
                        Ok(())
                    },
                    |_, elapsed| {
                        assert!(elapsed < duration);
                        last_stamp = elapsed;
                        Ok(())
                    },
                )
                .unwrap();

            assert!(run.elapsed >= duration, "{:?}", pacing);
            assert!(run.elapsed < duration + period, "{:?}", pacing);
            assert!(last_stamp < duration);
        }
    }

    #[test]
    fn test_fixed_delay_rate_degrades_with_latency() {
        let clock = ManualClock::new(Local::now());
        let latency = clock.clone();

        let run = scheduler(&clock)
            .run(
                Duration::from_secs(1),
                100.0,
                || {
                    latency.advance(Duration::from_millis(10));
                    Ok(())
                },
                |_, _| Ok(()),
            )
            .unwrap();

        // 20 ms per tick instead of 10 ms
        assert_eq!(run.samples, 50);
    }

    #[test]
    fn test_fixed_rate_compensates_latency() {
        let clock = ManualClock::new(Local::now());
        let latency = clock.clone();

        let run = scheduler(&clock)
            .with_pacing(Pacing::FixedRate)
            .run(
                Duration::from_secs(1),
                100.0,
                || {
                    latency.advance(Duration::from_millis(4));
                    Ok(())
                },
                |_, _| Ok(()),
            )
            .unwrap();

        assert_eq!(run.samples, 100);
    }

    #[test]
    fn test_sample_error_aborts() {
        let clock = ManualClock::new(Local::now());
        let mut calls = 0;
        let mut delivered = 0;

        let result = scheduler(&clock).run(
            Duration::from_secs(10),
            10.0,
            || {
                calls += 1;
                if calls == 4 {
                    Err(Error::Sink("boom".to_string()))
                } else {
                    Ok(calls)
                }
            },
            |_, _| {
                delivered += 1;
                Ok(())
            },
        );

        assert!(result.is_err());
        assert_eq!(calls, 4);
        assert_eq!(delivered, 3);
        assert_eq!(clock.monotonic(), Duration::from_millis(300));
    }

    #[test]
    fn test_cancel_stops_at_tick_boundary() {
        let clock = ManualClock::new(Local::now());
        let cancel = CancelToken::new();
        let sched = SamplingScheduler::new(clock.clone(), cancel.clone());
        let mut seen = 0;

        let run = sched
            .run(Duration::from_secs(60), 10.0, || Ok(()), |_, _| {
                seen += 1;
                if seen == 5 {
                    cancel.cancel();
                }
                Ok(())
            })
            .unwrap();

        // The tick that requested the stop still completes
        assert_eq!(run.samples, 5);
        assert_eq!(seen, 5);
        assert_eq!(run.stop, StopReason::Cancelled);
    }

    #[test]
    fn test_cancel_on_final_tick_reports_cancelled() {
        let clock = ManualClock::new(Local::now());
        let cancel = CancelToken::new();
        let sched = SamplingScheduler::new(clock.clone(), cancel.clone());
        let mut seen = 0;

        // 1 s at 10 Hz is exactly 10 ticks; the stop arrives during the last
        let run = sched
            .run(Duration::from_secs(1), 10.0, || Ok(()), |_, _| {
                seen += 1;
                if seen == 10 {
                    cancel.cancel();
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(run.samples, 10);
        assert_eq!(run.stop, StopReason::Cancelled);
    }

    #[test]
    fn test_cancelled_before_start_takes_no_samples() {
        let clock = ManualClock::new(Local::now());
        let cancel = CancelToken::new();
        cancel.cancel();

        let run = SamplingScheduler::new(clock.clone(), cancel)
            .run(Duration::from_secs(5), 10.0, || Ok(()), |_, _| Ok(()))
            .unwrap();

        assert_eq!(run.samples, 0);
        assert_eq!(run.stop, StopReason::Cancelled);
        assert_eq!(clock.monotonic(), Duration::ZERO);
    }

    #[test]
    fn test_cancel_interrupts_wait_between_ticks() {
        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        let sched = SamplingScheduler::new(crate::clock::SystemClock::new(), cancel);

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            canceller.cancel();
        });

        // One tick every 5 s
        let run = sched
            .run(Duration::from_secs(60), 0.2, || Ok(()), |_, _| Ok(()))
            .unwrap();
        handle.join().unwrap();

        assert_eq!(run.samples, 1);
        assert_eq!(run.stop, StopReason::Cancelled);
        assert!(run.elapsed < Duration::from_secs(2), "{:?}", run.elapsed);
    }

    #[test]
    fn test_wait_timeout_reports_cancel() {
        let cancel = CancelToken::new();
        assert!(!cancel.wait_timeout(Duration::from_millis(1)));
        cancel.cancel();
        assert!(cancel.wait_timeout(Duration::from_secs(10)));
    }
}

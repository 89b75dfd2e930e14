//! Phase-sequenced experiments coupling an actuator to sampling
//!
//! An [`ExperimentPlan`] is an ordered list of timed phases. [`Experiment::run`]
//! walks it once: before each phase the actuator is driven to that phase's
//! target state, then the phase is sampled for its full duration. Whatever
//! happens, the run ends with the actuator off and the sink closed.

use crate::actuator::Actuator;
use crate::bus::RegisterBus;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::mpu6050::Mpu6050;
use crate::record::{ExperimentRecord, RecordSink, Schema};
use crate::scheduler::{period_for, CancelToken, Pacing, SamplingScheduler, StopReason};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Length of the settle phases around an actuator hold
pub const DEFAULT_BASELINE: Duration = Duration::from_secs(5);
pub const DEFAULT_POST: Duration = Duration::from_secs(5);

/// Segment of an experiment a sample was taken in
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SamplePhase {
    Baseline,
    ActuatorOn,
    ActuatorOff,
    Recording,
    Named(String),
}

impl SamplePhase {
    pub fn as_str(&self) -> &str {
        match self {
            SamplePhase::Baseline => "baseline",
            SamplePhase::ActuatorOn => "actuator_on",
            SamplePhase::ActuatorOff => "actuator_off",
            SamplePhase::Recording => "recording",
            SamplePhase::Named(name) => name,
        }
    }
}

impl fmt::Display for SamplePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for SamplePhase {
    fn from(name: &str) -> Self {
        match name {
            "baseline" => SamplePhase::Baseline,
            "actuator_on" => SamplePhase::ActuatorOn,
            "actuator_off" => SamplePhase::ActuatorOff,
            "recording" => SamplePhase::Recording,
            other => SamplePhase::Named(other.to_string()),
        }
    }
}

/// One timed phase of a plan
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSpec {
    pub phase: SamplePhase,
    pub duration: Duration,
    /// Actuator target for the phase, `None` when no actuator is involved
    pub actuator: Option<bool>,
}

impl PhaseSpec {
    pub fn new(phase: SamplePhase, duration: Duration, actuator: Option<bool>) -> Self {
        Self {
            phase,
            duration,
            actuator,
        }
    }
}

impl FromStr for PhaseSpec {
    type Err = Error;

    /// Parse `NAME:SECONDS[:on|off]`
    fn from_str(s: &str) -> Result<Self> {
        let invalid = |why: &str| {
            Error::InvalidParameter(format!(
                "phase '{}' {} (expected NAME:SECONDS[:on|off])",
                s, why
            ))
        };

        let mut parts = s.split(':');
        let name = parts.next().map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Err(invalid("has no name"));
        }

        let seconds: f64 = parts
            .next()
            .ok_or_else(|| invalid("has no duration"))?
            .trim()
            .parse()
            .map_err(|_| invalid("has an unparseable duration"))?;
        let duration = Duration::try_from_secs_f64(seconds)
            .map_err(|_| invalid("has a negative or non-finite duration"))?;

        let actuator = match parts.next().map(str::trim) {
            None => None,
            Some("on") | Some("1") => Some(true),
            Some("off") | Some("0") => Some(false),
            Some(_) => return Err(invalid("has an actuator state other than on/off")),
        };

        if parts.next().is_some() {
            return Err(invalid("has too many fields"));
        }

        Ok(Self::new(SamplePhase::from(name), duration, actuator))
    }
}

/// Ordered, immutable sequence of phases
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentPlan {
    phases: Vec<PhaseSpec>,
}

impl ExperimentPlan {
    /// Validate and freeze a list of phases
    ///
    /// Either every phase names an actuator state or none does.
    pub fn new(phases: Vec<PhaseSpec>) -> Result<Self> {
        if phases.is_empty() {
            return Err(Error::InvalidParameter(
                "An experiment plan needs at least one phase".to_string(),
            ));
        }

        let coupled = phases.iter().filter(|p| p.actuator.is_some()).count();
        if coupled != 0 && coupled != phases.len() {
            return Err(Error::InvalidParameter(
                "Either all phases or none must set an actuator state".to_string(),
            ));
        }

        Ok(Self { phases })
    }

    /// Baseline (off), hold (on), post (off)
    pub fn paired(baseline: Duration, hold: Duration, post: Duration) -> Self {
        Self {
            phases: vec![
                PhaseSpec::new(SamplePhase::Baseline, baseline, Some(false)),
                PhaseSpec::new(SamplePhase::ActuatorOn, hold, Some(true)),
                PhaseSpec::new(SamplePhase::ActuatorOff, post, Some(false)),
            ],
        }
    }

    /// Paired plan with the default 5 s settle phases
    pub fn paired_default(hold: Duration) -> Self {
        Self::paired(DEFAULT_BASELINE, hold, DEFAULT_POST)
    }

    /// A single passive recording phase with no actuator
    pub fn recording(duration: Duration) -> Self {
        Self {
            phases: vec![PhaseSpec::new(SamplePhase::Recording, duration, None)],
        }
    }

    pub fn phases(&self) -> &[PhaseSpec] {
        &self.phases
    }

    /// Sum of all phase durations
    pub fn total_duration(&self) -> Duration {
        self.phases.iter().map(|p| p.duration).sum()
    }

    /// Whether the plan drives an actuator
    pub fn is_actuator_coupled(&self) -> bool {
        self.phases.iter().any(|p| p.actuator.is_some())
    }
}

impl fmt::Display for ExperimentPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.phases.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{} {:.1}s", p.phase, p.duration.as_secs_f64())?;
            match p.actuator {
                Some(true) => f.write_str(" (on)")?,
                Some(false) => f.write_str(" (off)")?,
                None => {}
            }
        }
        Ok(())
    }
}

/// How a run ended without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every phase ran to its full duration
    Completed,
    /// The operator stopped the run
    Interrupted {
        phase: SamplePhase,
        phase_index: usize,
        /// 1-based index of the last sample captured, 0 if none was
        sample: u64,
    },
}

/// Totals for a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Records written to the sink
    pub records: u64,
    pub elapsed: Duration,
    pub outcome: RunOutcome,
}

/// Owns the sensor and clock for a sequence of phase runs
pub struct Experiment<B: RegisterBus, C: Clock> {
    sensor: Mpu6050<B>,
    clock: C,
    cancel: CancelToken,
    sample_rate_hz: f64,
    pacing: Pacing,
}

impl<B: RegisterBus, C: Clock> Experiment<B, C> {
    pub fn new(sensor: Mpu6050<B>, clock: C, sample_rate_hz: f64) -> Self {
        Self {
            sensor,
            clock,
            cancel: CancelToken::new(),
            sample_rate_hz,
            pacing: Pacing::default(),
        }
    }

    /// Stop early when `cancel` is set
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    /// Hand back the sensor
    pub fn into_sensor(self) -> Mpu6050<B> {
        self.sensor
    }

    /// Execute `plan` from start to finish
    ///
    /// The actuator starts off and is switched synchronously at each phase
    /// boundary. On every exit path, including errors and interrupts, the
    /// actuator is forced off and closed and the sink is closed. Errors raised
    /// mid-run are wrapped in [`Error::Aborted`] with the phase and sample
    /// index where the run stopped.
    ///
    /// # Returns
    /// * `Ok(RunSummary)` - All phases completed, or the run was cancelled
    /// * `Err(Error)` - The first fatal error; records captured before it have
    ///   been flushed
    pub fn run(
        &mut self,
        plan: &ExperimentPlan,
        actuator: Option<&mut dyn Actuator>,
        sink: &mut dyn RecordSink,
    ) -> Result<RunSummary> {
        period_for(self.sample_rate_hz)?;
        if plan.is_actuator_coupled() && actuator.is_none() {
            return Err(Error::InvalidParameter(
                "The plan switches an actuator but none is attached".to_string(),
            ));
        }

        let mut guard = RunGuard {
            actuator,
            sink,
            released: false,
        };
        let result = self.run_phases(plan, &mut guard);
        let cleanup = guard.release();

        match (result, cleanup) {
            (Ok(summary), Ok(())) => Ok(summary),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup_err)) => {
                log::error!("Cleanup after failed run also failed: {}", cleanup_err);
                Err(e)
            }
        }
    }

    fn run_phases(&mut self, plan: &ExperimentPlan, guard: &mut RunGuard<'_, '_>) -> Result<RunSummary> {
        let Self {
            sensor,
            clock,
            cancel,
            sample_rate_hz,
            pacing,
        } = self;
        let clock = &*clock;
        let rate = *sample_rate_hz;
        let scheduler = SamplingScheduler::new(clock, cancel.clone()).with_pacing(*pacing);

        let schema = Schema {
            motor_state: plan.is_actuator_coupled(),
            sample_rate_hz: rate,
            phases: plan.phases().iter().map(|p| p.phase.to_string()).collect(),
        };
        guard.sink.begin(&schema)?;

        let run_start = clock.monotonic();
        let mut records = 0u64;
        let mut current = None;

        if guard.actuator.is_some() {
            guard
                .set_actuator(false)
                .map_err(|e| aborted(&plan.phases()[0].phase, 1, e))?;
            current = Some(false);
        }

        for (index, spec) in plan.phases().iter().enumerate() {
            // Never switch into the next phase once a stop has been requested
            if cancel.is_cancelled() {
                let last = index.saturating_sub(1);
                let phase = &plan.phases()[last].phase;
                log::warn!(
                    "Recording stopped by user in phase '{}' after {} samples",
                    phase,
                    records
                );
                return Ok(interrupted(
                    phase,
                    last,
                    records,
                    clock.monotonic().saturating_sub(run_start),
                ));
            }

            if let Some(target) = spec.actuator {
                if current != Some(target) {
                    log::info!("Actuator {}", if target { "ON" } else { "OFF" });
                }
                guard
                    .set_actuator(target)
                    .map_err(|e| aborted(&spec.phase, records + 1, e))?;
                current = Some(target);
            }

            log::info!(
                "Phase {}/{} '{}' for {:.1} s",
                index + 1,
                plan.phases().len(),
                spec.phase,
                spec.duration.as_secs_f64()
            );

            let phase_start = clock.monotonic().saturating_sub(run_start);
            let sink = &mut *guard.sink;
            let sub = scheduler
                .run(
                    spec.duration,
                    rate,
                    || sensor.get_sample(),
                    |sample, elapsed| {
                        let record = ExperimentRecord {
                            timestamp: clock.wall_now(),
                            elapsed: phase_start + elapsed,
                            phase: spec.phase.clone(),
                            phase_index: index,
                            motor_state: spec.actuator,
                            sample,
                        };
                        sink.write(&record)?;
                        records += 1;
                        log::trace!("#{} {:?}", records, record.sample);
                        Ok(())
                    },
                )
                .map_err(|e| aborted(&spec.phase, records + 1, e))?;

            log::info!(
                "Phase '{}' finished: {} samples in {:.2} s",
                spec.phase,
                sub.samples,
                sub.elapsed.as_secs_f64()
            );

            if sub.stop == StopReason::Cancelled {
                log::warn!(
                    "Recording stopped by user in phase '{}' after {} samples",
                    spec.phase,
                    records
                );
                return Ok(interrupted(
                    &spec.phase,
                    index,
                    records,
                    clock.monotonic().saturating_sub(run_start),
                ));
            }
        }

        Ok(RunSummary {
            records,
            elapsed: clock.monotonic().saturating_sub(run_start),
            outcome: RunOutcome::Completed,
        })
    }
}

fn interrupted(phase: &SamplePhase, phase_index: usize, records: u64, elapsed: Duration) -> RunSummary {
    RunSummary {
        records,
        elapsed,
        outcome: RunOutcome::Interrupted {
            phase: phase.clone(),
            phase_index,
            sample: records,
        },
    }
}

fn aborted(phase: &SamplePhase, sample: u64, source: Error) -> Error {
    Error::Aborted {
        phase: phase.to_string(),
        sample,
        source: Box::new(source),
    }
}

/// Resources held for one run; released exactly once
///
/// `release` is called on every normal and error path. The `Drop` impl covers
/// unwinding, where errors can only be logged.
struct RunGuard<'a, 's> {
    actuator: Option<&'a mut dyn Actuator>,
    sink: &'s mut dyn RecordSink,
    released: bool,
}

impl RunGuard<'_, '_> {
    fn set_actuator(&mut self, on: bool) -> Result<()> {
        match self.actuator.as_mut() {
            Some(actuator) => actuator.set_state(on),
            None => Ok(()),
        }
    }

    /// Actuator off, actuator closed, sink closed; every step is attempted
    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut first_err = None;
        if let Some(actuator) = self.actuator.as_mut() {
            if let Err(e) = actuator.set_state(false) {
                log::error!("Failed to switch actuator off: {}", e);
                first_err.get_or_insert(e);
            }
            if let Err(e) = actuator.close() {
                log::error!("Failed to close actuator: {}", e);
                first_err.get_or_insert(e);
            }
        }
        if let Err(e) = self.sink.close() {
            log::error!("Failed to close record sink: {}", e);
            first_err.get_or_insert(e);
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for RunGuard<'_, '_> {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

//! MPU6050 acquisition and actuator-coupled experiment library
//!
//! This library reads the MPU6050 6-axis motion sensor over a register bus,
//! samples it at a fixed rate for bounded durations, and sequences timed
//! experiment phases that switch an actuator (such as a motor on a GPIO line)
//! in step with sampling. Every sample is persisted as a timestamped record.
//!
//! # Quick Start
//!
//! ## Reading a Sample
//! ```
//! use mpu6050_experiment::{Mpu6050, SimulatedBus, MPU6050_ADDRESS};
//!
//! let bus = SimulatedBus::at_rest(MPU6050_ADDRESS);
//! let mut sensor = Mpu6050::new(bus, MPU6050_ADDRESS)?;
//! let sample = sensor.get_sample()?;
//!
//! println!("Accel Z: {:.2}g", sample.acc_z);
//! println!("Temp: {:.1}°C", sample.temp);
//! # Ok::<(), mpu6050_experiment::Error>(())
//! ```
//!
//! ## Passive Recording to CSV
//! ```no_run
//! use mpu6050_experiment::{
//!     CsvRecordSink, Experiment, ExperimentPlan, I2cBus, Mpu6050, SystemClock, MPU6050_ADDRESS,
//! };
//! use std::time::Duration;
//!
//! let sensor = Mpu6050::new(I2cBus::open(1)?, MPU6050_ADDRESS)?;
//! let mut sink = CsvRecordSink::create("mpu6050_data.csv")?;
//!
//! // 60 seconds at 10 Hz
//! let mut experiment = Experiment::new(sensor, SystemClock::new(), 10.0);
//! let summary = experiment.run(&ExperimentPlan::recording(Duration::from_secs(60)), None, &mut sink)?;
//! println!("Captured {} records", summary.records);
//! # Ok::<(), mpu6050_experiment::Error>(())
//! ```
//!
//! ## Motor Experiment
//! ```no_run
//! use mpu6050_experiment::{
//!     CancelToken, CsvRecordSink, Experiment, ExperimentPlan, GpioActuator, I2cBus, Mpu6050,
//!     SystemClock, MPU6050_ADDRESS,
//! };
//! use std::time::Duration;
//!
//! let sensor = Mpu6050::new(I2cBus::open(1)?, MPU6050_ADDRESS)?;
//! let mut motor = GpioActuator::open(18)?;
//! let mut sink = CsvRecordSink::create("motor_data.csv")?;
//!
//! let cancel = CancelToken::new();
//! let mut experiment = Experiment::new(sensor, SystemClock::new(), 100.0)
//!     .with_cancel_token(cancel.clone());
//!
//! // 5 s baseline, motor on for 30 s, 5 s after
//! let plan = ExperimentPlan::paired_default(Duration::from_secs(30));
//! experiment.run(&plan, Some(&mut motor), &mut sink)?;
//! # Ok::<(), mpu6050_experiment::Error>(())
//! ```

pub mod actuator;
pub mod bus;
pub mod clock;
pub mod common;
pub mod error;
pub mod experiment;
#[cfg(feature = "hdf5")]
pub mod hdf5_format;
#[cfg(target_os = "linux")]
pub mod hw;
pub mod mpu6050;
pub mod record;
pub mod scheduler;

// Re-export public API
pub use actuator::{Actuator, SimulatedActuator};
pub use bus::{RegisterBus, SimulatedBus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BusError, Error, Result};
pub use experiment::{
    Experiment, ExperimentPlan, PhaseSpec, RunOutcome, RunSummary, SamplePhase,
};
#[cfg(feature = "hdf5")]
pub use hdf5_format::Hdf5RecordSink;
#[cfg(target_os = "linux")]
pub use hw::{GpioActuator, I2cBus};
pub use mpu6050::{Mpu6050, RawSample, SensorSample, MPU6050_ADDRESS};
pub use record::{output_filename, CsvRecordSink, ExperimentRecord, MemorySink, RecordSink, Schema};
pub use scheduler::{CancelToken, Pacing, SamplingScheduler, StopReason, SubRun};

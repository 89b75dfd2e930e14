//! Motor experiment - Actuator-coupled data collection
//!
//! Records a baseline with the motor off, holds the motor on, then records the
//! run-down with the motor off again. The motor is always left off on exit.
//!
//! Usage:
//!   motor-experiment --pin 18 --hold 30 --rate 100
//!   motor-experiment --phase settle:10:off --phase spin:60:on --phase coast:20:off

use chrono::Local;
use clap::Parser;
use mpu6050_experiment::common::{self, parse_address};
use mpu6050_experiment::scheduler::period_for;
use mpu6050_experiment::{
    output_filename, Actuator, CancelToken, Error, Experiment, ExperimentPlan, Mpu6050, Pacing, PhaseSpec,
    SystemClock,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "motor-experiment")]
#[command(about = "Switch a motor through timed phases while recording MPU6050 data", long_about = None)]
struct Args {
    /// Motor GPIO pin (BCM numbering)
    #[arg(short, long, default_value = "18")]
    pin: u8,

    /// Seconds to hold the motor on
    #[arg(long, default_value = "30")]
    hold: f64,

    /// Seconds of baseline recording before the motor starts
    #[arg(long, default_value = "5")]
    baseline: f64,

    /// Seconds of recording after the motor stops
    #[arg(long, default_value = "5")]
    post: f64,

    /// Custom phase NAME:SECONDS[:on|off], repeatable; replaces the default plan
    #[arg(long = "phase", value_name = "NAME:SECONDS[:on|off]")]
    phases: Vec<PhaseSpec>,

    /// Target sample rate in Hz
    #[arg(short, long, default_value = "100")]
    rate: f64,

    /// Output file (default: motor_data_<timestamp>.csv; .h5 needs the hdf5 feature)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// I2C bus number (/dev/i2c-N)
    #[arg(long, default_value = "1")]
    bus: u8,

    /// Sensor I2C address
    #[arg(long, default_value = "0x68", value_parser = parse_address)]
    address: u8,

    /// Inter-sample wait: "fixed-delay" or "fixed-rate"
    #[arg(long, default_value = "fixed-delay")]
    pacing: Pacing,

    /// Use a simulated sensor and motor instead of hardware
    #[arg(long)]
    simulate: bool,
}

fn seconds(name: &str, value: f64) -> Result<Duration, Error> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        Error::InvalidParameter(format!("--{} must be >= 0 seconds, got {}", name, value))
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    common::init_logging();
    let args = Args::parse();
    period_for(args.rate)?;

    let plan = if args.phases.is_empty() {
        ExperimentPlan::paired(
            seconds("baseline", args.baseline)?,
            seconds("hold", args.hold)?,
            seconds("post", args.post)?,
        )
    } else {
        ExperimentPlan::new(args.phases.clone())?
    };
    let output = args
        .output
        .unwrap_or_else(|| output_filename("motor_data", Local::now()));

    println!("Motor Experiment");
    println!("================");
    println!("Plan: {}", plan);
    println!(
        "Total: {:.1} seconds at {} Hz",
        plan.total_duration().as_secs_f64(),
        args.rate
    );
    println!("Saving to {}", output.display());
    println!();

    // Claim the motor first so it is held low before anything else happens
    let mut motor = if plan.is_actuator_coupled() {
        Some(common::open_actuator(args.pin, args.simulate)?)
    } else {
        None
    };

    let bus = common::open_bus(args.bus, args.simulate, args.address)?;
    let sensor = Mpu6050::new(bus, args.address)?;
    let mut sink = common::open_sink(&output, args.rate)?;

    let cancel = CancelToken::new();
    common::install_interrupt_handler(&cancel)?;

    let mut experiment = Experiment::new(sensor, SystemClock::new(), args.rate)
        .with_cancel_token(cancel)
        .with_pacing(args.pacing);

    println!("Starting experiment... Press Ctrl+C to stop\n");

    let result = experiment.run(
        &plan,
        motor.as_mut().map(|m| m.as_mut() as &mut dyn Actuator),
        sink.as_mut(),
    );

    match result {
        Ok(summary) => {
            common::print_summary(&summary, &output);
            Ok(())
        }
        Err(e) => {
            eprintln!("\nError during experiment: {}", e);
            eprintln!("Motor switched off; samples captured before the error were saved to {}", output.display());
            Err(e.into())
        }
    }
}

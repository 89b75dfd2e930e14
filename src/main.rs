//! MPU6050 recorder - Passive data recording
//!
//! Samples the MPU6050 at a fixed rate for a fixed duration and writes every
//! reading to a timestamped CSV file.
//!
//! Usage:
//!   mpu6050-recorder --duration 60 --rate 10

use chrono::Local;
use clap::Parser;
use mpu6050_experiment::common::{self, parse_address};
use mpu6050_experiment::scheduler::period_for;
use mpu6050_experiment::{
    output_filename, CancelToken, Error, Experiment, ExperimentPlan, Mpu6050, Pacing,
    SystemClock,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "mpu6050-recorder")]
#[command(about = "Record MPU6050 readings to a timestamped CSV file", long_about = None)]
struct Args {
    /// Recording duration in seconds
    #[arg(short, long, default_value = "60")]
    duration: f64,

    /// Target sample rate in Hz
    #[arg(short, long, default_value = "10")]
    rate: f64,

    /// Output file (default: mpu6050_data_<timestamp>.csv; .h5 needs the hdf5 feature)
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

    /// Use a simulated sensor instead of the I2C bus
    #[arg(long)]
    simulate: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    common::init_logging();
    let args = Args::parse();
    period_for(args.rate)?;

    let duration = Duration::try_from_secs_f64(args.duration).map_err(|_| {
        Error::InvalidParameter(format!("Duration must be >= 0 seconds, got {}", args.duration))
    })?;
    let output = args
        .output
        .unwrap_or_else(|| output_filename("mpu6050_data", Local::now()));

    println!("MPU6050 Recorder");
    println!("================");
    println!("Recording data for {} seconds at {} Hz", args.duration, args.rate);
    println!("Saving to {}", output.display());
    println!();

    let bus = common::open_bus(args.bus, args.simulate, args.address)?;
    let sensor = Mpu6050::new(bus, args.address)?;
    let mut sink = common::open_sink(&output, args.rate)?;

    let cancel = CancelToken::new();
    common::install_interrupt_handler(&cancel)?;

    let mut experiment = Experiment::new(sensor, SystemClock::new(), args.rate)
        .with_cancel_token(cancel)
        .with_pacing(args.pacing);

    println!("Press Ctrl+C to stop\n");

    match experiment.run(&ExperimentPlan::recording(duration), None, sink.as_mut()) {
        Ok(summary) => {
            common::print_summary(&summary, &output);
            Ok(())
        }
        Err(e) => {
            eprintln!("\nError during recording: {}", e);
            eprintln!("Samples captured before the error were saved to {}", output.display());
            Err(e.into())
        }
    }
}

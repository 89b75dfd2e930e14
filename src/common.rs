//! Common setup shared across programs

use crate::actuator::{Actuator, SimulatedActuator};
use crate::bus::{RegisterBus, SimulatedBus};
use crate::error::{Error, Result};
use crate::experiment::{RunOutcome, RunSummary};
use crate::record::{CsvRecordSink, RecordSink};
use crate::scheduler::{period_for, CancelToken};
use std::path::Path;

/// Route `log` output to stderr, `info` and above unless `RUST_LOG` says otherwise
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Parse a device address given in hex (`0x68`) or decimal (`104`)
pub fn parse_address(s: &str) -> std::result::Result<u8, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    match parsed {
        Ok(addr) if addr <= 0x7F => Ok(addr),
        Ok(addr) => Err(format!("0x{:02X} is not a 7-bit I2C address", addr)),
        Err(e) => Err(format!("invalid address '{}': {}", s, e)),
    }
}

/// Open the I2C bus, or a simulated device at rest
pub fn open_bus(bus: u8, simulate: bool, address: u8) -> Result<Box<dyn RegisterBus>> {
    if simulate {
        log::info!("Using simulated sensor at 0x{:02X}", address);
        return Ok(Box::new(SimulatedBus::at_rest(address)));
    }
    open_hardware_bus(bus)
}

#[cfg(target_os = "linux")]
fn open_hardware_bus(bus: u8) -> Result<Box<dyn RegisterBus>> {
    Ok(Box::new(crate::hw::I2cBus::open(bus)?))
}

#[cfg(not(target_os = "linux"))]
fn open_hardware_bus(bus: u8) -> Result<Box<dyn RegisterBus>> {
    Err(Error::InvalidParameter(format!(
        "I2C bus {} is only available on Linux; use --simulate",
        bus
    )))
}

/// Claim the actuator GPIO, or a simulated one
pub fn open_actuator(pin: u8, simulate: bool) -> Result<Box<dyn Actuator>> {
    if simulate {
        log::info!("Using simulated actuator in place of GPIO{}", pin);
        return Ok(Box::new(SimulatedActuator::new()));
    }
    open_hardware_actuator(pin)
}

#[cfg(target_os = "linux")]
fn open_hardware_actuator(pin: u8) -> Result<Box<dyn Actuator>> {
    Ok(Box::new(crate::hw::GpioActuator::open(pin)?))
}

#[cfg(not(target_os = "linux"))]
fn open_hardware_actuator(pin: u8) -> Result<Box<dyn Actuator>> {
    Err(Error::Actuator(format!(
        "GPIO{} is only available on Linux; use --simulate",
        pin
    )))
}

/// Create the output sink; `.h5` paths use HDF5 when built with the `hdf5` feature
///
/// The sample rate is validated first so a bad rate never leaves an empty
/// output file behind.
pub fn open_sink(path: &Path, rate_hz: f64) -> Result<Box<dyn RecordSink>> {
    period_for(rate_hz)?;

    let is_hdf5 = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("h5"));

    if is_hdf5 {
        #[cfg(feature = "hdf5")]
        return Ok(Box::new(crate::hdf5_format::Hdf5RecordSink::create(path)?));

        #[cfg(not(feature = "hdf5"))]
        return Err(Error::InvalidParameter(format!(
            "{} requires a build with the hdf5 feature",
            path.display()
        )));
    }

    Ok(Box::new(CsvRecordSink::create(path)?))
}

/// Cancel `token` on Ctrl+C
pub fn install_interrupt_handler(token: &CancelToken) -> std::result::Result<(), ctrlc::Error> {
    let token = token.clone();
    ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping after the current sample...");
        token.cancel();
    })
}

/// Print the end-of-run report
pub fn print_summary(summary: &RunSummary, output: &Path) {
    let elapsed = summary.elapsed.as_secs_f64();
    let rate = if elapsed > 0.0 {
        summary.records as f64 / elapsed
    } else {
        0.0
    };

    match &summary.outcome {
        RunOutcome::Completed => println!("\nRun complete!"),
        RunOutcome::Interrupted {
            phase,
            phase_index,
            sample,
        } => println!(
            "\nRun stopped by user during phase {} ('{}') after sample {}",
            phase_index + 1,
            phase,
            sample
        ),
    }
    println!("Total samples: {}", summary.records);
    println!("Elapsed time: {:.2} seconds", elapsed);
    println!("Actual sample rate: {:.1} Hz", rate);
    println!("Data saved to {}", output.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x68"), Ok(0x68));
        assert_eq!(parse_address("0X69"), Ok(0x69));
        assert_eq!(parse_address("104"), Ok(0x68));
        assert!(parse_address("0x80").is_err());
        assert!(parse_address("zz").is_err());
    }

    #[test]
    fn test_open_simulated_hardware() {
        let mut bus = open_bus(1, true, 0x68).unwrap();
        assert_eq!(bus.read_byte(0x68, 0x3F).unwrap(), 0x40);

        let mut actuator = open_actuator(18, true).unwrap();
        actuator.set_state(true).unwrap();
        actuator.close().unwrap();
        actuator.close().unwrap();
    }

    #[cfg(not(feature = "hdf5"))]
    #[test]
    fn test_hdf5_path_needs_feature() {
        let err = open_sink(Path::new("run.h5"), 10.0).err().unwrap();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn test_bad_rate_creates_no_output() {
        let path = std::env::temp_dir().join(format!("bad_rate_{}.csv", std::process::id()));
        let _ = std::fs::remove_file(&path);

        for rate in [0.0, -1.0, f64::NAN] {
            let err = open_sink(&path, rate).err().unwrap();
            assert!(matches!(err, Error::InvalidParameter(_)));
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_open_csv_sink() {
        let path = std::env::temp_dir().join(format!("good_rate_{}.csv", std::process::id()));
        let mut sink = open_sink(&path, 10.0).unwrap();
        sink.close().unwrap();
        assert!(path.exists());
        let _ = std::fs::remove_file(&path);
    }
}

//! Error types for sensor acquisition and experiment runs

use thiserror::Error;

/// Transport-level failure on the register bus
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus adapter could not be opened
    #[error("cannot open I2C bus {bus}: {reason}")]
    Open { bus: u8, reason: String },

    /// Reading a register failed
    #[error("read of register 0x{register:02X} on device 0x{device:02X} failed: {reason}")]
    Read {
        device: u8,
        register: u8,
        reason: String,
    },

    /// Writing a register failed
    #[error("write of 0x{value:02X} to register 0x{register:02X} on device 0x{device:02X} failed: {reason}")]
    Write {
        device: u8,
        register: u8,
        value: u8,
        reason: String,
    },
}

/// Error type for acquisition and experiment operations
#[derive(Error, Debug)]
pub enum Error {
    /// Device did not accept the wake-up write
    #[error("sensor initialization failed: {0}")]
    SensorInit(#[source] BusError),

    /// Register transfer failed while sampling
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// Actuator command failed
    #[error("actuator error: {0}")]
    Actuator(String),

    /// Record persistence failed
    #[error("sink error: {0}")]
    Sink(String),

    /// Invalid parameter
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A fatal error raised while a run was in progress
    #[error("run aborted in phase '{phase}' at sample {sample}: {source}")]
    Aborted {
        phase: String,
        /// 1-based index of the sample being captured when the run failed
        sample: u64,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// The underlying error, looking through `Aborted` context
    pub fn root(&self) -> &Error {
        match self {
            Error::Aborted { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Sink(err.to_string())
    }
}

/// Result type for acquisition operations
pub type Result<T> = std::result::Result<T, Error>;

//! MPU6050 sensor driver over a generic register bus

use crate::bus::RegisterBus;
use crate::error::{Error, Result};

/// Default I2C address (AD0 low)
pub const MPU6050_ADDRESS: u8 = 0x68;

// MPU6050 Register addresses
const REG_PWR_MGMT_1: u8 = 0x6B;
pub const REG_ACCEL_XOUT_H: u8 = 0x3B;
pub const REG_ACCEL_YOUT_H: u8 = 0x3D;
pub const REG_ACCEL_ZOUT_H: u8 = 0x3F;
pub const REG_TEMP_OUT_H: u8 = 0x41;
pub const REG_GYRO_XOUT_H: u8 = 0x43;
pub const REG_GYRO_YOUT_H: u8 = 0x45;
pub const REG_GYRO_ZOUT_H: u8 = 0x47;

// ACCEL_XOUT_H through GYRO_ZOUT_L
const DATA_BLOCK_LEN: usize = 14;

const ACCEL_SCALE: f64 = 16384.0; // LSB/g for +/-2g range
const GYRO_SCALE: f64 = 131.0; // LSB/(°/s) for +/-250°/s range
const TEMP_SCALE: f64 = 340.0; // LSB/°C
const TEMP_OFFSET: f64 = 36.53; // °C

/// Combine a high/low register pair into a two's-complement value
pub fn decode_pair(high: u8, low: u8) -> i16 {
    i16::from_be_bytes([high, low])
}

/// Raw acceleration to g
pub fn accel_to_g(raw: i16) -> f64 {
    raw as f64 / ACCEL_SCALE
}

/// Raw angular rate to degrees/second
pub fn gyro_to_dps(raw: i16) -> f64 {
    raw as f64 / GYRO_SCALE
}

/// Raw temperature to °C
pub fn temp_to_celsius(raw: i16) -> f64 {
    raw as f64 / TEMP_SCALE + TEMP_OFFSET
}

/// Undecoded register values for one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSample {
    pub accel_x: i16,
    pub accel_y: i16,
    pub accel_z: i16,
    pub gyro_x: i16,
    pub gyro_y: i16,
    pub gyro_z: i16,
    pub temp: i16,
}

impl RawSample {
    /// Decode the 14-byte block starting at ACCEL_XOUT_H
    fn from_block(block: &[u8; DATA_BLOCK_LEN]) -> Self {
        // Offsets follow the register map: accel 0x3B..0x40, temp 0x41..0x42,
        // gyro 0x43..0x48.
        let pair = |register: u8| {
            let i = (register - REG_ACCEL_XOUT_H) as usize;
            decode_pair(block[i], block[i + 1])
        };

        Self {
            accel_x: pair(REG_ACCEL_XOUT_H),
            accel_y: pair(REG_ACCEL_YOUT_H),
            accel_z: pair(REG_ACCEL_ZOUT_H),
            gyro_x: pair(REG_GYRO_XOUT_H),
            gyro_y: pair(REG_GYRO_YOUT_H),
            gyro_z: pair(REG_GYRO_ZOUT_H),
            temp: pair(REG_TEMP_OUT_H),
        }
    }
}

/// One reading in physical units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorSample {
    /// Acceleration in g
    pub acc_x: f64,
    pub acc_y: f64,
    pub acc_z: f64,
    /// Angular rate in °/s
    pub gyro_x: f64,
    pub gyro_y: f64,
    pub gyro_z: f64,
    /// Die temperature in °C
    pub temp: f64,
}

impl From<RawSample> for SensorSample {
    fn from(raw: RawSample) -> Self {
        Self {
            acc_x: accel_to_g(raw.accel_x),
            acc_y: accel_to_g(raw.accel_y),
            acc_z: accel_to_g(raw.accel_z),
            gyro_x: gyro_to_dps(raw.gyro_x),
            gyro_y: gyro_to_dps(raw.gyro_y),
            gyro_z: gyro_to_dps(raw.gyro_z),
            temp: temp_to_celsius(raw.temp),
        }
    }
}

/// MPU6050 sensor interface
///
/// Owns its bus for the lifetime of the driver. Holds no per-sample state, so
/// reading the same register contents twice yields identical samples.
pub struct Mpu6050<B: RegisterBus> {
    bus: B,
    address: u8,
}

impl<B: RegisterBus> Mpu6050<B> {
    /// Take ownership of `bus` and wake the device at `address`
    ///
    /// # Returns
    /// * `Ok(Mpu6050)` - Awake sensor
    /// * `Err(Error::SensorInit)` - The wake-up write was not accepted
    pub fn new(mut bus: B, address: u8) -> Result<Self> {
        // Clear the sleep bit
        bus.write_byte(address, REG_PWR_MGMT_1, 0x00)
            .map_err(Error::SensorInit)?;

        log::debug!("MPU6050 at 0x{:02X} woken up", address);
        Ok(Self { bus, address })
    }

    /// Device address on the bus
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Read the signed value of the register pair starting at `high`
    pub fn read_axis_pair(&mut self, high: u8) -> Result<i16> {
        let mut buf = [0u8; 2];
        self.bus.read_registers(self.address, high, &mut buf)?;
        Ok(decode_pair(buf[0], buf[1]))
    }

    /// Read accelerometer, temperature and gyroscope registers without conversion
    ///
    /// All 14 bytes are fetched with one burst so the channels come from the
    /// same instant. A failed transfer discards the whole sample.
    pub fn read_raw(&mut self) -> Result<RawSample> {
        let mut block = [0u8; DATA_BLOCK_LEN];
        self.bus
            .read_registers(self.address, REG_ACCEL_XOUT_H, &mut block)?;
        Ok(RawSample::from_block(&block))
    }

    /// Read one sample in physical units
    pub fn get_sample(&mut self) -> Result<SensorSample> {
        self.read_raw().map(SensorSample::from)
    }

    /// Give the bus back
    pub fn release(self) -> B {
        self.bus
    }
}

//! Raspberry Pi hardware: I2C register bus and GPIO actuator

use crate::actuator::Actuator;
use crate::bus::RegisterBus;
use crate::error::{BusError, Error, Result};
use rppal::gpio::{Gpio, OutputPin};
use rppal::i2c::I2c;

/// Linux I2C adapter (`/dev/i2c-N`)
pub struct I2cBus {
    i2c: I2c,
    // Slave address currently selected on the adapter
    selected: Option<u8>,
}

impl I2cBus {
    /// Open `/dev/i2c-<bus>`
    pub fn open(bus: u8) -> Result<Self> {
        let i2c = I2c::with_bus(bus).map_err(|e| {
            Error::SensorInit(BusError::Open {
                bus,
                reason: e.to_string(),
            })
        })?;
        Ok(Self { i2c, selected: None })
    }

    fn select(&mut self, device: u8) -> std::result::Result<(), String> {
        if self.selected != Some(device) {
            self.i2c
                .set_slave_address(device as u16)
                .map_err(|e| e.to_string())?;
            self.selected = Some(device);
        }
        Ok(())
    }
}

impl RegisterBus for I2cBus {
    fn read_byte(&mut self, device: u8, register: u8) -> std::result::Result<u8, BusError> {
        let read_err = |reason: String| BusError::Read {
            device,
            register,
            reason,
        };
        self.select(device).map_err(read_err)?;
        self.i2c
            .smbus_read_byte(register)
            .map_err(|e| read_err(e.to_string()))
    }

    fn write_byte(&mut self, device: u8, register: u8, value: u8) -> std::result::Result<(), BusError> {
        let write_err = |reason: String| BusError::Write {
            device,
            register,
            value,
            reason,
        };
        self.select(device).map_err(write_err)?;
        self.i2c
            .smbus_write_byte(register, value)
            .map_err(|e| write_err(e.to_string()))
    }

    /// Register address write followed by a repeated-START read
    fn read_registers(&mut self, device: u8, start: u8, buf: &mut [u8]) -> std::result::Result<(), BusError> {
        let read_err = |reason: String| BusError::Read {
            device,
            register: start,
            reason,
        };
        self.select(device).map_err(read_err)?;
        self.i2c
            .write_read(&[start], buf)
            .map_err(|e| read_err(e.to_string()))
    }
}

/// Motor or other load switched by a GPIO output (BCM numbering)
pub struct GpioActuator {
    pin_number: u8,
    pin: Option<OutputPin>,
}

impl GpioActuator {
    /// Claim `pin` as an output, initially low
    pub fn open(pin: u8) -> Result<Self> {
        let output = Gpio::new()
            .and_then(|gpio| gpio.get(pin))
            .map_err(|e| Error::Actuator(format!("cannot claim GPIO{}: {}", pin, e)))?
            .into_output_low();
        Ok(Self {
            pin_number: pin,
            pin: Some(output),
        })
    }
}

impl Actuator for GpioActuator {
    fn set_state(&mut self, on: bool) -> Result<()> {
        match (self.pin.as_mut(), on) {
            (Some(pin), true) => pin.set_high(),
            (Some(pin), false) => pin.set_low(),
            // A released pin is already low
            (None, false) => {}
            (None, true) => {
                return Err(Error::Actuator(format!(
                    "GPIO{} has been released",
                    self.pin_number
                )))
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut pin) = self.pin.take() {
            pin.set_low();
            log::debug!("GPIO{} released", self.pin_number);
        }
        Ok(())
    }
}

impl Drop for GpioActuator {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

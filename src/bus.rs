//! Register-level bus abstraction
//!
//! Drivers only need byte-wide register access. Implementations for real
//! hardware live in [`crate::hw`]; [`SimulatedBus`] backs dry runs and tests.

use crate::error::BusError;

/// Byte-addressed register access to devices on a shared bus
pub trait RegisterBus {
    /// Read a single register
    fn read_byte(&mut self, device: u8, register: u8) -> Result<u8, BusError>;

    /// Write a single register
    fn write_byte(&mut self, device: u8, register: u8, value: u8) -> Result<(), BusError>;

    /// Read consecutive registers starting at `start` into `buf`
    ///
    /// The default issues one `read_byte` per register. Buses that support
    /// auto-incrementing burst reads should override this so that multi-byte
    /// measurements are latched in a single transaction.
    fn read_registers(&mut self, device: u8, start: u8, buf: &mut [u8]) -> Result<(), BusError> {
        for (offset, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_byte(device, start.wrapping_add(offset as u8))?;
        }
        Ok(())
    }
}

impl<B: RegisterBus + ?Sized> RegisterBus for &mut B {
    fn read_byte(&mut self, device: u8, register: u8) -> Result<u8, BusError> {
        (**self).read_byte(device, register)
    }

    fn write_byte(&mut self, device: u8, register: u8, value: u8) -> Result<(), BusError> {
        (**self).write_byte(device, register, value)
    }

    fn read_registers(&mut self, device: u8, start: u8, buf: &mut [u8]) -> Result<(), BusError> {
        (**self).read_registers(device, start, buf)
    }
}

impl<B: RegisterBus + ?Sized> RegisterBus for Box<B> {
    fn read_byte(&mut self, device: u8, register: u8) -> Result<u8, BusError> {
        (**self).read_byte(device, register)
    }

    fn write_byte(&mut self, device: u8, register: u8, value: u8) -> Result<(), BusError> {
        (**self).write_byte(device, register, value)
    }

    fn read_registers(&mut self, device: u8, start: u8, buf: &mut [u8]) -> Result<(), BusError> {
        (**self).read_registers(device, start, buf)
    }
}

/// In-memory register file for a single device
///
/// Reads return whatever was last stored; writes are recorded in order so
/// callers can inspect what a driver sent.
#[derive(Debug, Clone)]
pub struct SimulatedBus {
    device: u8,
    registers: [u8; 256],
    writes: Vec<(u8, u8)>,
}

impl SimulatedBus {
    /// Create a bus holding one device at `device` with all registers zeroed
    pub fn new(device: u8) -> Self {
        Self {
            device,
            registers: [0; 256],
            writes: Vec::new(),
        }
    }

    /// A device at rest: 1 g on Z, no rotation, about 25 °C
    pub fn at_rest(device: u8) -> Self {
        let mut bus = Self::new(device);
        bus.set_pair(0x3F, 16384);
        bus.set_pair(0x41, -3920);
        bus
    }

    /// Store a big-endian 16-bit value at `high` and `high + 1`
    pub fn set_pair(&mut self, high: u8, value: i16) {
        let [hi, lo] = value.to_be_bytes();
        self.registers[high as usize] = hi;
        self.registers[high.wrapping_add(1) as usize] = lo;
    }

    /// Store a single register value
    pub fn set_register(&mut self, register: u8, value: u8) {
        self.registers[register as usize] = value;
    }

    /// Current value of a register
    pub fn register(&self, register: u8) -> u8 {
        self.registers[register as usize]
    }

    /// Every `(register, value)` write seen so far
    pub fn writes(&self) -> &[(u8, u8)] {
        &self.writes
    }

    fn check_device(&self, device: u8) -> Result<(), String> {
        if device == self.device {
            Ok(())
        } else {
            Err(format!("no device acknowledged address 0x{:02X}", device))
        }
    }
}

impl RegisterBus for SimulatedBus {
    fn read_byte(&mut self, device: u8, register: u8) -> Result<u8, BusError> {
        self.check_device(device).map_err(|reason| BusError::Read {
            device,
            register,
            reason,
        })?;
        Ok(self.registers[register as usize])
    }

    fn write_byte(&mut self, device: u8, register: u8, value: u8) -> Result<(), BusError> {
        self.check_device(device).map_err(|reason| BusError::Write {
            device,
            register,
            value,
            reason,
        })?;
        self.registers[register as usize] = value;
        self.writes.push((register, value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_pair_stores_big_endian() {
        let mut bus = SimulatedBus::new(0x68);
        bus.set_pair(0x3B, -2);
        assert_eq!(bus.register(0x3B), 0xFF);
        assert_eq!(bus.register(0x3C), 0xFE);
    }

    #[test]
    fn test_default_burst_read_walks_registers() {
        let mut bus = SimulatedBus::new(0x68);
        bus.set_register(0x10, 1);
        bus.set_register(0x11, 2);
        bus.set_register(0x12, 3);

        let mut buf = [0u8; 3];
        bus.read_registers(0x68, 0x10, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn test_wrong_address_is_rejected() {
        let mut bus = SimulatedBus::new(0x68);
        assert!(matches!(
            bus.read_byte(0x69, 0x75),
            Err(BusError::Read { device: 0x69, register: 0x75, .. })
        ));
        assert!(bus.write_byte(0x69, 0x6B, 0).is_err());
        assert!(bus.writes().is_empty());
    }
}

//! On/off actuator abstraction

use crate::error::Result;

/// A binary actuator such as a motor driven from a GPIO line
pub trait Actuator {
    /// Drive the actuator on or off
    fn set_state(&mut self, on: bool) -> Result<()>;

    /// Release the underlying handle, leaving the actuator off
    ///
    /// Must be idempotent and safe to call when the actuator was never
    /// switched on.
    fn close(&mut self) -> Result<()>;
}

impl<A: Actuator + ?Sized> Actuator for &mut A {
    fn set_state(&mut self, on: bool) -> Result<()> {
        (**self).set_state(on)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn set_state(&mut self, on: bool) -> Result<()> {
        (**self).set_state(on)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Actuator stand-in for dry runs; logs every command
#[derive(Debug, Default)]
pub struct SimulatedActuator {
    on: bool,
    closed: bool,
}

impl SimulatedActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Actuator for SimulatedActuator {
    fn set_state(&mut self, on: bool) -> Result<()> {
        if self.on != on {
            log::debug!("simulated actuator {}", if on { "on" } else { "off" });
        }
        self.on = on;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.on = false;
        self.closed = true;
        Ok(())
    }
}

// RS485 transceiver direction control (DE / RE lines)

use crate::types::Level;

/// One digital output wired to a transceiver control input.
///
/// DE is active high (HIGH drives the bus). RE is active low (LOW enables the
/// receiver). Receive mode is therefore both lines LOW and transmit mode is
/// both lines HIGH.
pub trait DirectionLine {
    fn set_level(&mut self, level: Level);

    /// Level the line was last driven to
    fn level(&self) -> Level;

    fn set_high(&mut self) {
        self.set_level(Level::High);
    }

    fn set_low(&mut self) {
        self.set_level(Level::Low);
    }
}

impl<T: DirectionLine + ?Sized> DirectionLine for Box<T> {
    fn set_level(&mut self, level: Level) {
        (**self).set_level(level)
    }

    fn level(&self) -> Level {
        (**self).level()
    }
}

#[cfg(feature = "rppal")]
pub use gpio::{open_direction_lines, GpioLine};

#[cfg(feature = "rppal")]
mod gpio {
    use super::DirectionLine;
    use crate::error::{ModbusError, Result};
    use crate::types::Level;
    use rppal::gpio::{Gpio, OutputPin};

    /// Raspberry Pi GPIO pin configured as an output
    pub struct GpioLine {
        pin: OutputPin,
    }

    impl DirectionLine for GpioLine {
        fn set_level(&mut self, level: Level) {
            match level {
                Level::High => self.pin.set_high(),
                Level::Low => self.pin.set_low(),
            }
        }

        fn level(&self) -> Level {
            if self.pin.is_set_high() {
                Level::High
            } else {
                Level::Low
            }
        }
    }

    /// Opens the GPIO peripheral and claims DE and RE as outputs, both driven
    /// LOW (receive mode).
    ///
    /// The peripheral is released once both returned lines are dropped.
    pub fn open_direction_lines(de_pin: u8, re_pin: u8) -> Result<(GpioLine, GpioLine)> {
        let gpio = Gpio::new()
            .map_err(|e| ModbusError::Setup(format!("failed to initialize GPIO: {}", e)))?;

        let de = gpio
            .get(de_pin)
            .map_err(|e| ModbusError::Setup(format!("DE pin {}: {}", de_pin, e)))?
            .into_output_low();
        let re = gpio
            .get(re_pin)
            .map_err(|e| ModbusError::Setup(format!("RE pin {}: {}", re_pin, e)))?
            .into_output_low();

        log::debug!("GPIO {} (DE) and {} (RE) configured as outputs, LOW", de_pin, re_pin);
        Ok((GpioLine { pin: de }, GpioLine { pin: re }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Latch(Level);

    impl DirectionLine for Latch {
        fn set_level(&mut self, level: Level) {
            self.0 = level;
        }

        fn level(&self) -> Level {
            self.0
        }
    }

    #[test]
    fn provided_helpers_drive_levels() {
        let mut line = Latch(Level::Low);
        line.set_high();
        assert_eq!(line.level(), Level::High);
        line.set_low();
        assert_eq!(line.level(), Level::Low);
    }

    #[test]
    fn boxed_lines_forward() {
        let mut line: Box<dyn DirectionLine> = Box::new(Latch(Level::Low));
        line.set_high();
        assert_eq!(line.level(), Level::High);
    }
}

// Master configuration: serial line, direction pins and turnaround timing

use crate::error::{ModbusError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Serial line parameters. Framing is fixed at 8 data bits, no parity, 1 stop bit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path, e.g. "/dev/ttyUSB0"
    pub port: String,
    /// Baud rate (bit/s)
    pub baud_rate: u32,
    /// Per-read timeout of the serial device
    pub read_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            read_timeout: Duration::from_secs(5),
        }
    }
}

impl SerialConfig {
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.port.is_empty() {
            return Err(ModbusError::Config("Port cannot be empty".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(ModbusError::Config("Baud rate must be greater than 0".to_string()));
        }
        if self.read_timeout.is_zero() {
            return Err(ModbusError::Config("Read timeout must be greater than 0".to_string()));
        }
        Ok(())
    }
}

/// Delays of the half-duplex turnaround.
///
/// These are transceiver settle times; shortening them below what the
/// hardware needs causes bus contention or clipped frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// After each DE/RE line change
    pub line_settle_delay: Duration,
    /// After entering transmit mode, before the first byte
    pub pre_send_delay: Duration,
    /// After each transmitted byte
    pub inter_byte_delay: Duration,
    /// After the last byte, before releasing the bus
    pub post_frame_delay: Duration,
    /// After entering receive mode, before the first read
    pub pre_receive_delay: Duration,
    /// After each successful partial read
    pub read_pacing_delay: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            line_settle_delay: Duration::from_micros(1),
            pre_send_delay: Duration::ZERO,
            inter_byte_delay: Duration::from_millis(1),
            post_frame_delay: Duration::from_millis(3),
            pre_receive_delay: Duration::from_millis(1),
            read_pacing_delay: Duration::from_millis(1),
        }
    }
}

impl TimingConfig {
    /// No delays at all; for simulated buses only.
    pub fn immediate() -> Self {
        Self {
            line_settle_delay: Duration::ZERO,
            pre_send_delay: Duration::ZERO,
            inter_byte_delay: Duration::ZERO,
            post_frame_delay: Duration::ZERO,
            pre_receive_delay: Duration::ZERO,
            read_pacing_delay: Duration::ZERO,
        }
    }
}

/// Everything needed to open a master on real hardware
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub serial: SerialConfig,
    /// GPIO (BCM numbering) driving the transceiver's driver-enable input
    pub de_pin: u8,
    /// GPIO (BCM numbering) driving the transceiver's receiver-enable input
    pub re_pin: u8,
    pub timing: TimingConfig,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            de_pin: 17,
            re_pin: 27,
            timing: TimingConfig::default(),
        }
    }
}

impl MasterConfig {
    pub fn new(port: &str, baud_rate: u32, de_pin: u8, re_pin: u8) -> Self {
        Self {
            serial: SerialConfig::new(port, baud_rate),
            de_pin,
            re_pin,
            timing: TimingConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.serial.validate()?;
        if self.de_pin == self.re_pin {
            return Err(ModbusError::Config(format!(
                "DE and RE must be different pins, both are {}",
                self.de_pin
            )));
        }
        Ok(())
    }

    /// Load and validate a configuration from a JSON file. Missing fields take
    /// their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ModbusError::Config(format!("{}: {}", path.display(), e)))?;
        let config: MasterConfig = serde_json::from_str(&text)
            .map_err(|e| ModbusError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }
}

// Modbus RTU master for half-duplex RS485 transceivers with DE/RE direction control

pub mod config;
pub mod drivers;
pub mod error;
pub mod modbus;
pub mod types;

pub use config::{MasterConfig, SerialConfig, TimingConfig};
pub use drivers::DirectionLine;
pub use error::{ErrorKind, ModbusError, Result};
pub use modbus::{crc16, ModbusRtuMaster};
#[cfg(feature = "rppal")]
pub use modbus::SerialMaster;
pub use types::{FunctionCode, Level, LinkState};

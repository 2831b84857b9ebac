// Hardware collaborators of the master
//
// The protocol engine only sees a byte stream and two digital outputs. These
// modules open the real ones on a Linux host.

/// Serial port driver
/// Opens the RS485 UART through the serialport crate with 8N1 framing
pub mod serial;

/// Transceiver direction lines
/// DE/RE output abstraction plus the Raspberry Pi GPIO implementation
pub mod rs485;

pub use rs485::DirectionLine;
#[cfg(feature = "rppal")]
pub use rs485::GpioLine;

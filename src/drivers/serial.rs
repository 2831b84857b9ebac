// Serial port for the RS485 transceiver (serialport crate)

use crate::config::SerialConfig;
use crate::error::{ModbusError, Result};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

/// Opens the serial device with 8 data bits, no parity, one stop bit and the
/// configured read timeout, then discards anything left in its buffers.
///
/// The port is closed again if the flush fails.
pub fn open_port(config: &SerialConfig) -> Result<Box<dyn SerialPort>> {
    config.validate()?;

    let port = serialport::new(config.port.as_str(), config.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(config.read_timeout)
        .open()?;

    if let Err(e) = port.clear(ClearBuffer::All) {
        log::warn!("Flushing {} failed, closing it again", config.port);
        drop(port);
        return Err(ModbusError::Setup(format!("failed to flush port: {}", e)));
    }

    log::info!(
        "Opened {} at {} baud (8N1, read timeout {:?})",
        config.port,
        config.baud_rate,
        config.read_timeout
    );
    Ok(port)
}

// Error taxonomy of the Modbus RTU master

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Coarse classification of a [`ModbusError`], stable enough to hand to
/// bindings and to print as an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Serial open/flush/write/read failed, or the device was closed
    Transport,
    /// Fewer response bytes than expected arrived before the line went quiet
    Timeout,
    /// Slave ID, function code or write echo differs from the request
    ProtocolMismatch,
    /// Received CRC differs from the computed one
    Crc,
    /// Serial port or GPIO could not be initialised
    Setup,
    /// The request cannot be encoded; nothing was transmitted
    InvalidRequest,
}

#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write byte {index}: wrote {written} bytes")]
    PartialWrite { index: usize, written: usize },
    #[error("device is closed")]
    Closed,
    #[error("invalid response length: got {received}, expected {expected}")]
    InvalidResponseLength { received: usize, expected: usize },
    #[error("invalid slave ID in response: got {received}, expected {expected}")]
    SlaveIdMismatch { expected: u8, received: u8 },
    #[error("invalid function code in response: got {received:#04x}, expected {expected:#04x}")]
    FunctionCodeMismatch { expected: u8, received: u8 },
    #[error("response does not match request: got {}, expected {}", hex(.received), hex(.expected))]
    EchoMismatch { expected: Vec<u8>, received: Vec<u8> },
    #[error("slave rejected function {function:#04x} with exception code {code:#04x}")]
    Exception { function: u8, code: u8 },
    #[error("CRC error: received {received:04X}, calculated {computed:04X}")]
    Crc { received: u16, computed: u16 },
    #[error("failed to open serial port: {0}")]
    Serial(#[from] serialport::Error),
    #[error("setup failed: {0}")]
    Setup(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ModbusError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        ModbusError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ModbusError::Io { .. } | ModbusError::PartialWrite { .. } | ModbusError::Closed => {
                ErrorKind::Transport
            }
            ModbusError::InvalidResponseLength { .. } => ErrorKind::Timeout,
            ModbusError::SlaveIdMismatch { .. }
            | ModbusError::FunctionCodeMismatch { .. }
            | ModbusError::EchoMismatch { .. }
            | ModbusError::Exception { .. } => ErrorKind::ProtocolMismatch,
            ModbusError::Crc { .. } => ErrorKind::Crc,
            ModbusError::Serial(_) | ModbusError::Setup(_) | ModbusError::Config(_) => {
                ErrorKind::Setup
            }
            ModbusError::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }
}

pub type Result<T> = std::result::Result<T, ModbusError>;

/// Space separated upper-case hex, e.g. `01 06 00 10`
pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(ModbusError::Closed.kind(), ErrorKind::Transport);
        assert_eq!(
            ModbusError::PartialWrite { index: 2, written: 0 }.kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            ModbusError::InvalidResponseLength { received: 7, expected: 8 }.kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            ModbusError::FunctionCodeMismatch { expected: 3, received: 4 }.kind(),
            ErrorKind::ProtocolMismatch
        );
        assert_eq!(
            ModbusError::Crc { received: 1, computed: 2 }.kind(),
            ErrorKind::Crc
        );
        assert_eq!(ModbusError::Setup("gpio".into()).kind(), ErrorKind::Setup);
    }

    #[test]
    fn messages_carry_expected_and_actual() {
        let error = ModbusError::Crc {
            received: 0xC5CD,
            computed: 0xCDC5,
        };
        assert_eq!(error.to_string(), "CRC error: received C5CD, calculated CDC5");

        let error = ModbusError::EchoMismatch {
            expected: vec![0x01, 0x05, 0x00, 0x10, 0xFF, 0x00],
            received: vec![0x01, 0x05, 0x00, 0x10, 0x00, 0x00],
        };
        assert_eq!(
            error.to_string(),
            "response does not match request: got 01 05 00 10 00 00, expected 01 05 00 10 FF 00"
        );
    }

    #[test]
    fn kind_serializes_as_error_code() {
        let code = serde_json::to_string(&ErrorKind::ProtocolMismatch).unwrap();
        assert_eq!(code, "\"PROTOCOL_MISMATCH\"");
    }
}

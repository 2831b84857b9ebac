// Shared data types for the RS485 Modbus RTU master

use serde::{Deserialize, Serialize};
use std::fmt;

/// Modbus function codes supported by the master
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
}

impl FunctionCode {
    /// Wire value of the function code
    pub fn code(self) -> u8 {
        match self {
            FunctionCode::ReadCoils => 0x01,
            FunctionCode::ReadDiscreteInputs => 0x02,
            FunctionCode::ReadHoldingRegisters => 0x03,
            FunctionCode::ReadInputRegisters => 0x04,
            FunctionCode::WriteSingleCoil => 0x05,
            FunctionCode::WriteSingleRegister => 0x06,
            FunctionCode::WriteMultipleCoils => 0x0F,
            FunctionCode::WriteMultipleRegisters => 0x10,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(FunctionCode::ReadCoils),
            0x02 => Some(FunctionCode::ReadDiscreteInputs),
            0x03 => Some(FunctionCode::ReadHoldingRegisters),
            0x04 => Some(FunctionCode::ReadInputRegisters),
            0x05 => Some(FunctionCode::WriteSingleCoil),
            0x06 => Some(FunctionCode::WriteSingleRegister),
            0x0F => Some(FunctionCode::WriteMultipleCoils),
            0x10 => Some(FunctionCode::WriteMultipleRegisters),
            _ => None,
        }
    }

    /// Function byte a slave answers with when it rejects the request
    pub fn exception_code(self) -> u8 {
        self.code() | 0x80
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({:#04x})", self, self.code())
    }
}

/// Logic level of a digital output line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Low,
    High,
}

/// Half-duplex turnaround state of the transceiver.
///
/// `ReceiveMode` is both the initial state and the state between requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkState {
    #[default]
    ReceiveMode,
    SwitchingToTransmit,
    Transmitting,
    SwitchingToReceive,
    Receiving,
}

/// Outcome of a read of single-bit points (coils or discrete inputs)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BitsReading {
    pub slave_id: u8,
    pub start_address: u16,
    pub values: Vec<bool>,
    pub status: String,
}

/// Outcome of a read of 16-bit registers
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistersReading {
    pub slave_id: u8,
    pub start_address: u16,
    pub values: Vec<u16>,
    pub status: String,
}

/// Acknowledged write
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WriteAck {
    pub slave_id: u8,
    pub address: u16,
    /// Number of points written
    pub quantity: u16,
    pub status: String,
}

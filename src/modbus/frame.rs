// RTU framing: request encoding, response validation and payload decoding
//
// Frame layout: [slave][function][payload...][crc lo][crc hi]

use super::crc::crc16;
use crate::error::{ModbusError, Result};
use crate::types::FunctionCode;

/// Slave ID + function code + CRC
const FRAME_OVERHEAD: usize = 4;
/// Slave ID + function code + byte count + CRC
const READ_RESPONSE_OVERHEAD: usize = 5;
/// Every write is acknowledged with an 8 byte echo of the address and quantity/value
const WRITE_RESPONSE_LEN: usize = 8;
const EXCEPTION_RESPONSE_LEN: usize = 5;
/// Request bytes a write-single-coil response must echo
const ECHO_LEN: usize = 6;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

/// Largest bit count whose packed size still fits the one-byte byte-count field
const MAX_PACKED_BITS: usize = u8::MAX as usize * 8;
const MAX_PACKED_REGISTERS: usize = u8::MAX as usize / 2;

/// A request ready to go on the wire, with the length of the reply it expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Request {
    frame: Vec<u8>,
    function: FunctionCode,
    expected_len: usize,
}

impl Request {
    fn new(slave_id: u8, function: FunctionCode, payload: &[u8], expected_len: usize) -> Self {
        let mut frame = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
        frame.push(slave_id);
        frame.push(function.code());
        frame.extend_from_slice(payload);

        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        Self {
            frame,
            function,
            expected_len,
        }
    }

    /// Read coils, discrete inputs, holding or input registers
    pub(crate) fn read(slave_id: u8, function: FunctionCode, start: u16, count: u16) -> Self {
        let data_len = match function {
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => packed_len(count as usize),
            _ => 2 * count as usize,
        };
        let mut payload = [0u8; 4];
        payload[..2].copy_from_slice(&start.to_be_bytes());
        payload[2..].copy_from_slice(&count.to_be_bytes());
        Self::new(slave_id, function, &payload, READ_RESPONSE_OVERHEAD + data_len)
    }

    pub(crate) fn write_single_coil(slave_id: u8, address: u16, value: bool) -> Self {
        let state = if value { COIL_ON } else { COIL_OFF };
        let mut payload = [0u8; 4];
        payload[..2].copy_from_slice(&address.to_be_bytes());
        payload[2..].copy_from_slice(&state.to_be_bytes());
        Self::new(slave_id, FunctionCode::WriteSingleCoil, &payload, WRITE_RESPONSE_LEN)
    }

    pub(crate) fn write_single_register(slave_id: u8, address: u16, value: u16) -> Self {
        let mut payload = [0u8; 4];
        payload[..2].copy_from_slice(&address.to_be_bytes());
        payload[2..].copy_from_slice(&value.to_be_bytes());
        Self::new(slave_id, FunctionCode::WriteSingleRegister, &payload, WRITE_RESPONSE_LEN)
    }

    pub(crate) fn write_multiple_coils(slave_id: u8, start: u16, values: &[bool]) -> Result<Self> {
        if values.is_empty() {
            return Err(ModbusError::InvalidRequest("no coil values to write".to_string()));
        }
        if values.len() > MAX_PACKED_BITS {
            return Err(ModbusError::InvalidRequest(format!(
                "{} coils do not fit one request, maximum is {}",
                values.len(),
                MAX_PACKED_BITS
            )));
        }

        let packed = pack_bits(values);
        let mut payload = Vec::with_capacity(5 + packed.len());
        payload.extend_from_slice(&start.to_be_bytes());
        payload.extend_from_slice(&(values.len() as u16).to_be_bytes());
        payload.push(packed.len() as u8);
        payload.extend_from_slice(&packed);
        Ok(Self::new(slave_id, FunctionCode::WriteMultipleCoils, &payload, WRITE_RESPONSE_LEN))
    }

    pub(crate) fn write_multiple_registers(slave_id: u8, start: u16, values: &[u16]) -> Result<Self> {
        if values.is_empty() {
            return Err(ModbusError::InvalidRequest("no register values to write".to_string()));
        }
        if values.len() > MAX_PACKED_REGISTERS {
            return Err(ModbusError::InvalidRequest(format!(
                "{} registers do not fit one request, maximum is {}",
                values.len(),
                MAX_PACKED_REGISTERS
            )));
        }

        let mut payload = Vec::with_capacity(5 + 2 * values.len());
        payload.extend_from_slice(&start.to_be_bytes());
        payload.extend_from_slice(&(values.len() as u16).to_be_bytes());
        payload.push((2 * values.len()) as u8);
        for value in values {
            payload.extend_from_slice(&value.to_be_bytes());
        }
        Ok(Self::new(
            slave_id,
            FunctionCode::WriteMultipleRegisters,
            &payload,
            WRITE_RESPONSE_LEN,
        ))
    }

    pub(crate) fn frame(&self) -> &[u8] {
        &self.frame
    }

    pub(crate) fn slave_id(&self) -> u8 {
        self.frame[0]
    }

    pub(crate) fn function(&self) -> FunctionCode {
        self.function
    }

    pub(crate) fn expected_len(&self) -> usize {
        self.expected_len
    }

    /// Checks an accumulated reply against this request.
    ///
    /// Checks run in order: exception reply, length, slave ID, function code,
    /// CRC; the first failure is returned.
    pub(crate) fn validate(&self, response: &[u8]) -> Result<()> {
        if let Some(code) = self.exception_in(response)? {
            return Err(ModbusError::Exception {
                function: self.function.code(),
                code,
            });
        }

        if response.len() < self.expected_len {
            return Err(ModbusError::InvalidResponseLength {
                received: response.len(),
                expected: self.expected_len,
            });
        }
        let response = &response[..self.expected_len];

        if response[0] != self.slave_id() {
            return Err(ModbusError::SlaveIdMismatch {
                expected: self.slave_id(),
                received: response[0],
            });
        }

        if response[1] != self.function.code() {
            return Err(ModbusError::FunctionCodeMismatch {
                expected: self.function.code(),
                received: response[1],
            });
        }

        check_crc(response)
    }

    /// Exception code, if `response` is a well-formed exception reply from the
    /// addressed slave to this request.
    fn exception_in(&self, response: &[u8]) -> Result<Option<u8>> {
        if response.len() < EXCEPTION_RESPONSE_LEN
            || response[0] != self.slave_id()
            || response[1] != self.function.exception_code()
        {
            return Ok(None);
        }
        check_crc(&response[..EXCEPTION_RESPONSE_LEN])?;
        Ok(Some(response[2]))
    }

    /// A write-single-coil reply must repeat the request's first six bytes.
    pub(crate) fn check_echo(&self, response: &[u8]) -> Result<()> {
        let expected = &self.frame[..ECHO_LEN];
        let received = &response[..ECHO_LEN.min(response.len())];
        if expected != received {
            return Err(ModbusError::EchoMismatch {
                expected: expected.to_vec(),
                received: received.to_vec(),
            });
        }
        Ok(())
    }
}

/// Last two bytes, little endian, must equal the CRC of everything before them.
fn check_crc(frame: &[u8]) -> Result<()> {
    let split = frame.len() - 2;
    let received = u16::from_le_bytes([frame[split], frame[split + 1]]);
    let computed = crc16(&frame[..split]);
    if received != computed {
        return Err(ModbusError::Crc { received, computed });
    }
    Ok(())
}

/// Bytes needed to carry `bits` packed values
fn packed_len(bits: usize) -> usize {
    (bits + 7) / 8
}

/// Packs booleans LSB first: value `i` lands in byte `i / 8`, bit `i % 8`.
pub(crate) fn pack_bits(values: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; packed_len(values.len())];
    for (i, &value) in values.iter().enumerate() {
        if value {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Decodes `count` bits from a validated read-coils/discrete-inputs reply.
///
/// Bits past the slave's byte-count field stay `false`.
pub(crate) fn unpack_bits(response: &[u8], count: u16) -> Vec<bool> {
    let byte_count = response.get(2).copied().unwrap_or(0) as usize;
    let data = response.get(3..).unwrap_or(&[]);
    (0..count as usize)
        .map(|i| {
            let index = i / 8;
            index < byte_count && data.get(index).map_or(false, |byte| byte & (1 << (i % 8)) != 0)
        })
        .collect()
}

/// Decodes `count` big-endian registers from a validated read reply.
///
/// Registers past the slave's byte-count field stay 0.
pub(crate) fn decode_registers(response: &[u8], count: u16) -> Vec<u16> {
    let byte_count = response.get(2).copied().unwrap_or(0) as usize;
    let data = response.get(3..).unwrap_or(&[]);
    (0..count as usize)
        .map(|i| {
            let offset = 2 * i;
            if offset + 1 < byte_count {
                match data.get(offset..offset + 2) {
                    Some(pair) => u16::from_be_bytes([pair[0], pair[1]]),
                    None => 0,
                }
            } else {
                0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_crc(mut bytes: Vec<u8>) -> Vec<u8> {
        let crc = crc16(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes
    }

    #[test]
    fn read_holding_registers_frame() {
        let request = Request::read(1, FunctionCode::ReadHoldingRegisters, 0, 10);
        assert_eq!(request.frame(), &[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]);
        assert_eq!(request.expected_len(), 25);
    }

    #[test]
    fn read_coils_expects_packed_reply() {
        assert_eq!(Request::read(1, FunctionCode::ReadCoils, 0, 1).expected_len(), 6);
        assert_eq!(Request::read(1, FunctionCode::ReadCoils, 0, 8).expected_len(), 6);
        assert_eq!(Request::read(1, FunctionCode::ReadDiscreteInputs, 0, 9).expected_len(), 7);
        assert_eq!(Request::read(1, FunctionCode::ReadInputRegisters, 0, 3).expected_len(), 11);
    }

    #[test]
    fn large_register_count_does_not_overflow() {
        let request = Request::read(1, FunctionCode::ReadHoldingRegisters, 0, u16::MAX);
        assert_eq!(request.expected_len(), 5 + 2 * u16::MAX as usize);
    }

    #[test]
    fn write_single_coil_frames() {
        let on = Request::write_single_coil(0x11, 0x00AC, true);
        assert_eq!(&on.frame()[..6], &[0x11, 0x05, 0x00, 0xAC, 0xFF, 0x00]);
        let off = Request::write_single_coil(0x11, 0x00AC, false);
        assert_eq!(&off.frame()[..6], &[0x11, 0x05, 0x00, 0xAC, 0x00, 0x00]);
        assert_eq!(on.expected_len(), 8);
    }

    #[test]
    fn write_single_register_frame() {
        let request = Request::write_single_register(1, 0x0010, 0x1234);
        assert_eq!(request.frame(), &[0x01, 0x06, 0x00, 0x10, 0x12, 0x34, 0x85, 0x78]);
    }

    #[test]
    fn write_multiple_coils_frame() {
        // 10 coils at 0x13: 1011 0011 / 01
        let values = [true, false, true, true, false, false, true, true, true, false];
        let request = Request::write_multiple_coils(0x11, 0x0013, &values).unwrap();
        assert_eq!(
            &request.frame()[..9],
            &[0x11, 0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]
        );
        assert_eq!(request.frame().len(), 11);
    }

    #[test]
    fn write_multiple_registers_frame() {
        let request = Request::write_multiple_registers(0x11, 0x0001, &[0x000A, 0x0102]).unwrap();
        assert_eq!(
            &request.frame()[..11],
            &[0x11, 0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
    }

    #[test]
    fn oversized_writes_are_rejected() {
        assert!(matches!(
            Request::write_multiple_coils(1, 0, &[]),
            Err(ModbusError::InvalidRequest(_))
        ));
        assert!(Request::write_multiple_coils(1, 0, &vec![true; MAX_PACKED_BITS]).is_ok());
        assert!(Request::write_multiple_coils(1, 0, &vec![true; MAX_PACKED_BITS + 1]).is_err());
        assert!(Request::write_multiple_registers(1, 0, &vec![7; 127]).is_ok());
        assert!(Request::write_multiple_registers(1, 0, &vec![7; 128]).is_err());
    }

    #[test]
    fn pack_then_unpack_is_identity() {
        for n in [1usize, 7, 8, 9, 16, 2000] {
            let values: Vec<bool> = (0..n).map(|i| i % 3 == 0 || i % 7 == 1).collect();
            let packed = pack_bits(&values);
            assert_eq!(packed.len(), (n + 7) / 8);

            let mut response = vec![0x01, 0x01, packed.len() as u8];
            response.extend_from_slice(&packed);
            let response = with_crc(response);

            assert_eq!(unpack_bits(&response, n as u16), values, "n = {}", n);
        }
    }

    #[test]
    fn unpack_leaves_bits_beyond_byte_count_false() {
        // slave claims one byte although 16 coils were asked for
        let response = with_crc(vec![0x01, 0x01, 0x01, 0xFF, 0xFF]);
        let values = unpack_bits(&response, 16);
        assert!(values[..8].iter().all(|&v| v));
        assert!(values[8..].iter().all(|&v| !v));
    }

    #[test]
    fn decode_registers_big_endian() {
        let response = with_crc(vec![0x01, 0x04, 0x06, 0x00, 0x0A, 0x00, 0x0B, 0x00, 0x0C]);
        assert_eq!(decode_registers(&response, 3), vec![10, 11, 12]);
    }

    #[test]
    fn decode_registers_beyond_byte_count_are_zero() {
        let response = with_crc(vec![0x01, 0x03, 0x02, 0x12, 0x34, 0x56, 0x78]);
        assert_eq!(decode_registers(&response, 2), vec![0x1234, 0]);
    }

    #[test]
    fn validate_accepts_good_reply() {
        let request = Request::read(1, FunctionCode::ReadInputRegisters, 0, 3);
        let response = with_crc(vec![0x01, 0x04, 0x06, 0x00, 0x0A, 0x00, 0x0B, 0x00, 0x0C]);
        assert!(request.validate(&response).is_ok());
    }

    #[test]
    fn validate_reports_short_reply() {
        let request = Request::write_single_register(1, 0x10, 0x1234);
        let response = &request.frame()[..7];
        assert!(matches!(
            request.validate(response),
            Err(ModbusError::InvalidResponseLength { received: 7, expected: 8 })
        ));
    }

    #[test]
    fn validate_reports_wrong_slave_before_crc() {
        let request = Request::write_single_register(1, 0x10, 0x1234);
        let mut response = request.frame().to_vec();
        response[0] = 2;
        assert!(matches!(
            request.validate(&response),
            Err(ModbusError::SlaveIdMismatch { expected: 1, received: 2 })
        ));
    }

    #[test]
    fn validate_reports_wrong_function() {
        let request = Request::read(1, FunctionCode::ReadInputRegisters, 0, 1);
        let response = with_crc(vec![0x01, 0x03, 0x02, 0x00, 0x01]);
        assert!(matches!(
            request.validate(&response),
            Err(ModbusError::FunctionCodeMismatch { expected: 0x04, received: 0x03 })
        ));
    }

    #[test]
    fn validate_reports_flipped_crc() {
        let request = Request::write_single_register(1, 0x10, 0x1234);
        let mut response = request.frame().to_vec();
        response[7] ^= 0xFF;
        match request.validate(&response) {
            Err(ModbusError::Crc { received, computed }) => {
                assert_eq!(computed, 0x7885);
                assert_eq!(received, 0x8785);
            }
            other => panic!("expected CRC error, got {:?}", other),
        }
    }

    #[test]
    fn validate_reports_exception_reply() {
        let request = Request::read(1, FunctionCode::ReadHoldingRegisters, 0, 10);
        let response = with_crc(vec![0x01, 0x83, 0x02]);
        assert!(matches!(
            request.validate(&response),
            Err(ModbusError::Exception { function: 0x03, code: 0x02 })
        ));
    }

    #[test]
    fn exception_reply_with_bad_crc_is_crc_error() {
        let request = Request::read(1, FunctionCode::ReadHoldingRegisters, 0, 10);
        let response = vec![0x01, 0x83, 0x02, 0x00, 0x00];
        assert!(matches!(request.validate(&response), Err(ModbusError::Crc { .. })));
    }

    #[test]
    fn echo_check() {
        let request = Request::write_single_coil(1, 0x20, true);
        assert!(request.check_echo(request.frame()).is_ok());

        let other = Request::write_single_coil(1, 0x20, false);
        assert!(matches!(
            request.check_echo(other.frame()),
            Err(ModbusError::EchoMismatch { .. })
        ));
    }
}

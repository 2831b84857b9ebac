// CRC-16/MODBUS

const INITIAL: u16 = 0xFFFF;
/// 0x8005 reflected
const POLYNOMIAL: u16 = 0xA001;

/// CRC-16 as used by Modbus RTU. Goes on the wire low byte first.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = INITIAL;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ POLYNOMIAL;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

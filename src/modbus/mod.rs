// Modbus RTU master over a half-duplex RS485 transceiver
//
// Every operation runs the same turnaround: enable the driver, clock the frame
// out byte by byte, hand the bus back, then collect and validate the reply.

mod crc;
mod frame;

pub use crc::crc16;

use crate::config::TimingConfig;
use crate::drivers::DirectionLine;
use crate::error::{hex, ModbusError, Result};
use crate::types::{FunctionCode, LinkState};
use frame::Request;
use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

#[cfg(feature = "rppal")]
use crate::config::MasterConfig;
#[cfg(feature = "rppal")]
use crate::drivers::{rs485, serial, GpioLine};
#[cfg(feature = "rppal")]
use serialport::SerialPort;

/// Master on real hardware: a serial device plus two Raspberry Pi GPIO lines
#[cfg(feature = "rppal")]
pub type SerialMaster = ModbusRtuMaster<Box<dyn SerialPort>, GpioLine>;

/// The resources a master owns while open
struct Link<P, L> {
    port: P,
    /// Driver enable, active high
    de: L,
    /// Receiver enable, active low
    re: L,
}

/// Modbus RTU master.
///
/// Owns the byte stream and both direction lines exclusively. Operations take
/// `&mut self`, so one instance only ever has one request in flight; share it
/// between threads behind a `Mutex` if needed.
pub struct ModbusRtuMaster<P: Read + Write, L: DirectionLine> {
    link: Option<Link<P, L>>,
    timing: TimingConfig,
    state: LinkState,
}

#[cfg(feature = "rppal")]
impl ModbusRtuMaster<Box<dyn SerialPort>, GpioLine> {
    /// Opens the serial port (flushing stale input) and the GPIO lines, and
    /// leaves the transceiver in receive mode.
    ///
    /// On failure everything acquired so far is released before returning.
    pub fn open(config: &MasterConfig) -> Result<Self> {
        config.validate()?;
        Self::open_with(
            || serial::open_port(&config.serial),
            || rs485::open_direction_lines(config.de_pin, config.re_pin),
            config.timing,
        )
    }
}

impl<P: Read + Write, L: DirectionLine> ModbusRtuMaster<P, L> {
    /// Builds a master over an already opened stream and direction lines.
    /// Both lines are driven LOW (receive mode) before this returns.
    pub fn from_parts(port: P, mut de: L, mut re: L, timing: TimingConfig) -> Self {
        de.set_low();
        re.set_low();
        Self {
            link: Some(Link { port, de, re }),
            timing,
            state: LinkState::ReceiveMode,
        }
    }

    /// Acquires the port, then the direction lines, and leaves the
    /// transceiver in receive mode. If the lines cannot be opened the port is
    /// closed again before the error is returned.
    pub fn open_with<OpenPort, OpenLines>(
        open_port: OpenPort,
        open_lines: OpenLines,
        timing: TimingConfig,
    ) -> Result<Self>
    where
        OpenPort: FnOnce() -> Result<P>,
        OpenLines: FnOnce() -> Result<(L, L)>,
    {
        let port = open_port()?;
        let (de, re) = match open_lines() {
            Ok(lines) => lines,
            Err(e) => {
                log::warn!("Direction line setup failed, closing serial port: {}", e);
                drop(port);
                return Err(e);
            }
        };
        Ok(Self::from_parts(port, de, re, timing))
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    pub fn link_state(&self) -> LinkState {
        self.state
    }

    /// Turnaround delays this master was built with
    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Releases the serial port and the direction lines. Safe to call more
    /// than once; later operations fail with [`ModbusError::Closed`].
    pub fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.de.set_low();
            link.re.set_low();
            if let Err(e) = link.port.flush() {
                log::warn!("Draining serial port on close failed: {}", e);
            }
            self.state = LinkState::ReceiveMode;
            log::info!("Modbus RTU master closed");
        }
    }

    /// Read coils (0x01)
    pub fn read_coils(&mut self, slave_id: u8, start: u16, count: u16) -> Result<Vec<bool>> {
        let request = Request::read(slave_id, FunctionCode::ReadCoils, start, count);
        let response = self.transact(&request)?;
        Ok(frame::unpack_bits(&response, count))
    }

    /// Read discrete inputs (0x02)
    pub fn read_discrete_inputs(&mut self, slave_id: u8, start: u16, count: u16) -> Result<Vec<bool>> {
        let request = Request::read(slave_id, FunctionCode::ReadDiscreteInputs, start, count);
        let response = self.transact(&request)?;
        Ok(frame::unpack_bits(&response, count))
    }

    /// Read holding registers (0x03)
    pub fn read_holding_registers(&mut self, slave_id: u8, start: u16, count: u16) -> Result<Vec<u16>> {
        let request = Request::read(slave_id, FunctionCode::ReadHoldingRegisters, start, count);
        let response = self.transact(&request)?;
        Ok(frame::decode_registers(&response, count))
    }

    /// Read input registers (0x04)
    pub fn read_input_registers(&mut self, slave_id: u8, start: u16, count: u16) -> Result<Vec<u16>> {
        let request = Request::read(slave_id, FunctionCode::ReadInputRegisters, start, count);
        let response = self.transact(&request)?;
        Ok(frame::decode_registers(&response, count))
    }

    /// Write single coil (0x05). The reply must echo the request exactly.
    pub fn write_coil(&mut self, slave_id: u8, address: u16, value: bool) -> Result<()> {
        let request = Request::write_single_coil(slave_id, address, value);
        let response = self.transact(&request)?;
        request.check_echo(&response)
    }

    /// Write single register (0x06)
    pub fn write_register(&mut self, slave_id: u8, address: u16, value: u16) -> Result<()> {
        let request = Request::write_single_register(slave_id, address, value);
        self.transact(&request)?;
        Ok(())
    }

    /// Write multiple coils (0x0F)
    pub fn write_multiple_coils(&mut self, slave_id: u8, start: u16, values: &[bool]) -> Result<()> {
        let request = Request::write_multiple_coils(slave_id, start, values)?;
        self.transact(&request)?;
        Ok(())
    }

    /// Write multiple registers (0x10)
    pub fn write_multiple_registers(&mut self, slave_id: u8, start: u16, values: &[u16]) -> Result<()> {
        let request = Request::write_multiple_registers(slave_id, start, values)?;
        self.transact(&request)?;
        Ok(())
    }

    /// Sends one request and returns its validated reply.
    ///
    /// The transceiver is back in receive mode whenever this returns, also on
    /// error. No retries.
    fn transact(&mut self, request: &Request) -> Result<Vec<u8>> {
        let timing = self.timing;
        let state = &mut self.state;
        let link = self.link.as_mut().ok_or(ModbusError::Closed)?;

        log::debug!(
            "-> slave {} {}: {}",
            request.slave_id(),
            request.function(),
            hex(request.frame())
        );

        link.enter_transmit_mode(state, &timing);
        let sent = link.transmit(request.frame(), &timing);
        link.enter_receive_mode(state, &timing);
        sent?;

        *state = LinkState::Receiving;
        let received = link.receive(request.expected_len(), &timing);
        *state = LinkState::ReceiveMode;
        let response = received?;

        log::debug!("<- slave {}: {}", request.slave_id(), hex(&response));

        if let Err(e) = request.validate(&response) {
            log::warn!("Rejected reply from slave {}: {}", request.slave_id(), e);
            return Err(e);
        }
        Ok(response)
    }
}

impl<P: Read + Write, L: DirectionLine> Link<P, L> {
    /// Receiver off first, then driver on, so both never listen and talk at once.
    fn enter_transmit_mode(&mut self, state: &mut LinkState, timing: &TimingConfig) {
        *state = LinkState::SwitchingToTransmit;
        self.re.set_high();
        log::trace!("RE high");
        pause(timing.line_settle_delay);
        self.de.set_high();
        log::trace!("DE high");
        pause(timing.line_settle_delay);
        *state = LinkState::Transmitting;
    }

    /// Driver off first, then receiver on.
    fn enter_receive_mode(&mut self, state: &mut LinkState, timing: &TimingConfig) {
        *state = LinkState::SwitchingToReceive;
        self.de.set_low();
        log::trace!("DE low");
        pause(timing.line_settle_delay);
        self.re.set_low();
        log::trace!("RE low");
        pause(timing.line_settle_delay);
        *state = LinkState::ReceiveMode;
    }

    fn transmit(&mut self, frame: &[u8], timing: &TimingConfig) -> Result<()> {
        pause(timing.pre_send_delay);

        for (index, byte) in frame.iter().enumerate() {
            match self.port.write(std::slice::from_ref(byte)) {
                Ok(1) => {}
                Ok(written) => return Err(ModbusError::PartialWrite { index, written }),
                Err(e) => {
                    return Err(ModbusError::io(format!("failed to write byte {}", index), e))
                }
            }
            log::trace!("wrote byte {}: {:02X}", index, byte);
            pause(timing.inter_byte_delay);
        }

        self.port
            .flush()
            .map_err(|e| ModbusError::io("failed to drain transmit buffer", e))?;
        pause(timing.post_frame_delay);
        Ok(())
    }

    /// Accumulates up to `expected_len` bytes across partial reads. Stops early
    /// on end of stream, an empty read, or the port's read timeout.
    fn receive(&mut self, expected_len: usize, timing: &TimingConfig) -> Result<Vec<u8>> {
        pause(timing.pre_receive_delay);

        let mut buffer = vec![0u8; expected_len];
        let mut total = 0;
        while total < expected_len {
            match self.port.read(&mut buffer[total..]) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    pause(timing.read_pacing_delay);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::UnexpectedEof | io::ErrorKind::WouldBlock
                    ) =>
                {
                    log::trace!("read stopped after {} of {} bytes: {}", total, expected_len, e);
                    break;
                }
                Err(e) => return Err(ModbusError::io("failed to read response", e)),
            }
        }

        buffer.truncate(total);
        Ok(buffer)
    }
}

impl<P: Read + Write, L: DirectionLine> Drop for ModbusRtuMaster<P, L> {
    fn drop(&mut self) {
        self.close();
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

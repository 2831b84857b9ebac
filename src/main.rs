// Command-line front-end for the RS485 Modbus RTU master
//
// Results and errors are printed as one JSON object per line.

use anyhow::Context;
use clap::error::ErrorKind as ClapErrorKind;
use clap::{ArgAction, Parser, Subcommand};
use rs485_modbus::types::{BitsReading, RegistersReading, WriteAck};
use rs485_modbus::{MasterConfig, ModbusError, SerialMaster};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "modbus-rtu")]
#[command(version, about = "Modbus RTU master over a half-duplex RS485 transceiver")]
struct Cli {
    /// JSON file with serial, pin and timing settings (replaces --port/--baud/--de/--re)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial device
    #[arg(short, long, global = true, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Baud rate
    #[arg(short, long, global = true, default_value_t = 9600)]
    baud: u32,

    /// BCM pin driving DE
    #[arg(long, global = true, default_value_t = 17, value_parser = parse_int::<u8>)]
    de: u8,

    /// BCM pin driving RE
    #[arg(long, global = true, default_value_t = 27, value_parser = parse_int::<u8>)]
    re: u8,

    /// Slave ID (decimal or 0x hex)
    #[arg(short, long, global = true, default_value_t = 1, value_parser = parse_int::<u8>)]
    slave: u8,

    /// Start address (decimal or 0x hex)
    #[arg(short, long, global = true, default_value_t = 0, value_parser = parse_int::<u16>)]
    addr: u16,

    /// Enable debug logging (frame dumps)
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read coils (0x01)
    #[command(name = "read_coils")]
    ReadCoils {
        #[arg(short = 'n', long, default_value_t = 1, value_parser = parse_int::<u16>)]
        count: u16,
    },

    /// Read discrete inputs (0x02)
    #[command(name = "read_discrete")]
    ReadDiscrete {
        #[arg(short = 'n', long, default_value_t = 1, value_parser = parse_int::<u16>)]
        count: u16,
    },

    /// Read holding registers (0x03)
    #[command(name = "read_holdreg")]
    ReadHoldreg {
        #[arg(short = 'n', long, default_value_t = 1, value_parser = parse_int::<u16>)]
        count: u16,
    },

    /// Read input registers (0x04)
    #[command(name = "read_inputreg")]
    ReadInputreg {
        #[arg(short = 'n', long, default_value_t = 1, value_parser = parse_int::<u16>)]
        count: u16,
    },

    /// Write single coil (0x05)
    #[command(name = "write_coil")]
    WriteCoil {
        /// 0 or 1
        #[arg(default_value = "0", action = ArgAction::Set, value_parser = parse_coil)]
        value: bool,
    },

    /// Write single register (0x06)
    #[command(name = "write_register")]
    WriteRegister {
        #[arg(default_value = "0", value_parser = parse_int::<u16>)]
        value: u16,
    },

    /// Write multiple coils (0x0F)
    #[command(name = "write_coils")]
    WriteCoils {
        /// Coil values, 0 or 1 each
        #[arg(required = true, action = ArgAction::Append, value_parser = parse_coil)]
        values: Vec<bool>,
    },

    /// Write multiple registers (0x10)
    #[command(name = "write_registers")]
    WriteRegisters {
        #[arg(required = true, value_parser = parse_int::<u16>)]
        values: Vec<u16>,
    },
}

/// Decimal or `0x`-prefixed hex, range-checked against the target type
fn parse_int<T: TryFrom<u64>>(text: &str) -> Result<T, String> {
    let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse::<u64>(),
    }
    .map_err(|e| format!("invalid number '{}': {}", text, e))?;
    T::try_from(value).map_err(|_| format!("{} is out of range", text))
}

fn parse_coil(text: &str) -> Result<bool, String> {
    match text {
        "1" | "true" | "on" => Ok(true),
        "0" | "false" | "off" => Ok(false),
        other => Err(format!("invalid coil value '{}', expected 0 or 1", other)),
    }
}

impl Cli {
    fn master_config(&self) -> anyhow::Result<MasterConfig> {
        match &self.config {
            Some(path) => MasterConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display())),
            None => Ok(MasterConfig::new(&self.port, self.baud, self.de, self.re)),
        }
    }
}

fn print_record(record: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(record)?);
    Ok(())
}

fn ack(slave_id: u8, address: u16, quantity: usize) -> WriteAck {
    WriteAck {
        slave_id,
        address,
        quantity: quantity as u16,
        status: "success".to_string(),
    }
}

fn execute(master: &mut SerialMaster, cli: &Cli) -> anyhow::Result<()> {
    let (slave_id, address) = (cli.slave, cli.addr);
    let bits = |values| BitsReading {
        slave_id,
        start_address: address,
        values,
        status: "success".to_string(),
    };
    let registers = |values| RegistersReading {
        slave_id,
        start_address: address,
        values,
        status: "success".to_string(),
    };

    match &cli.command {
        Command::ReadCoils { count } => {
            print_record(&bits(master.read_coils(slave_id, address, *count)?))
        }
        Command::ReadDiscrete { count } => {
            print_record(&bits(master.read_discrete_inputs(slave_id, address, *count)?))
        }
        Command::ReadHoldreg { count } => {
            print_record(&registers(master.read_holding_registers(slave_id, address, *count)?))
        }
        Command::ReadInputreg { count } => {
            print_record(&registers(master.read_input_registers(slave_id, address, *count)?))
        }
        Command::WriteCoil { value } => {
            master.write_coil(slave_id, address, *value)?;
            print_record(&ack(slave_id, address, 1))
        }
        Command::WriteRegister { value } => {
            master.write_register(slave_id, address, *value)?;
            print_record(&ack(slave_id, address, 1))
        }
        Command::WriteCoils { values } => {
            master.write_multiple_coils(slave_id, address, values)?;
            print_record(&ack(slave_id, address, values.len()))
        }
        Command::WriteRegisters { values } => {
            master.write_multiple_registers(slave_id, address, values)?;
            print_record(&ack(slave_id, address, values.len()))
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.master_config()?;
    let mut master = SerialMaster::open(&config)?;
    let result = execute(&mut master, cli);
    master.close();
    result
}

fn print_error(error_code: serde_json::Value, message: String) {
    println!("{}", json!({ "error_code": error_code, "message": message }));
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            print_error(json!("INVALID_ARGUMENTS"), e.to_string().trim_end().to_string());
            return ExitCode::FAILURE;
        }
    };

    let filter = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let error_code = match e.downcast_ref::<ModbusError>() {
                Some(modbus_error) => serde_json::to_value(modbus_error.kind())
                    .unwrap_or_else(|_| json!("MODBUS_ERROR")),
                None => json!("INVALID_ARGUMENTS"),
            };
            print_error(error_code, format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["modbus-rtu", "read_holdreg"]).unwrap();

        assert_eq!(cli.port, "/dev/ttyUSB0");
        assert_eq!(cli.baud, 9600);
        assert_eq!((cli.de, cli.re), (17, 27));
        assert_eq!((cli.slave, cli.addr), (1, 0));
        assert!(cli.config.is_none());
        assert!(matches!(cli.command, Command::ReadHoldreg { count: 1 }));

        let cli = Cli::try_parse_from(["modbus-rtu", "write_coil"]).unwrap();
        assert!(matches!(cli.command, Command::WriteCoil { value: false }));
    }

    #[test]
    fn test_hex_and_global_args_after_subcommand() {
        let cli = Cli::try_parse_from([
            "modbus-rtu", "read_coils", "-n", "0x10", "--addr", "0x0013", "-s", "0x11", "-p", "/dev/ttyAMA0",
        ])
        .unwrap();

        assert_eq!(cli.slave, 0x11);
        assert_eq!(cli.addr, 0x13);
        assert_eq!(cli.port, "/dev/ttyAMA0");
        assert!(matches!(cli.command, Command::ReadCoils { count: 16 }));
    }

    #[test]
    fn test_write_lists() {
        let cli = Cli::try_parse_from(["modbus-rtu", "write_coils", "1", "0", "on"]).unwrap();
        match cli.command {
            Command::WriteCoils { values } => assert_eq!(values, vec![true, false, true]),
            _ => panic!("expected write_coils"),
        }

        let cli = Cli::try_parse_from(["modbus-rtu", "write_registers", "10", "0xFFFF"]).unwrap();
        match cli.command {
            Command::WriteRegisters { values } => assert_eq!(values, vec![10, 0xFFFF]),
            _ => panic!("expected write_registers"),
        }
    }

    #[test]
    fn test_rejects_bad_arguments() {
        assert!(Cli::try_parse_from(["modbus-rtu", "write_registers"]).is_err());
        assert!(Cli::try_parse_from(["modbus-rtu", "write_coils", "2"]).is_err());
        assert!(Cli::try_parse_from(["modbus-rtu", "read_coils", "--slave", "256"]).is_err());
        assert!(Cli::try_parse_from(["modbus-rtu", "read_coils", "--addr", "0x10000"]).is_err());
        assert!(Cli::try_parse_from(["modbus-rtu", "read_everything"]).is_err());
        assert!(Cli::try_parse_from(["modbus-rtu"]).is_err());
    }

    #[test]
    fn test_config_file_replaces_serial_flags() {
        let path = std::env::temp_dir().join(format!("modbus-rtu-cli-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"serial": {"port": "/dev/ttyS3", "baud_rate": 19200}, "de_pin": 5}"#)
            .unwrap();

        let cli = Cli::try_parse_from(["modbus-rtu", "read_coils", "-c", path.to_str().unwrap(), "-b", "115200"])
            .unwrap();
        let config = cli.master_config().unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.serial.port, "/dev/ttyS3");
        assert_eq!(config.serial.baud_rate, 19200);
        assert_eq!((config.de_pin, config.re_pin), (5, 27));
    }
}

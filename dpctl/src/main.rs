//! # dpctl
//!
//! Command line front-end for querying and configuring a Dragon Probe
//! through its vendor configuration interface.
use std::error::Error;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use clap_num::maybe_hex;
use dragonprobe::{Registry, ScanResult, ScanType, Session};
use env_logger::Env;

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(about = "Query and configure a Dragon Probe", long_about = None)]
struct Args {
    #[arg(
        long,
        help = "Connection string. Either a character device such as /dev/dragonprobe-0, a USB bus.device[.port] number, or a USB VID:PID pair. Defaults to the only character device present, then to the only cafe:1312 device"
    )]
    conn: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show device info
    GetDeviceInfo,
    /// Show mode info. A mode number or 'all'; defaults to the current mode
    GetModeInfo { mode: Option<String> },
    /// Switch the device to another mode
    SetMode { mode: u8 },
    /// Get, enable or disable UART hardware flow control (mode 1)
    UartCtsRts(FlowControl),
    /// Get or set the I2C address of the emulated temperature sensor (mode 1)
    Tempsensor(TempSensor),
    /// Run the JTAG/SWD pinout scanner (mode 3)
    JtagScan {
        #[arg(value_enum)]
        kind: ScanKind,
        start_pin: u8,
        end_pin: u8,
    },
    /// Get or set logic analyzer overclocking (mode 4)
    SumpOverclock(Overclock),
    /// Show the persistent storage header
    StorageInfo,
    /// Dump the stored data of a mode
    StorageGet { mode: u8 },
    /// Write pending settings to flash
    StorageFlush,
}

#[derive(ClapArgs)]
#[group(required = true, multiple = false)]
struct FlowControl {
    #[arg(long)]
    get: bool,
    #[arg(long)]
    enable: bool,
    #[arg(long)]
    disable: bool,
}

#[derive(ClapArgs)]
#[group(required = true, multiple = false)]
struct TempSensor {
    #[arg(long)]
    get: bool,
    #[arg(long, value_parser = maybe_hex::<u8>, help = "I2C address, decimal or 0x-prefixed hex")]
    set: Option<u8>,
    #[arg(long)]
    disable: bool,
}

#[derive(ClapArgs)]
#[group(required = true, multiple = false)]
struct Overclock {
    #[arg(long)]
    get: bool,
    #[arg(long)]
    set: Option<u8>,
    #[arg(long, help = "Short for --set 1")]
    enable: bool,
    #[arg(long, help = "Short for --set 0")]
    disable: bool,
}

#[derive(Copy, Clone, ValueEnum)]
enum ScanKind {
    Jtag,
    Swd,
    Sbw,
}

impl From<ScanKind> for ScanType {
    fn from(value: ScanKind) -> Self {
        match value {
            ScanKind::Jtag => ScanType::Jtag,
            ScanKind::Swd => ScanType::Swd,
            ScanKind::Sbw => ScanType::Sbw,
        }
    }
}

fn format_address(address: Option<u8>) -> String {
    match address {
        Some(address) => format!("0x{:02x}", address),
        None => "disabled".to_string(),
    }
}

fn print_mode(session: &Session, mode: u8) -> Result<(), Box<dyn Error>> {
    let info = session
        .mode_info(mode)
        .ok_or_else(|| format!("mode {} is not available on this device", mode))?;
    let current = if mode == session.current_mode() {
        " (current)"
    } else {
        ""
    };
    println!("mode {}{}: {}", mode, current, info);
    Ok(())
}

fn hexdump(data: &[u8]) {
    for (row, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        println!("{:08x}  {}", row * 16, hex.join(" "));
    }
}

fn run(mut session: Session, command: Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::GetDeviceInfo => {
            println!("{}", session.info_text());
            println!("protocol version: {:04x}", session.protocol_version());
            let current = session.current_mode();
            match session.mode_info(current) {
                Some(info) => println!("current mode: {} ({})", current, info.name),
                None => println!("current mode: {}", current),
            }
            let modes: Vec<String> = session.modes().keys().map(u8::to_string).collect();
            println!("available modes: {}", modes.join(", "));
        }
        Command::GetModeInfo { mode } => match mode.as_deref() {
            Some("all") => {
                for mode in session.modes().keys() {
                    print_mode(&session, *mode)?;
                }
            }
            Some(mode) => print_mode(&session, mode.parse()?)?,
            None => print_mode(&session, session.current_mode())?,
        },
        Command::SetMode { mode } => {
            session.set_mode(mode)?;
            println!("switched to mode {}, the device will re-enumerate", mode);
            return Ok(());
        }
        Command::UartCtsRts(args) => {
            if args.get {
                let enabled = session.uart_flow_control()?;
                println!("{}", if enabled { "enabled" } else { "disabled" });
            } else {
                session.set_uart_flow_control(args.enable)?;
            }
        }
        Command::Tempsensor(args) => {
            if args.get {
                println!("{}", format_address(session.tempsensor_address()?));
            } else {
                let change = session.set_tempsensor_address(args.set)?;
                println!(
                    "{} -> {}",
                    format_address(change.previous),
                    format_address(change.current)
                );
            }
        }
        Command::JtagScan {
            kind,
            start_pin,
            end_pin,
        } => {
            let (min, max) = session.scan_pin_range()?;
            if start_pin < min || end_pin > max || start_pin > end_pin {
                return Err(format!(
                    "pin range {}..={} invalid, the device supports {}..={}",
                    start_pin, end_pin, min, max
                )
                .into());
            }
            match session.run_scan(kind.into(), start_pin, end_pin, SCAN_POLL_INTERVAL)? {
                ScanResult::Jtag(matches) => {
                    println!("{} JTAG match(es)", matches.len());
                    for found in matches {
                        println!("{}", found);
                    }
                }
                ScanResult::Swd(matches) => {
                    println!("{} SWD match(es)", matches.len());
                    for found in matches {
                        println!("{}", found);
                    }
                }
                ScanResult::Stopped => println!("scan was stopped"),
            }
        }
        Command::SumpOverclock(args) => {
            if args.get {
                println!("{}", session.sump_overclock()?);
            } else {
                let level = match (args.set, args.enable) {
                    (Some(level), _) => level,
                    (None, true) => 1,
                    (None, false) => 0,
                };
                session.set_sump_overclock(level)?;
            }
        }
        Command::StorageInfo => {
            let info = session.storage_info()?;
            println!("magic: {}", if info.magic_valid() { "ok" } else { "invalid" });
            println!("firmware version: {:04x}", info.version);
            println!("stored mode: {}", info.current_mode);
            println!(
                "mode table: {} entries, checksum {:08x} ({})",
                info.nmodes,
                info.table_djb2,
                if info.table_valid() { "ok" } else { "mismatch" }
            );
            for entry in &info.modes {
                println!(
                    "  mode {}: version {:04x}, {} bytes at 0x{:07x}, checksum {:08x}",
                    entry.mode, entry.version, entry.data_size, entry.offset, entry.data_djb2
                );
            }
        }
        Command::StorageGet { mode } => hexdump(&session.storage_data_verified(mode)?),
        Command::StorageFlush => {
            let written = session.storage_flush()?;
            println!("{}", if written { "flushed" } else { "nothing to flush" });
        }
    }
    session.close();
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let registry = Registry::with_defaults();
    let session = registry.connect(args.conn.as_deref()).map_err(|err| {
        log::error!("Could not connect to a device");
        err
    })?;
    run(session, args.command)
}

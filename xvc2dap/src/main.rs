use std::error::Error;
use std::time::Duration;

use clap::Parser;
use env_logger::Env;
use xvc_protocol::XvcInfo;
use xvc_server::server::Builder;
use xvc2dap::{DapBridge, cmsis_dap::CmsisDap};

#[derive(Parser)]
#[command(about = "Xilinx Virtual Cable (XVC) server for CMSIS-DAP probes", long_about = None)]
struct Args {
    #[arg(
        long,
        help = "Connect to the CMSIS-DAP probe with this serial number. Required if more than one probe is attached"
    )]
    serial: Option<String>,

    #[arg(
        long,
        num_args = 1..,
        help = "IR length of each device in the chain. Defaults to the probe's own setting"
    )]
    irlen: Vec<u8>,

    #[arg(long, default_value = "1000", help = "USB transfer timeout in milliseconds")]
    timeout_ms: u64,

    #[arg(default_value = "localhost", help = "Host to bind the XVC server to")]
    address: String,

    #[arg(default_value = "2542", help = "Port to bind the XVC server to")]
    port: u16,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::debug!(
        "Parsed arguments: address={}, port={}, serial={:?}, irlen={:?}",
        args.address,
        args.port,
        args.serial,
        args.irlen
    );

    let mut probe = CmsisDap::find(
        args.serial.as_deref(),
        Duration::from_millis(args.timeout_ms),
    )?;
    probe.connect_jtag()?;
    if !args.irlen.is_empty() {
        log::info!("Configuring JTAG chain with IR lengths {:?}", args.irlen);
        probe.configure_jtag(&args.irlen)?;
    }

    let mut server = Builder::new()
        .advertised_vector_len(XvcInfo::DEFAULT_MAX_VECTOR_LEN)
        .build(DapBridge::new(probe));
    log::info!("Binding to {}:{}", args.address, args.port);
    server.listen((args.address.as_str(), args.port))?;
    Ok(())
}

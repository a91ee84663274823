//! Download an ESP-IDF build to one or more serial ports.

use clap::Parser;
use esptest::cli::{port_range, CommonArgs};
use esptest::discovery::{compute_serial_port, list_ports, SystemEnumerator};
use esptest::error::{report, AppError, AppResult};
use esptest::tools::{BinPath, DownBinTool, SystemRunner};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "esp-downbin", version, about = "Download bin")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// ESP-IDF build directory
    #[arg(default_value = "./build")]
    bin_path: PathBuf,

    /// Ports to download to
    #[arg(short, long, num_args = 1..)]
    ports: Vec<String>,

    /// Port range (Linux), e.g. "0-10" for ttyUSB0 .. ttyUSB10
    #[arg(long, conflicts_with = "ports")]
    range: Option<String>,

    /// Download to every serial port
    #[arg(long, conflicts_with_all = ["ports", "range"])]
    all: bool,

    /// Baud rates to try in order
    #[arg(short, long, value_delimiter = ',')]
    baud: Vec<u32>,

    /// Overwrite the nvs partition with a blank image
    #[arg(long, overrides_with = "no_erase_nvs")]
    erase_nvs: bool,

    /// Keep the nvs partition
    #[arg(long)]
    no_erase_nvs: bool,
}

fn run(args: Args) -> AppResult<()> {
    let config = args.common.init()?;
    let bin = BinPath::new(&args.bin_path)?;

    let ports = if !args.ports.is_empty() {
        args.ports.clone()
    } else if let Some(range) = &args.range {
        port_range(range).ok_or_else(|| AppError::Usage(format!("invalid --range {range:?}")))?
    } else if args.all {
        list_ports(None)?.into_iter().map(|p| p.device).collect()
    } else {
        vec![config.serial.port.clone().unwrap_or_else(|| "/dev/ttyUSB0".to_string())]
    };
    let erase_nvs = if args.erase_nvs {
        true
    } else if args.no_erase_nvs {
        false
    } else {
        config.download.erase_nvs
    };

    info!("Download {} to {:?}", args.bin_path.display(), ports);
    let mut failed = Vec::new();
    for port in &ports {
        let device = compute_serial_port(&SystemEnumerator, &config.serial.resolve_port(port), true)?;
        let tool = DownBinTool::new(bin.clone(), device, &config.download)
            .with_bauds(args.baud.clone())
            .with_erase_nvs(erase_nvs);
        if let Err(e) = tool.download(&SystemRunner) {
            error!("{e}");
            failed.push(port.clone());
        }
    }

    if failed.is_empty() {
        info!("Downloaded to {} port(s)", ports.len());
        Ok(())
    } else {
        Err(AppError::Failed(format!("download failed on {}", failed.join(", "))))
    }
}

fn main() -> ExitCode {
    report(run(Args::parse()))
}

//! List USB serial ports, optionally probing each for an ESP chip.

use clap::Parser;
use esptest::cli::CommonArgs;
use esptest::discovery::{list_ports, parse_usb_id, PortFilter, PortInfo};
use esptest::error::{report, AppError, AppResult};
use esptest::tools::{detect_chip, split_command, ChipInfo, SystemRunner};
use serde::Serialize;
use std::process::ExitCode;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "esp-listports", version, about = "List USB serial devices")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Only devices with this USB vendor id (hex)
    #[arg(long, value_parser = parse_usb_id)]
    vid: Option<u16>,

    /// Only devices with this USB product id (hex)
    #[arg(long, value_parser = parse_usb_id)]
    pid: Option<u16>,

    /// Only devices whose USB location contains this text
    #[arg(long)]
    location: Option<String>,

    /// Probe each port with `esptool flash_id`
    #[arg(short, long)]
    detect: bool,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Row<'a> {
    #[serde(flatten)]
    port: &'a PortInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    chip: Option<ChipInfo>,
}

fn run(args: Args) -> AppResult<()> {
    let config = args.common.init()?;
    let filter = PortFilter {
        vid: args.vid,
        pid: args.pid,
        location: args.location,
    };
    let ports = list_ports(Some(&filter))?;

    let esptool = split_command(&config.download.esptool);
    let rows: Vec<Row> = ports
        .iter()
        .map(|port| {
            let chip = if args.detect {
                detect_chip(&SystemRunner, &esptool, &port.device).unwrap_or_else(|e| {
                    warn!(port = %port.device, "chip detection failed: {e}");
                    None
                })
            } else {
                None
            };
            Row { port, chip }
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows).map_err(AppError::from)?);
        return Ok(());
    }

    println!("All devices:");
    if args.detect {
        println!("{:>14},  {:12},  {:9},  {:8},  description", "Device", "Location", "hwid", "target");
    } else {
        println!("{:>14},  {:12},  {:9},  description", "Device", "Location", "hwid");
    }
    for row in &rows {
        let port = row.port;
        match (&row.chip, args.detect) {
            (Some(chip), _) => println!(
                "{:>14},  {:12},  {:9},  {:8},  {} ({}) {}",
                port.device,
                port.location,
                port.hwid(),
                chip.target,
                chip.name,
                chip.revision,
                chip.mac
            ),
            (None, true) => println!(
                "{:>14},  {:12},  {:9},  {:8},  {}",
                port.device,
                port.location,
                port.hwid(),
                "unknown",
                port.description
            ),
            (None, false) => println!(
                "{:>14},  {:12},  {:9},  {}",
                port.device,
                port.location,
                port.hwid(),
                port.description
            ),
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    report(run(Args::parse()))
}

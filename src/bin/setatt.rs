//! Set (or read) an RF attenuator.

use clap::Parser;
use esptest::cli::CommonArgs;
use esptest::control::{find_att_dev, AttType};
use esptest::error::{report, AppError, AppResult};
use std::process::ExitCode;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "esp-setatt", version, about = "Set Attenuator")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Attenuation to set in dB
    #[arg(short = 'a', long = "att-value", alias = "att_value", required_unless_present = "get")]
    att_value: Option<f64>,

    /// Attenuator device path, USB location or host:port, e.g. /dev/ttyUSB0, 1-5.1:1.0
    #[arg(short, long)]
    port: Option<String>,

    /// Attenuator type
    #[arg(long = "type", value_enum)]
    att_type: Option<AttType>,

    /// Channel of multi-channel attenuators
    #[arg(short, long, default_value_t = 1)]
    channel: u32,

    /// Read the current attenuation instead of setting it
    #[arg(long, conflicts_with = "att_value")]
    get: bool,
}

fn run(args: Args) -> AppResult<()> {
    let config = args.common.init()?;
    let device = args.port.as_deref().or(config.attenuator.device.as_deref());
    let att_type = args.att_type.or(config.attenuator.att_type);

    let att_dev = find_att_dev(device, att_type)?;
    let target = att_dev.target(args.channel);
    let mut att = att_dev.open(&config.attenuator)?;

    if args.get {
        let value = att.get_status(&target)?;
        info!("Attenuation of {target}: {value}");
        println!("{value}");
        return Ok(());
    }

    let value = args
        .att_value
        .ok_or_else(|| AppError::Usage("--att-value is required".into()))?;
    att.set_attenuation(&target, value)?;
    info!("Set att {value} on {target}: done");
    Ok(())
}

fn main() -> ExitCode {
    report(run(Args::parse()))
}

//! Print everything a device writes to its serial port.

use clap::Parser;
use esptest::cli::CommonArgs;
use esptest::discovery::{compute_serial_port, SystemEnumerator};
use esptest::dut::{Dut, DutError, LogTarget, Pattern, SerialDut};
use esptest::error::{report, AppError, AppResult};
use esptest::port::PortConfiguration;
use esptest::tools::console_baud;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "esp-monitor", version, about = "Serial monitor for ESP devices")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Device path, port name or USB location (default: serial.port / ESPPORT)
    port: Option<String>,

    /// Baud rate (default: console baud of --bin-path, else serial.baud)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Build directory to read the console baud rate from
    #[arg(long)]
    bin_path: Option<PathBuf>,

    /// Hard-reset the chip before monitoring
    #[arg(short, long)]
    reset: bool,

    /// Also append the output to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(short, long)]
    timeout: Option<f64>,

    /// Exit successfully once this regex appears; fail if it does not within --timeout
    #[arg(short, long)]
    expect: Option<String>,
}

fn run(args: Args) -> AppResult<()> {
    let config = args.common.init()?;
    let requested = args
        .port
        .clone()
        .or_else(|| config.serial.port.clone())
        .ok_or_else(|| AppError::Usage("no port given and serial.port is not set".into()))?;
    let path = compute_serial_port(&SystemEnumerator, &config.serial.resolve_port(&requested), false)?;

    let baud = args
        .baud
        .or_else(|| args.bin_path.as_deref().and_then(console_baud))
        .unwrap_or(config.serial.baud);
    let log = LogTarget::from_option(args.log_file.clone().or_else(|| config.dut.log_file_for(&path)));
    let timeout = args.timeout.map(Duration::from_secs_f64);

    let mut dut = SerialDut::serial_logged(&path, PortConfiguration::with_baud(baud), log)
        .with_read_interval(config.serial.read_interval())
        .opened()?;
    info!("Monitoring {path}@{baud}");
    if args.reset {
        dut.reset()?;
    }

    if let Some(expect) = &args.expect {
        let pattern = Pattern::regex(expect).map_err(|e| AppError::Usage(format!("invalid --expect: {e}")))?;
        let found = dut.expect(&pattern, timeout.unwrap_or(config.dut.expect_timeout()));
        let mut stdout = std::io::stdout().lock();
        match found {
            Ok(m) => {
                stdout.write_all(&m.before)?;
                stdout.write_all(&m.matched)?;
                writeln!(stdout)?;
                info!("found {}", m.as_str());
                return Ok(());
            }
            Err(e @ DutError::Timeout { .. }) => {
                stdout.write_all(dut.buffered())?;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        }
    }

    let started = Instant::now();
    let mut stdout = std::io::stdout().lock();
    loop {
        let data = dut.read(Duration::from_millis(100))?;
        if !data.is_empty() {
            stdout.write_all(&data)?;
            stdout.flush()?;
        }
        if timeout.is_some_and(|t| started.elapsed() >= t) {
            break;
        }
    }
    dut.close();
    Ok(())
}

fn main() -> ExitCode {
    report(run(Args::parse()))
}

//! Copy build artifacts to a new directory.

use clap::Parser;
use esptest::cli::CommonArgs;
use esptest::error::{report, AppResult};
use esptest::tools::{copy_bin_to_new_path, CopyOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "esp-copybin", version, about = "Copy bin files")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Source directory of build bin files
    from_dir: PathBuf,

    /// Destination directory
    to_dir: PathBuf,

    /// Skip elf and map files
    #[arg(long)]
    no_elf: bool,

    /// Fail instead of replacing an existing destination
    #[arg(long)]
    no_force: bool,

    /// Extra glob patterns relative to the build directory
    #[arg(short, long)]
    extra: Vec<String>,
}

fn run(args: Args) -> AppResult<()> {
    args.common.init()?;
    let options = CopyOptions {
        force: !args.no_force,
        copy_elf: !args.no_elf,
        extra_files: args.extra,
    };
    let copied = copy_bin_to_new_path(&args.from_dir, &args.to_dir, &options)?;
    info!("Copied {} files to {}", copied.len(), args.to_dir.display());
    Ok(())
}

fn main() -> ExitCode {
    report(run(Args::parse()))
}

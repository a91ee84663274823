//! Check installed Python packages against requirements files.

use clap::Parser;
use esptest::cli::CommonArgs;
use esptest::error::{report, AppError, AppResult};
use esptest::tools::{check_requirements, pip_list, SystemRunner};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "esp-pipcheck", version, about = "Check pip requirements")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Requirements files
    #[arg(default_value = "requirements.txt")]
    requirements_files: Vec<PathBuf>,

    /// Python interpreter to query (default: download.python)
    #[arg(long)]
    python: Option<String>,
}

fn run(args: Args) -> AppResult<()> {
    let config = args.common.init()?;
    let python = args.python.as_deref().unwrap_or(&config.download.python);
    let installed = pip_list(&SystemRunner, python)?;

    let mut unmet = 0;
    for file in &args.requirements_files {
        let problems = check_requirements(file, &installed)?;
        if problems.is_empty() {
            info!("{}: all requirements met", file.display());
            continue;
        }
        unmet += problems.len();
        error!(
            "The following packages do not meet the requirements:\n  - {}\n\
             Please run \"pip install -r {}\" to update the dependencies",
            problems.join("\n  - "),
            file.display()
        );
    }

    if unmet == 0 {
        Ok(())
    } else {
        Err(AppError::Failed(format!("{unmet} requirement(s) not met")))
    }
}

fn main() -> ExitCode {
    report(run(Args::parse()))
}

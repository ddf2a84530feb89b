mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use morphpack_lib::consts::DEFAULT_CONFIG_FILE;
use morphpack_lib::target::TargetId;
use tracing_subscriber::EnvFilter;

use crate::cmd::{BuildArgs, cmd_build};
use crate::output::{OutputFormat, print_error};

/// morphpack - Build standalone executables of a Python program for several targets
#[derive(Parser)]
#[command(name = "morphpack")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Path of the output binary; its directory receives one executable per target
  #[arg(value_name = "OUTPUT")]
  binary: PathBuf,

  /// Build configuration file
  #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
  config: PathBuf,

  /// Build only this target (repeatable), e.g. glibc-linux/x64
  #[arg(short, long = "target", value_name = "ID")]
  targets: Vec<TargetId>,

  /// Maximum number of sandboxes running at once
  #[arg(short, long)]
  jobs: Option<usize>,

  /// Export nothing unless every target builds
  #[arg(long)]
  all_or_nothing: bool,

  /// Timeout for each sandbox step, e.g. "20m" (overrides the config)
  #[arg(long, value_parser = humantime::parse_duration)]
  timeout: Option<Duration>,

  /// Report format
  #[arg(short = 'o', long = "output", value_enum, default_value_t)]
  format: OutputFormat,

  /// Enable verbose output
  #[arg(short, long)]
  verbose: bool,
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let args = BuildArgs {
    binary: cli.binary,
    config: cli.config,
    targets: cli.targets,
    jobs: cli.jobs,
    all_or_nothing: cli.all_or_nothing,
    timeout: cli.timeout,
    format: cli.format,
    verbose: cli.verbose,
  };

  match cmd_build(args) {
    Ok(true) => ExitCode::SUCCESS,
    Ok(false) => ExitCode::FAILURE,
    Err(err) => {
      print_error(&format!("{err:#}"));
      ExitCode::FAILURE
    }
  }
}

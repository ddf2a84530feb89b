//! The build run: load the configuration, drive the orchestrator and report.
//!
//! Ctrl-C cancels the run; running sandboxes stop their processes and tear
//! down before the report is printed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use morphpack_lib::config::BuildConfig;
use morphpack_lib::orchestrate::{Orchestrator, RunOptions};
use morphpack_lib::target::TargetId;

use crate::output::{OutputFormat, print_json, print_report};

pub struct BuildArgs {
  pub binary: PathBuf,
  pub config: PathBuf,
  pub targets: Vec<TargetId>,
  pub jobs: Option<usize>,
  pub all_or_nothing: bool,
  pub timeout: Option<Duration>,
  pub format: OutputFormat,
  pub verbose: bool,
}

/// Split the output binary path into the export directory and artifact name.
fn split_binary(binary: &Path) -> Result<(PathBuf, String)> {
  let Some(name) = binary.file_name() else {
    bail!("output path {} has no file name", binary.display());
  };
  let Some(name) = name.to_str() else {
    bail!("output file name {} is not valid UTF-8", binary.display());
  };
  let dir = match binary.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
    _ => PathBuf::from("."),
  };
  Ok((dir, name.to_string()))
}

/// Run the build. Returns whether every required target was exported.
pub fn cmd_build(args: BuildArgs) -> Result<bool> {
  let (export_dir, artifact) = split_binary(&args.binary)?;
  let config = BuildConfig::load(&args.config)?;

  let options = RunOptions {
    export_dir,
    artifact: Some(artifact),
    targets: args.targets,
    jobs: args.jobs,
    all_or_nothing: args.all_or_nothing,
    timeout: args.timeout,
  };
  let orchestrator = Orchestrator::new(config, options);

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt.block_on(async {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, cancelling build");
        on_interrupt.cancel();
      }
    });
    orchestrator.run(cancel).await
  })?;

  if args.format.is_json() {
    print_json(&report)?;
  } else {
    print_report(&report, args.verbose);
  }

  Ok(report.success())
}

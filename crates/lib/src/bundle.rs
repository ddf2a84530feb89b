//! Bundler invocation.
//!
//! Turns the payload entry point plus its packages and data directories into a
//! single standalone executable with one `python -m nuitka` run. The toolchain
//! writes into a staging directory; only a complete output is renamed onto the
//! final path, so a failed or interrupted run never leaves a partial file
//! behind and a re-run replaces instead of accumulating.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::process::{Executor, Invocation, ProcessError, RunLimits};
use crate::util::paths::PathMap;

/// Lines of toolchain stderr kept in errors.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum BundleError {
  #[error("payload entry point not found: {}", .0.display())]
  MissingEntry(PathBuf),

  #[error("data directory for mount '{mount}' not found: {}", .path.display())]
  MissingDataDir { mount: String, path: PathBuf },

  #[error("path {} is not visible from the host", .0.display())]
  Unmapped(PathBuf),

  #[error("cannot prepare output directory {}: {source}", .path.display())]
  OutputDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid output filename '{0}'")]
  InvalidFilename(String),

  #[error("bundler exited with code {}:\n{stderr}", display_code(.code))]
  ToolchainFailed { code: Option<i32>, stderr: String },

  #[error("bundler did not produce {}", .0.display())]
  MissingOutput(PathBuf),

  #[error("failed to move {} into place: {source}", .path.display())]
  Finalize {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Process(#[from] ProcessError),
}

fn display_code(code: &Option<i32>) -> String {
  match code {
    Some(code) => code.to_string(),
    None => "none (killed by signal)".to_string(),
  }
}

/// A data directory to embed, in the sandbox's view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataInclusion {
  pub source: PathBuf,
  pub mount: String,
}

/// One bundler run. Paths are in the sandbox's view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRequest {
  /// Interpreter that has the bundler installed.
  pub python: String,
  /// Bundler module, run as `python -m <module>`.
  pub module: String,
  pub entry: PathBuf,
  pub include_packages: Vec<String>,
  pub data_dirs: Vec<DataInclusion>,
  pub output_dir: PathBuf,
  pub output_filename: String,
  pub extra_args: Vec<String>,
}

impl BundleRequest {
  fn staging_dir(&self) -> PathBuf {
    self.output_dir.join(format!(".staging-{}", self.output_filename))
  }

  /// The toolchain command line, writing into `staging`.
  pub fn invocation(&self, staging: &Path) -> Result<Invocation, ProcessError> {
    let mut inv = Invocation::new(&self.python)
      .args(["-m", self.module.as_str()])
      .args(["--standalone", "--onefile", "--remove-output", "--assume-yes-for-downloads"]);

    for package in &self.include_packages {
      inv = inv.arg(format!("--include-package={package}"));
    }
    for data in &self.data_dirs {
      let source = crate::process::path_to_arg(&data.source)?;
      inv = inv.arg(format!("--include-data-dir={source}={}", data.mount));
    }

    let mut inv = inv
      .flag_path("--output-dir=", staging)?
      .arg(format!("--output-filename={}", self.output_filename))
      .args(self.extra_args.iter().cloned())
      .path_arg(&self.entry)?;
    if let Some(dir) = self.entry.parent().filter(|p| !p.as_os_str().is_empty()) {
      inv = inv.cwd(dir);
    }
    inv.validate()?;
    Ok(inv)
  }
}

/// Runs bundle requests through an executor.
pub struct Bundler<'a, E> {
  executor: &'a E,
  paths: &'a PathMap,
  limits: RunLimits,
}

impl<'a, E: Executor> Bundler<'a, E> {
  pub fn new(executor: &'a E, paths: &'a PathMap, limits: RunLimits) -> Self {
    Self {
      executor,
      paths,
      limits,
    }
  }

  fn host(&self, sandbox_path: &Path) -> Result<PathBuf, BundleError> {
    self
      .paths
      .to_host(sandbox_path)
      .ok_or_else(|| BundleError::Unmapped(sandbox_path.to_path_buf()))
  }

  /// Produce `<output_dir>/<output_filename>` and return its host path.
  pub async fn bundle(&self, request: &BundleRequest, cancel: &CancellationToken) -> Result<PathBuf, BundleError> {
    let name = &request.output_filename;
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\', '\0']) {
      return Err(BundleError::InvalidFilename(name.clone()));
    }

    let entry = self.host(&request.entry)?;
    if !entry.is_file() {
      return Err(BundleError::MissingEntry(entry));
    }
    for data in &request.data_dirs {
      let path = self.host(&data.source)?;
      if !path.is_dir() {
        return Err(BundleError::MissingDataDir {
          mount: data.mount.clone(),
          path,
        });
      }
    }

    let output_dir = self.host(&request.output_dir)?;
    tokio::fs::create_dir_all(&output_dir)
      .await
      .map_err(|source| BundleError::OutputDir {
        path: output_dir.clone(),
        source,
      })?;

    let staging_view = request.staging_dir();
    let staging = self.host(&staging_view)?;
    reset_dir(&staging).await.map_err(|source| BundleError::OutputDir {
      path: staging.clone(),
      source,
    })?;

    let result = self.run_toolchain(request, &staging_view, &staging, cancel).await;
    let result = match result {
      Ok(staged) => {
        let final_path = output_dir.join(name);
        tokio::fs::rename(&staged, &final_path)
          .await
          .map(|()| final_path)
          .map_err(|source| BundleError::Finalize {
            path: staged.clone(),
            source,
          })
      }
      Err(e) => Err(e),
    };

    if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
      debug!(path = %staging.display(), error = %e, "failed to remove staging directory");
    }

    match &result {
      Ok(path) => info!(path = %path.display(), "bundled executable"),
      Err(e) => warn!(output = %name, error = %e, "bundling failed"),
    }
    result
  }

  async fn run_toolchain(
    &self,
    request: &BundleRequest,
    staging_view: &Path,
    staging: &Path,
    cancel: &CancellationToken,
  ) -> Result<PathBuf, BundleError> {
    let invocation = request.invocation(staging_view)?;
    info!(cmd = %invocation.display(), "running bundler");

    let output = self.executor.execute(invocation, self.limits, cancel).await?;
    if !output.success() {
      return Err(BundleError::ToolchainFailed {
        code: output.code,
        stderr: output.stderr_tail(STDERR_TAIL_LINES),
      });
    }

    let staged = staging.join(&request.output_filename);
    if !staged.is_file() {
      return Err(BundleError::MissingOutput(staged));
    }
    debug!(path = %staged.display(), elapsed = ?output.elapsed, "bundler finished");
    Ok(staged)
  }
}

async fn reset_dir(path: &Path) -> std::io::Result<()> {
  match tokio::fs::remove_dir_all(path).await {
    Ok(()) => {}
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => return Err(e),
  }
  tokio::fs::create_dir_all(path).await
}

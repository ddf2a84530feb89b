//! Build orchestration.
//!
//! Runs one sandbox per selected target, bounded by a job limit, applies the
//! failure policy and exports the finished executables into one flat
//! directory under target-qualified names:
//! - names are rendered and checked for collisions before anything runs
//! - partial success by default; with all-or-nothing the first failure
//!   cancels the remaining sandboxes and nothing is exported
//! - export I/O failures abort the run

pub mod export;
pub mod types;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{BuildConfig, ConfigError, TargetConfig};
use crate::sandbox::{Sandbox, SandboxJob, SandboxReport};
use crate::target::TargetId;

pub use export::{ExportError, export_artifact, prepare_export_dir};
pub use types::{BuildReport, DataFingerprint, ExportEntry, ExportManifest, TargetFailure, TargetOutcome, TargetStatus};

#[derive(Debug, Error)]
pub enum OrchestrateError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Export(#[from] ExportError),

  #[error("sandbox task for {target} panicked: {message}")]
  Task { target: String, message: String },
}

/// Per-run settings, usually from the command line. Unset fields fall back
/// to the configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
  pub export_dir: PathBuf,
  /// Artifact base name; defaults to the payload entry's stem.
  pub artifact: Option<String>,
  /// Subset of declared targets; empty means all.
  pub targets: Vec<TargetId>,
  pub jobs: Option<usize>,
  pub all_or_nothing: bool,
  pub timeout: Option<Duration>,
}

/// A target ready to run: its configuration and its export filename.
#[derive(Debug, Clone)]
struct PlannedTarget {
  config: TargetConfig,
  filename: String,
}

pub struct Orchestrator {
  config: BuildConfig,
  options: RunOptions,
}

impl Orchestrator {
  pub fn new(config: BuildConfig, options: RunOptions) -> Self {
    Self { config, options }
  }

  fn all_or_nothing(&self) -> bool {
    self.options.all_or_nothing || self.config.orchestrator.all_or_nothing
  }

  /// Select targets and render their export names, rejecting collisions.
  fn plan(&self) -> Result<(String, Vec<PlannedTarget>), OrchestrateError> {
    let artifact = match &self.options.artifact {
      Some(name) => name.clone(),
      None => self.config.artifact_name()?,
    };
    let targets = self.config.select(&self.options.targets)?;
    if targets.is_empty() {
      return Err(ConfigError::NoTargets.into());
    }

    let mut owners: HashMap<String, TargetId> = HashMap::new();
    let mut planned = Vec::with_capacity(targets.len());
    for config in targets {
      let filename = config
        .environment()
        .export_filename(&artifact)
        .map_err(|source| ConfigError::Template {
          target: config.target,
          source,
        })?;
      if let Some(first) = owners.insert(filename.clone(), config.target) {
        return Err(
          ExportError::DuplicateName {
            name: filename,
            first,
            second: config.target,
          }
          .into(),
        );
      }
      planned.push(PlannedTarget { config, filename });
    }
    Ok((artifact, planned))
  }

  fn job(&self, artifact: &str, target: &TargetConfig) -> SandboxJob {
    let mut bundler = self.config.bundler.clone();
    if let Some(timeout) = self.options.timeout {
      bundler.timeout = Some(timeout);
    }
    SandboxJob {
      target: target.environment(),
      sandbox: target.sandbox.clone(),
      artifact: artifact.to_string(),
      entry: self.config.payload.entry.clone(),
      dependencies: self.config.dependencies.clone(),
      bundler,
      work_root: self.config.orchestrator.work_dir.clone(),
    }
  }

  /// Build every selected target and export the results.
  pub async fn run(&self, cancel: CancellationToken) -> Result<BuildReport, OrchestrateError> {
    let started = Instant::now();
    let (artifact, planned) = self.plan()?;
    let jobs = self
      .options
      .jobs
      .or(self.config.orchestrator.jobs)
      .unwrap_or(planned.len())
      .max(1);
    let all_or_nothing = self.all_or_nothing();

    info!(
      targets = planned.len(),
      jobs,
      all_or_nothing,
      export_dir = %self.options.export_dir.display(),
      "starting build"
    );

    let run_token = cancel.child_token();
    let semaphore = Arc::new(Semaphore::new(jobs));
    let mut join_set = JoinSet::new();
    let mut task_targets = HashMap::new();

    for target in &planned {
      let job = self.job(&artifact, &target.config);
      let id = target.config.target;
      let token = run_token.child_token();
      let semaphore = semaphore.clone();

      let handle = join_set.spawn(async move {
        let _permit = tokio::select! {
          permit = semaphore.acquire_owned() => permit.ok(),
          _ = token.cancelled() => None,
        };
        debug!(target = %id, "sandbox slot acquired");
        Sandbox::new(job).run(token).await
      });
      task_targets.insert(handle.id(), id);
    }

    let mut reports: HashMap<TargetId, SandboxReport> = HashMap::new();
    let mut aborted = false;
    while let Some(joined) = join_set.join_next().await {
      let report = match joined {
        Ok(report) => report,
        Err(e) => {
          run_token.cancel();
          let target = task_targets.get(&e.id()).copied();
          error!(target = ?target, error = %e, "sandbox task panicked");
          return Err(OrchestrateError::Task {
            target: target.map(|t| t.to_string()).unwrap_or_else(|| "unknown target".to_string()),
            message: e.to_string(),
          });
        }
      };

      if report.result.is_err() && all_or_nothing && !aborted {
        warn!(target = %report.target, "target failed, cancelling remaining targets");
        aborted = true;
        run_token.cancel();
      }
      reports.insert(report.target, report);
    }

    let mut manifest = ExportManifest {
      export_dir: self.options.export_dir.clone(),
      artifacts: Vec::new(),
    };
    let has_artifacts = reports.values().any(|r| r.result.is_ok());
    if has_artifacts && !aborted {
      prepare_export_dir(&self.options.export_dir).await?;
    }

    let mut outcomes = Vec::with_capacity(planned.len());
    for target in &planned {
      let id = target.config.target;
      let Some(report) = reports.remove(&id) else {
        continue;
      };

      let (status, error) = match report.result {
        Ok(artifact) if !aborted => {
          let entry = export_artifact(artifact, &self.options.export_dir, &target.filename).await?;
          manifest.artifacts.push(entry);
          (TargetStatus::Exported, None)
        }
        Ok(artifact) => {
          debug!(target = %id, path = %artifact.path.display(), "discarding artifact");
          (TargetStatus::Discarded, None)
        }
        Err(e) => (
          TargetStatus::Failed,
          Some(TargetFailure {
            kind: e.kind().to_string(),
            message: error_chain(&e),
          }),
        ),
      };

      outcomes.push(TargetOutcome {
        target: id,
        required: report.required,
        status,
        states: report.history,
        elapsed: report.elapsed,
        error,
      });
    }

    let report = BuildReport {
      manifest,
      outcomes,
      aborted,
      elapsed: started.elapsed(),
    };
    if report.success() {
      info!(exported = report.manifest.len(), elapsed = ?report.elapsed, "build finished");
    } else {
      warn!(
        exported = report.manifest.len(),
        failed = report.failures().count(),
        aborted,
        "build finished with failures"
      );
    }
    Ok(report)
  }
}

/// `error: cause: cause ...`
fn error_chain(error: &dyn std::error::Error) -> String {
  let mut message = error.to_string();
  let mut source = error.source();
  while let Some(cause) = source {
    let text = cause.to_string();
    if !message.contains(&text) {
      message.push_str(": ");
      message.push_str(&text);
    }
    source = cause.source();
  }
  message
}

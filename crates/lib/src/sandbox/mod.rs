//! Per-target build sandboxes.
//!
//! A sandbox takes one target from an empty scratch workspace to one
//! standalone executable:
//!
//! 1. `Provisioning`: workspace, container or host environment, provision
//!    commands, interpreter version check
//! 2. `DependenciesInstalled`: private venv, `pip install` of the requirements
//! 3. `Bundling`: data directory resolution, payload copy, bundler run
//! 4. `Succeeded` or `Failed`
//!
//! A sandbox is consumed by [`Sandbox::run`]; retrying means a new sandbox.

mod container;
mod host;
pub mod state;
mod workspace;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bundle::{BundleError, BundleRequest, Bundler, DataInclusion};
use crate::config::{BundlerSettings, DependencySpec, SandboxSpec};
use crate::locate::{DataLocator, ResolutionError, ResolvedDataDir};
use crate::platform::os::Os;
use crate::process::{Executor, Invocation, ProcessError, ProcessOutput, RunLimits};
use crate::target::{TargetEnvironment, TargetId};
use crate::util::paths::PathMap;

pub use container::ContainerBackend;
pub use host::HostBackend;
pub use state::{InvalidTransition, SandboxState, StateMachine};
pub use workspace::Workspace;

const VERSION_SNIPPET: &str = "import sys; print('.'.join(map(str, sys.version_info[:3])))";
const PURELIB_SNIPPET: &str = "import sysconfig; print(sysconfig.get_paths()['purelib'])";

#[derive(Debug, Error)]
pub enum ProvisioningError {
  #[error("failed to create sandbox workspace: {0}")]
  Workspace(#[source] std::io::Error),

  #[error("target {target} cannot be built on this host ({host}); use a container sandbox or a matching machine")]
  HostMismatch { target: TargetId, host: String },

  #[error("{step} failed with exit code {code:?}:\n{stderr}")]
  Command {
    step: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("{step}: {source}")]
  Process {
    step: String,
    #[source]
    source: ProcessError,
  },

  #[error("interpreter version {found} does not match required {expected}")]
  InterpreterMismatch { expected: String, found: String },

  #[error("sandbox path {} is not visible from the host", .0.display())]
  UnmappedPath(PathBuf),

  #[error("failed to stage {}: {source}", .path.display())]
  Stage {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("filesystem task failed: {0}")]
  Blocking(#[source] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum SandboxError {
  #[error(transparent)]
  Resolution(#[from] ResolutionError),

  #[error(transparent)]
  Provisioning(#[from] ProvisioningError),

  #[error(transparent)]
  Bundle(#[from] BundleError),

  #[error(transparent)]
  State(#[from] InvalidTransition),

  #[error("cancelled")]
  Cancelled,
}

impl SandboxError {
  /// Short label for reports.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Resolution(_) => "resolution",
      Self::Provisioning(_) => "provisioning",
      Self::Bundle(_) => "bundle",
      Self::State(_) => "state",
      Self::Cancelled => "cancelled",
    }
  }

  fn from_process(step: &str, error: ProcessError) -> Self {
    match error {
      ProcessError::Cancelled { .. } => Self::Cancelled,
      source => ProvisioningError::Process {
        step: step.to_string(),
        source,
      }
      .into(),
    }
  }
}

/// Everything one sandbox needs. Shared inputs are cloned per target.
#[derive(Debug, Clone)]
pub struct SandboxJob {
  pub target: TargetEnvironment,
  pub sandbox: SandboxSpec,
  /// Artifact base name, before target qualification.
  pub artifact: String,
  /// Payload entry point, host path.
  pub entry: PathBuf,
  pub dependencies: DependencySpec,
  pub bundler: BundlerSettings,
  /// Parent of the scratch workspace; system temp dir when unset.
  pub work_root: Option<PathBuf>,
}

impl SandboxJob {
  /// Limits applied to every step the sandbox runs, not only the bundler.
  fn limits(&self) -> RunLimits {
    RunLimits {
      timeout: self.bundler.timeout,
      grace: self.bundler.grace,
    }
  }
}

/// One successful sandbox run: a single executable plus the workspace it
/// lives in. Consumed by export; the workspace is deleted on drop.
#[derive(Debug)]
pub struct BuildArtifact {
  pub target: TargetId,
  /// Host path of the executable inside the workspace.
  pub path: PathBuf,
  pub data: Vec<ResolvedDataDir>,
  workspace: Workspace,
}

impl BuildArtifact {
  pub fn workspace(&self) -> &Path {
    self.workspace.root()
  }
}

/// How a sandbox ended.
#[derive(Debug)]
pub struct SandboxReport {
  pub target: TargetId,
  pub required: bool,
  pub history: Vec<SandboxState>,
  pub elapsed: Duration,
  pub result: Result<BuildArtifact, SandboxError>,
}

enum Backend {
  Container(ContainerBackend),
  Host(HostBackend),
}

impl Backend {
  fn new(job: &SandboxJob, workspace: &Workspace) -> Result<Self, ProvisioningError> {
    match &job.sandbox {
      SandboxSpec::Container(spec) => Ok(Self::Container(ContainerBackend::new(spec, &job.target, workspace))),
      SandboxSpec::Host(spec) => Ok(Self::Host(HostBackend::new(spec, &job.target, workspace)?)),
    }
  }

  fn paths(&self) -> &PathMap {
    match self {
      Self::Container(b) => b.paths(),
      Self::Host(b) => b.paths(),
    }
  }

  fn build_dir(&self) -> PathBuf {
    match self {
      Self::Container(b) => b.build_dir(),
      Self::Host(b) => b.build_dir(),
    }
  }

  fn output_dir(&self) -> PathBuf {
    match self {
      Self::Container(b) => b.output_dir(),
      Self::Host(b) => b.output_dir(),
    }
  }

  async fn start(&mut self, limits: RunLimits, cancel: &CancellationToken) -> Result<(), ProvisioningError> {
    match self {
      Self::Container(b) => b.start(limits, cancel).await,
      Self::Host(_) => Ok(()),
    }
  }

  async fn teardown(&mut self) {
    match self {
      Self::Container(b) => b.teardown().await,
      Self::Host(_) => {}
    }
  }
}

impl Executor for Backend {
  async fn execute(
    &self,
    invocation: Invocation,
    limits: RunLimits,
    cancel: &CancellationToken,
  ) -> Result<ProcessOutput, ProcessError> {
    match self {
      Self::Container(b) => b.execute(invocation, limits, cancel).await,
      Self::Host(b) => b.execute(invocation, limits, cancel).await,
    }
  }
}

/// Interpreter inside a venv, in the sandbox's view.
fn venv_python(venv: &Path, os: Os) -> PathBuf {
  match os {
    Os::Windows => venv.join("Scripts").join("python.exe"),
    _ => venv.join("bin").join("python"),
  }
}

/// `3.12` accepts `3.12` and `3.12.4`, not `3.1`.
fn version_matches(expected: &str, found: &str) -> bool {
  found == expected || found.starts_with(&format!("{expected}."))
}

pub struct Sandbox {
  job: SandboxJob,
  machine: StateMachine,
}

impl Sandbox {
  pub fn new(job: SandboxJob) -> Self {
    Self {
      job,
      machine: StateMachine::new(),
    }
  }

  pub fn state(&self) -> SandboxState {
    self.machine.current()
  }

  pub fn target(&self) -> TargetId {
    self.job.target.id()
  }

  /// Drive the sandbox to a terminal state. Teardown always runs.
  pub async fn run(mut self, cancel: CancellationToken) -> SandboxReport {
    let started = Instant::now();
    let target = self.target();
    info!(target = %target, kind = self.job.sandbox.kind(), "starting sandbox");

    let result = match self.drive(&cancel).await {
      Ok(artifact) => self
        .machine
        .advance(SandboxState::Succeeded)
        .map(|()| artifact)
        .map_err(SandboxError::from),
      Err(e) => Err(e),
    };

    if let Err(e) = &result {
      self.machine.fail();
      match e {
        SandboxError::Cancelled => info!(target = %target, state = %self.state(), "sandbox cancelled"),
        e => error!(target = %target, kind = e.kind(), error = %e, "sandbox failed"),
      }
    } else {
      info!(target = %target, elapsed = ?started.elapsed(), "sandbox succeeded");
    }

    SandboxReport {
      target,
      required: self.job.target.required,
      history: self.machine.into_history(),
      elapsed: started.elapsed(),
      result,
    }
  }

  async fn drive(&mut self, cancel: &CancellationToken) -> Result<BuildArtifact, SandboxError> {
    if cancel.is_cancelled() {
      return Err(SandboxError::Cancelled);
    }

    let slug = self.target().slug();
    let work_root = self.job.work_root.clone();
    let workspace = tokio::task::spawn_blocking(move || Workspace::create(work_root.as_deref(), &slug))
      .await
      .map_err(|e| ProvisioningError::Workspace(std::io::Error::other(e)))?
      .map_err(ProvisioningError::Workspace)?;
    debug!(target = %self.target(), path = %workspace.root().display(), "created workspace");

    let mut backend = Backend::new(&self.job, &workspace)?;
    let result = self.steps(&mut backend, &workspace, cancel).await;
    backend.teardown().await;

    let (path, data) = result?;
    Ok(BuildArtifact {
      target: self.target(),
      path,
      data,
      workspace,
    })
  }

  async fn steps(
    &mut self,
    backend: &mut Backend,
    workspace: &Workspace,
    cancel: &CancellationToken,
  ) -> Result<(PathBuf, Vec<ResolvedDataDir>), SandboxError> {
    let limits = self.job.limits();
    let os = self.job.target.os();

    // Provisioning
    backend.start(limits, cancel).await.map_err(|e| match e {
      ProvisioningError::Process {
        source: ProcessError::Cancelled { .. },
        ..
      } => SandboxError::Cancelled,
      e => e.into(),
    })?;
    for argv in self.job.sandbox.provision() {
      let Some((program, args)) = argv.split_first() else {
        continue;
      };
      step(backend, "provision", Invocation::new(program).args(args.iter().cloned()), limits, cancel).await?;
    }
    self.check_interpreter(backend, limits, cancel).await?;
    self.machine.advance(SandboxState::DependenciesInstalled)?;

    // Dependencies
    let venv = backend.build_dir().join("venv");
    let create_venv = Invocation::new(self.job.sandbox.interpreter())
      .args(["-m", "venv"])
      .path_arg(&venv)
      .map_err(|e| SandboxError::from_process("venv", e))?;
    step(backend, "venv", create_venv, limits, cancel).await?;

    let python = crate::process::path_to_arg(&venv_python(&venv, os))
      .map_err(|e| SandboxError::from_process("venv", e))?;
    let requirements = &self.job.dependencies.requirements;
    if !requirements.is_empty() {
      let install = Invocation::new(&python)
        .args(["-m", "pip", "install", "--no-input"])
        .args(requirements.iter().cloned());
      step(backend, "pip install", install, limits, cancel).await?;
    }
    self.machine.advance(SandboxState::Bundling)?;

    // Bundling
    let purelib = step(
      backend,
      "site-packages query",
      Invocation::new(&python).args(["-c", PURELIB_SNIPPET]),
      limits,
      cancel,
    )
    .await?;
    let purelib = PathBuf::from(purelib.stdout.trim());
    let site = backend
      .paths()
      .to_host(&purelib)
      .ok_or_else(|| ProvisioningError::UnmappedPath(purelib.clone()))?;
    debug!(target = %self.target(), site = %site.display(), "resolved site-packages");

    let locator = DataLocator::new([site]);
    let mut resolved = Vec::with_capacity(self.job.dependencies.data.len());
    let mut inclusions = Vec::with_capacity(self.job.dependencies.data.len());
    for spec in &self.job.dependencies.data {
      let dir = {
        let (locator, spec) = (locator.clone(), spec.clone());
        tokio::task::spawn_blocking(move || locator.locate(&spec))
          .await
          .map_err(ProvisioningError::Blocking)??
      };
      let source = match backend.paths().to_sandbox(&dir.path) {
        Some(view) => view,
        None => stage_data_dir(backend, workspace, &dir).await?,
      };
      inclusions.push(DataInclusion {
        source,
        mount: dir.mount.clone(),
      });
      resolved.push(dir);
    }

    let entry = self.stage_entry(backend, workspace).await?;
    let request = BundleRequest {
      python,
      module: self.job.bundler.module.clone(),
      entry,
      include_packages: self.job.dependencies.include_packages.clone(),
      data_dirs: inclusions,
      output_dir: backend.output_dir(),
      output_filename: self.job.target.sandbox_filename(&self.job.artifact),
      extra_args: self.job.bundler.extra_args.clone(),
    };

    let bundler = Bundler::new(&*backend, backend.paths(), limits);
    let path = bundler.bundle(&request, cancel).await.map_err(|e| match e {
      BundleError::Process(ProcessError::Cancelled { .. }) => SandboxError::Cancelled,
      e => e.into(),
    })?;

    Ok((path, resolved))
  }

  async fn check_interpreter(
    &self,
    backend: &Backend,
    limits: RunLimits,
    cancel: &CancellationToken,
  ) -> Result<(), SandboxError> {
    let query = Invocation::new(self.job.sandbox.interpreter()).args(["-c", VERSION_SNIPPET]);
    let output = step(backend, "interpreter check", query, limits, cancel).await?;
    let found = output.stdout.trim().to_string();
    debug!(target = %self.target(), version = %found, "interpreter version");

    match self.job.sandbox.python_version() {
      Some(expected) if !version_matches(expected, &found) => Err(
        ProvisioningError::InterpreterMismatch {
          expected: expected.to_string(),
          found,
        }
        .into(),
      ),
      _ => Ok(()),
    }
  }

  /// Copy the payload entry into the workspace; returns its sandbox path.
  async fn stage_entry(&self, backend: &Backend, workspace: &Workspace) -> Result<PathBuf, SandboxError> {
    let entry = &self.job.entry;
    let file_name = entry.file_name().ok_or_else(|| BundleError::MissingEntry(entry.clone()))?;
    if !entry.is_file() {
      return Err(BundleError::MissingEntry(entry.clone()).into());
    }

    let staged = workspace.build().join(file_name);
    tokio::fs::copy(entry, &staged)
      .await
      .map_err(|source| ProvisioningError::Stage {
        path: entry.clone(),
        source,
      })?;
    Ok(
      backend
        .paths()
        .to_sandbox(&staged)
        .ok_or(ProvisioningError::UnmappedPath(staged))?,
    )
  }
}

/// Run one sandbox step and require a zero exit.
async fn step(
  backend: &Backend,
  label: &str,
  invocation: Invocation,
  limits: RunLimits,
  cancel: &CancellationToken,
) -> Result<ProcessOutput, SandboxError> {
  debug!(step = label, cmd = %invocation.display(), "sandbox step");
  let output = backend
    .execute(invocation, limits, cancel)
    .await
    .map_err(|e| SandboxError::from_process(label, e))?;
  if !output.success() {
    return Err(
      ProvisioningError::Command {
        step: label.to_string(),
        code: output.code,
        stderr: output.stderr_tail(20),
      }
      .into(),
    );
  }
  Ok(output)
}

/// Copy a data directory that lives outside the mounts into the workspace.
async fn stage_data_dir(
  backend: &Backend,
  workspace: &Workspace,
  dir: &ResolvedDataDir,
) -> Result<PathBuf, SandboxError> {
  let dest = workspace.build().join("data").join(&dir.mount);
  debug!(from = %dir.path.display(), to = %dest.display(), "staging data directory");

  let (source, copy_to) = (dir.path.clone(), dest.clone());
  tokio::task::spawn_blocking(move || copy_tree(&source, &copy_to))
    .await
    .map_err(ProvisioningError::Blocking)??;

  Ok(
    backend
      .paths()
      .to_sandbox(&dest)
      .ok_or(ProvisioningError::UnmappedPath(dest))?,
  )
}

fn copy_tree(source: &Path, dest: &Path) -> Result<(), ProvisioningError> {
  for entry in walkdir::WalkDir::new(source) {
    let entry = entry.map_err(|e| ProvisioningError::Stage {
      path: source.to_path_buf(),
      source: e.into(),
    })?;
    let rel = entry.path().strip_prefix(source).unwrap_or(entry.path());
    let target = dest.join(rel);
    let io = |source| ProvisioningError::Stage {
      path: entry.path().to_path_buf(),
      source,
    };
    if entry.file_type().is_dir() {
      std::fs::create_dir_all(&target).map_err(io)?;
    } else {
      std::fs::copy(entry.path(), &target).map_err(io)?;
    }
  }
  Ok(())
}

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_DATA_MOUNT, DEFAULT_DATA_SUBDIR};
use crate::target::{TargetEnvironment, TargetId};

use super::duration;

/// Top-level build configuration (`morphpack.toml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
  pub payload: PayloadSpec,
  #[serde(default)]
  pub dependencies: DependencySpec,
  #[serde(default)]
  pub bundler: BundlerSettings,
  #[serde(default)]
  pub orchestrator: OrchestratorSettings,
  #[serde(default)]
  pub targets: Vec<TargetConfig>,
}

/// The program being packaged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PayloadSpec {
  /// Entry-point script. Relative paths are resolved against the config file.
  pub entry: PathBuf,
  /// Artifact base name; defaults to the entry's file stem.
  #[serde(default)]
  pub artifact: Option<String>,
}

impl PayloadSpec {
  pub fn artifact_name(&self) -> Option<String> {
    self
      .artifact
      .clone()
      .or_else(|| self.entry.file_stem().map(|s| s.to_string_lossy().to_string()))
  }
}

/// What the bundled executable must contain.
///
/// Identical for every target; only the resolved data paths differ.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencySpec {
  /// pip requirements installed into each sandbox, toolchain included.
  #[serde(default)]
  pub requirements: Vec<String>,
  /// Packages the bundler must include statically, in order.
  #[serde(default)]
  pub include_packages: Vec<String>,
  /// Non-code directories embedded verbatim.
  #[serde(default)]
  pub data: Vec<DataDirSpec>,
}

/// A package data directory to embed under a fixed mount name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataDirSpec {
  /// Import name of the package providing the data (e.g. `pymorphy3_dicts_ru`).
  pub package: String,
  #[serde(default = "default_subdir")]
  pub subdir: String,
  #[serde(default = "default_mount")]
  pub mount: String,
  /// Explicit data path, skipping the package lookup.
  #[serde(default)]
  pub path: Option<PathBuf>,
}

impl DataDirSpec {
  pub fn new(package: &str, mount: &str) -> Self {
    Self {
      package: package.to_string(),
      subdir: default_subdir(),
      mount: mount.to_string(),
      path: None,
    }
  }
}

fn default_subdir() -> String {
  DEFAULT_DATA_SUBDIR.to_string()
}

fn default_mount() -> String {
  DEFAULT_DATA_MOUNT.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundlerSettings {
  /// Module run as `python -m <module>`.
  #[serde(default = "default_bundler_module")]
  pub module: String,
  /// Upper bound for each sandbox step: provision commands, interpreter
  /// checks, venv creation, `pip install` and the compilation itself.
  #[serde(default, with = "duration::option")]
  pub timeout: Option<Duration>,
  /// Time between terminate and kill when a step is stopped.
  #[serde(default = "default_grace", with = "duration")]
  pub grace: Duration,
  /// Appended after the generated flags, before the entry point.
  #[serde(default)]
  pub extra_args: Vec<String>,
}

impl Default for BundlerSettings {
  fn default() -> Self {
    Self {
      module: default_bundler_module(),
      timeout: None,
      grace: default_grace(),
      extra_args: Vec::new(),
    }
  }
}

fn default_bundler_module() -> String {
  "nuitka".to_string()
}

fn default_grace() -> Duration {
  Duration::from_secs(10)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorSettings {
  /// Sandboxes running at once; defaults to the number of targets.
  #[serde(default)]
  pub jobs: Option<usize>,
  /// Cancel siblings and export nothing when any target fails.
  #[serde(default)]
  pub all_or_nothing: bool,
  /// Parent directory for sandbox workspaces; defaults to the system temp dir.
  #[serde(default)]
  pub work_dir: Option<PathBuf>,
}

/// One `[[targets]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
  /// `<family>/<arch>`, e.g. `glibc-linux/x64`.
  pub target: TargetId,
  /// Export filename template; defaults per family.
  #[serde(default)]
  pub filename: Option<String>,
  #[serde(default = "default_required")]
  pub required: bool,
  pub sandbox: SandboxSpec,
}

fn default_required() -> bool {
  true
}

impl TargetConfig {
  pub fn environment(&self) -> TargetEnvironment {
    let env = TargetEnvironment::new(self.target.family, self.target.arch);
    let env = match &self.filename {
      Some(template) => env.with_template(template),
      None => env,
    };
    TargetEnvironment {
      required: self.required,
      ..env
    }
  }
}

/// How a target is isolated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SandboxSpec {
  Container(ContainerSpec),
  Host(HostSpec),
}

impl SandboxSpec {
  pub fn interpreter(&self) -> &str {
    match self {
      SandboxSpec::Container(spec) => &spec.interpreter,
      SandboxSpec::Host(spec) => &spec.interpreter,
    }
  }

  pub fn python_version(&self) -> Option<&str> {
    match self {
      SandboxSpec::Container(spec) => spec.python_version.as_deref(),
      SandboxSpec::Host(spec) => spec.python_version.as_deref(),
    }
  }

  pub fn provision(&self) -> &[Vec<String>] {
    match self {
      SandboxSpec::Container(spec) => &spec.provision,
      SandboxSpec::Host(spec) => &spec.provision,
    }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      SandboxSpec::Container(_) => "container",
      SandboxSpec::Host(_) => "host",
    }
  }
}

/// Build inside a throwaway container from a pinned image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
  /// Pinned base image, e.g. `quay.io/pypa/manylinux2014_x86_64`.
  pub image: String,
  /// Container CLI (`docker`, `podman`).
  #[serde(default = "default_container_runtime")]
  pub runtime: String,
  /// `--platform` passed to create, e.g. `linux/amd64`.
  #[serde(default)]
  pub platform: Option<String>,
  /// Interpreter path inside the image.
  pub interpreter: String,
  /// Required prefix of the interpreter's version, e.g. `3.12`.
  #[serde(default)]
  pub python_version: Option<String>,
  /// Commands run once after the container starts, as argv lists.
  #[serde(default)]
  pub provision: Vec<Vec<String>>,
  /// Command keeping the container alive between steps.
  #[serde(default = "default_keepalive")]
  pub keepalive: Vec<String>,
}

fn default_container_runtime() -> String {
  "docker".to_string()
}

fn default_keepalive() -> Vec<String> {
  vec!["tail".to_string(), "-f".to_string(), "/dev/null".to_string()]
}

/// Build directly on the host in a private workspace and venv.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSpec {
  pub interpreter: String,
  #[serde(default)]
  pub python_version: Option<String>,
  #[serde(default)]
  pub provision: Vec<Vec<String>>,
  /// Host variables passed through the otherwise cleared environment.
  #[serde(default = "default_pass_env")]
  pub pass_env: Vec<String>,
}

#[cfg(unix)]
fn default_pass_env() -> Vec<String> {
  vec!["PATH".to_string()]
}

#[cfg(windows)]
fn default_pass_env() -> Vec<String> {
  [
    "PATH",
    "PATHEXT",
    "SYSTEMROOT",
    "WINDIR",
    "COMSPEC",
    "LOCALAPPDATA",
    "PROGRAMFILES",
    "PROGRAMFILES(X86)",
    "PROGRAMDATA",
  ]
  .into_iter()
  .map(String::from)
  .collect()
}

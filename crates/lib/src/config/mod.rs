//! Build configuration.
//!
//! Loaded from a TOML file, resolved against the file's directory and
//! validated once before anything runs. Targets are always explicit: there is
//! no default target list.

pub mod duration;
pub mod types;

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::target::{RuntimeFamily, TargetId, TemplateError};

pub use types::{
  BuildConfig, BundlerSettings, ContainerSpec, DataDirSpec, DependencySpec, HostSpec, OrchestratorSettings,
  PayloadSpec, SandboxSpec, TargetConfig,
};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {}: {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse config {}: {source}", .path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("no targets declared; add at least one [[targets]] entry")]
  NoTargets,

  #[error("target {0} is declared more than once")]
  DuplicateTarget(TargetId),

  #[error("target {0} is not declared in the config")]
  UnknownTarget(TargetId),

  #[error("payload entry not found: {}", .0.display())]
  MissingEntry(PathBuf),

  #[error("cannot derive an artifact name from payload entry {}", .0.display())]
  NoArtifactName(PathBuf),

  #[error("target {target}: {source}")]
  Template {
    target: TargetId,
    #[source]
    source: TemplateError,
  },

  #[error("target {target}: {reason}")]
  Sandbox { target: TargetId, reason: String },

  #[error("invalid config: {0}")]
  Invalid(String),
}

impl BuildConfig {
  /// Read, resolve and validate a config file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let mut config = Self::parse(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;

    let base = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    config.resolve_paths(base);
    config.validate()?;

    debug!(path = %path.display(), targets = config.targets.len(), "loaded config");
    Ok(config)
  }

  /// Parse without touching the filesystem.
  pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(content)
  }

  /// Anchor relative paths at `base`.
  pub fn resolve_paths(&mut self, base: &Path) {
    let anchor = |p: &mut PathBuf| {
      if p.is_relative() {
        *p = base.join(&*p);
      }
    };

    anchor(&mut self.payload.entry);
    for data in &mut self.dependencies.data {
      if let Some(path) = data.path.as_mut() {
        anchor(path);
      }
    }
    if let Some(work_dir) = self.orchestrator.work_dir.as_mut() {
      anchor(work_dir);
    }
  }

  /// Check everything that can be checked before a sandbox starts.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if !self.payload.entry.is_file() {
      return Err(ConfigError::MissingEntry(self.payload.entry.clone()));
    }
    let artifact = self.artifact_name()?;

    if self.targets.is_empty() {
      return Err(ConfigError::NoTargets);
    }

    let mut seen = HashSet::new();
    for target in &self.targets {
      if !seen.insert(target.target) {
        return Err(ConfigError::DuplicateTarget(target.target));
      }
      target
        .environment()
        .export_filename(&artifact)
        .map_err(|source| ConfigError::Template {
          target: target.target,
          source,
        })?;
      validate_sandbox(target)?;
    }

    if self.orchestrator.jobs == Some(0) {
      return Err(ConfigError::Invalid("orchestrator.jobs must be at least 1".to_string()));
    }
    if self.bundler.module.trim().is_empty() {
      return Err(ConfigError::Invalid("bundler.module must not be empty".to_string()));
    }

    let deps = &self.dependencies;
    if deps.requirements.iter().chain(&deps.include_packages).any(|s| s.trim().is_empty()) {
      return Err(ConfigError::Invalid(
        "dependency names must not be empty".to_string(),
      ));
    }
    let mut mounts = HashSet::new();
    for data in &deps.data {
      if data.mount.trim().is_empty() || data.package.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
          "data entry for '{}' needs a package and a mount name",
          data.package
        )));
      }
      if !is_plain_mount(&data.mount) {
        return Err(ConfigError::Invalid(format!(
          "data mount '{}' must be a plain directory name",
          data.mount
        )));
      }
      if !mounts.insert(data.mount.as_str()) {
        return Err(ConfigError::Invalid(format!(
          "data mount '{}' is used more than once",
          data.mount
        )));
      }
    }

    Ok(())
  }

  pub fn artifact_name(&self) -> Result<String, ConfigError> {
    self
      .payload
      .artifact_name()
      .filter(|name| !name.is_empty())
      .ok_or_else(|| ConfigError::NoArtifactName(self.payload.entry.clone()))
  }

  /// Targets to build, in declaration order.
  ///
  /// An empty filter selects every declared target.
  pub fn select(&self, filter: &[TargetId]) -> Result<Vec<TargetConfig>, ConfigError> {
    if let Some(unknown) = filter.iter().find(|id| !self.targets.iter().any(|t| t.target == **id)) {
      return Err(ConfigError::UnknownTarget(*unknown));
    }

    Ok(
      self
        .targets
        .iter()
        .filter(|t| filter.is_empty() || filter.contains(&t.target))
        .cloned()
        .collect(),
    )
  }
}

fn validate_sandbox(target: &TargetConfig) -> Result<(), ConfigError> {
  let fail = |reason: String| ConfigError::Sandbox {
    target: target.target,
    reason,
  };

  if target.sandbox.interpreter().trim().is_empty() {
    return Err(fail("sandbox.interpreter must not be empty".to_string()));
  }
  if target.sandbox.provision().iter().any(|argv| argv.is_empty()) {
    return Err(fail("provision commands must not be empty".to_string()));
  }

  match &target.sandbox {
    SandboxSpec::Container(spec) => {
      if target.target.family == RuntimeFamily::Windows {
        return Err(fail(
          "windows targets cannot use a container sandbox; use kind = \"host\" on a Windows machine".to_string(),
        ));
      }
      if spec.image.trim().is_empty() {
        return Err(fail("sandbox.image must not be empty".to_string()));
      }
      if spec.keepalive.is_empty() {
        return Err(fail("sandbox.keepalive must not be empty".to_string()));
      }
    }
    SandboxSpec::Host(_) => {}
  }

  Ok(())
}

/// A mount is joined under the build workspace and passed to the bundler as
/// `src=mount`, so it must be a single relative path component.
fn is_plain_mount(mount: &str) -> bool {
  mount != "." && mount != ".." && !mount.contains(['/', '\\', '=']) && !Path::new(mount).is_absolute()
}

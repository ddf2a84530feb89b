use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::config::duration;
use crate::locate::ResolvedDataDir;
use crate::sandbox::SandboxState;
use crate::target::TargetId;
use crate::util::hash::ContentHash;

/// One exported executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportEntry {
  pub target: TargetId,
  pub path: PathBuf,
  pub size: u64,
  pub sha256: ContentHash,
  /// Data directories embedded in the executable.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub data: Vec<DataFingerprint>,
}

/// Content hash of one embedded data directory, as it was at bundle time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataFingerprint {
  pub package: String,
  pub mount: String,
  pub sha256: ContentHash,
}

impl From<&ResolvedDataDir> for DataFingerprint {
  fn from(dir: &ResolvedDataDir) -> Self {
    Self {
      package: dir.package.clone(),
      mount: dir.mount.clone(),
      sha256: dir.fingerprint.clone(),
    }
  }
}

/// Exported executables in target declaration order. Filenames are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportManifest {
  pub export_dir: PathBuf,
  pub artifacts: Vec<ExportEntry>,
}

impl ExportManifest {
  pub fn get(&self, target: &TargetId) -> Option<&ExportEntry> {
    self.artifacts.iter().find(|e| &e.target == target)
  }

  pub fn len(&self) -> usize {
    self.artifacts.len()
  }

  pub fn is_empty(&self) -> bool {
    self.artifacts.is_empty()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetFailure {
  pub kind: String,
  /// Full cause chain.
  pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
  /// Built and exported.
  Exported,
  /// Built, but not exported because another target failed.
  Discarded,
  Failed,
}

/// How one target ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetOutcome {
  pub target: TargetId,
  pub required: bool,
  pub status: TargetStatus,
  /// Every sandbox state visited, in order.
  pub states: Vec<SandboxState>,
  #[serde(with = "duration")]
  pub elapsed: Duration,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<TargetFailure>,
}

impl TargetOutcome {
  pub fn succeeded(&self) -> bool {
    self.error.is_none()
  }
}

/// Result of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
  pub manifest: ExportManifest,
  /// Declaration order.
  pub outcomes: Vec<TargetOutcome>,
  /// All-or-nothing mode tripped: nothing was exported.
  pub aborted: bool,
  #[serde(with = "duration")]
  pub elapsed: Duration,
}

impl BuildReport {
  /// Every required target built, and nothing was held back.
  pub fn success(&self) -> bool {
    !self.aborted && self.outcomes.iter().filter(|o| o.required).all(TargetOutcome::succeeded)
  }

  pub fn failures(&self) -> impl Iterator<Item = &TargetOutcome> {
    self.outcomes.iter().filter(|o| !o.succeeded())
  }
}

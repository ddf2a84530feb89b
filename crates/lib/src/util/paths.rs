//! Host view / sandbox view path translation.

use std::path::{Path, PathBuf};

/// Maps paths between the orchestrator's view and a sandbox's view.
///
/// A container sees the workspace through bind mounts (`/build`, `/output`);
/// a host sandbox sees the same paths the orchestrator does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathMap {
  /// `(host, sandbox)` pairs. Empty means both views are identical.
  mounts: Vec<(PathBuf, PathBuf)>,
}

impl PathMap {
  pub fn identity() -> Self {
    Self::default()
  }

  pub fn mount(mut self, host: impl Into<PathBuf>, sandbox: impl Into<PathBuf>) -> Self {
    self.mounts.push((host.into(), sandbox.into()));
    self
  }

  pub fn is_identity(&self) -> bool {
    self.mounts.is_empty()
  }

  /// Host path for a sandbox path, if the sandbox path is visible from the host.
  pub fn to_host(&self, sandbox_path: &Path) -> Option<PathBuf> {
    if self.is_identity() {
      return Some(sandbox_path.to_path_buf());
    }
    self.mounts.iter().find_map(|(host, sandbox)| {
      sandbox_path
        .strip_prefix(sandbox)
        .ok()
        .map(|rest| join_relative(host, rest))
    })
  }

  /// Sandbox path for a host path, if the host path is mounted.
  pub fn to_sandbox(&self, host_path: &Path) -> Option<PathBuf> {
    if self.is_identity() {
      return Some(host_path.to_path_buf());
    }
    self.mounts.iter().find_map(|(host, sandbox)| {
      host_path
        .strip_prefix(host)
        .ok()
        .map(|rest| join_relative(sandbox, rest))
    })
  }
}

fn join_relative(base: &Path, rest: &Path) -> PathBuf {
  if rest.as_os_str().is_empty() {
    base.to_path_buf()
  } else {
    base.join(rest)
  }
}

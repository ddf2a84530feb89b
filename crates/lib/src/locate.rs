//! Data directory resolution.
//!
//! Finds the data directory shipped inside an installed package, at build
//! time, from explicit search roots. Nothing is read from the ambient
//! interpreter environment: the sandbox hands over its own `site-packages`
//! directory, or configuration injects the path directly.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::DataDirSpec;
use crate::util::hash::{ContentHash, hash_directory};

/// Entries that never count as data and never affect the fingerprint.
const FINGERPRINT_EXCLUSIONS: &[&str] = &["__pycache__"];

#[derive(Debug, Error)]
pub enum ResolutionError {
  #[error("invalid package name '{package}'")]
  InvalidPackageName { package: String },

  #[error("package '{package}' is not installed (searched: {})", display_roots(.searched))]
  PackageNotInstalled { package: String, searched: Vec<PathBuf> },

  #[error("package '{package}' has no '{subdir}' directory (expected {})", .path.display())]
  MissingDataDir {
    package: String,
    subdir: String,
    path: PathBuf,
  },

  #[error("data path for '{package}' is not a directory: {}", .path.display())]
  NotADirectory { package: String, path: PathBuf },

  #[error("data directory for '{package}' is empty: {}", .path.display())]
  EmptyDataDir { package: String, path: PathBuf },

  #[error("failed to inspect data directory for '{package}' at {}: {message}", .path.display())]
  Inspect {
    package: String,
    path: PathBuf,
    message: String,
  },
}

fn display_roots(roots: &[PathBuf]) -> String {
  if roots.is_empty() {
    return "no search roots".to_string();
  }
  roots.iter().map(|r| r.display().to_string()).collect::<Vec<_>>().join(", ")
}

/// A data directory ready to be embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDataDir {
  pub package: String,
  /// Fixed name the payload uses to find the data at runtime.
  pub mount: String,
  /// Absolute, canonical host path.
  pub path: PathBuf,
  pub fingerprint: ContentHash,
}

/// Resolves package data directories under a fixed list of search roots.
#[derive(Debug, Clone, Default)]
pub struct DataLocator {
  search_roots: Vec<PathBuf>,
}

impl DataLocator {
  pub fn new<I, P>(search_roots: I) -> Self
  where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
  {
    Self {
      search_roots: search_roots.into_iter().map(Into::into).collect(),
    }
  }

  pub fn search_roots(&self) -> &[PathBuf] {
    &self.search_roots
  }

  /// Installation root of `package`: the first `<root>/<package>` directory.
  pub fn package_root(&self, package: &str) -> Result<PathBuf, ResolutionError> {
    if package.is_empty() || package.contains(['/', '\\']) || package == "." || package == ".." {
      return Err(ResolutionError::InvalidPackageName {
        package: package.to_string(),
      });
    }

    self
      .search_roots
      .iter()
      .map(|root| root.join(package))
      .find(|candidate| candidate.is_dir())
      .ok_or_else(|| ResolutionError::PackageNotInstalled {
        package: package.to_string(),
        searched: self.search_roots.clone(),
      })
  }

  /// Resolve the data directory described by `spec`.
  ///
  /// An explicit `spec.path` bypasses the search but gets the same checks.
  pub fn locate(&self, spec: &DataDirSpec) -> Result<ResolvedDataDir, ResolutionError> {
    let candidate = match &spec.path {
      Some(path) => {
        debug!(package = %spec.package, path = %path.display(), "using injected data path");
        path.clone()
      }
      None => self.package_root(&spec.package)?.join(&spec.subdir),
    };

    let path = validate_data_dir(&spec.package, &spec.subdir, &candidate)?;
    let fingerprint = hash_directory(&path, FINGERPRINT_EXCLUSIONS).map_err(|e| ResolutionError::Inspect {
      package: spec.package.clone(),
      path: path.clone(),
      message: e.to_string(),
    })?;

    info!(
      package = %spec.package,
      path = %path.display(),
      mount = %spec.mount,
      fingerprint = %fingerprint,
      "resolved data directory"
    );

    Ok(ResolvedDataDir {
      package: spec.package.clone(),
      mount: spec.mount.clone(),
      path,
      fingerprint,
    })
  }
}

/// Existing, non-empty directory, returned in canonical form.
fn validate_data_dir(package: &str, subdir: &str, path: &Path) -> Result<PathBuf, ResolutionError> {
  let metadata = match std::fs::metadata(path) {
    Ok(metadata) => metadata,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      return Err(ResolutionError::MissingDataDir {
        package: package.to_string(),
        subdir: subdir.to_string(),
        path: path.to_path_buf(),
      });
    }
    Err(e) => {
      return Err(ResolutionError::Inspect {
        package: package.to_string(),
        path: path.to_path_buf(),
        message: e.to_string(),
      });
    }
  };

  if !metadata.is_dir() {
    return Err(ResolutionError::NotADirectory {
      package: package.to_string(),
      path: path.to_path_buf(),
    });
  }

  let has_files = WalkDir::new(path)
    .into_iter()
    .filter_entry(|e| {
      e.file_name()
        .to_str()
        .map(|name| !FINGERPRINT_EXCLUSIONS.contains(&name))
        .unwrap_or(true)
    })
    .filter_map(Result::ok)
    .any(|e| e.file_type().is_file());
  if !has_files {
    return Err(ResolutionError::EmptyDataDir {
      package: package.to_string(),
      path: path.to_path_buf(),
    });
  }

  dunce::canonicalize(path).map_err(|e| ResolutionError::Inspect {
    package: package.to_string(),
    path: path.to_path_buf(),
    message: e.to_string(),
  })
}

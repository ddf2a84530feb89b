use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Private scratch directory of one sandbox.
///
/// Layout: `build/` holds the payload copy, venv, HOME and TMPDIR; `output/`
/// receives the executable. Deleted when dropped.
#[derive(Debug)]
pub struct Workspace {
  dir: TempDir,
  root: PathBuf,
}

impl Workspace {
  pub fn create(parent: Option<&Path>, slug: &str) -> io::Result<Self> {
    let prefix = format!("{}-{slug}-", crate::consts::APP_NAME);
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix);
    let dir = match parent {
      Some(parent) => {
        std::fs::create_dir_all(parent)?;
        builder.tempdir_in(parent)?
      }
      None => builder.tempdir()?,
    };

    // Canonical so prefix matching against canonicalized data paths works.
    let root = dunce::canonicalize(dir.path())?;
    let workspace = Self { dir, root };
    for sub in [workspace.build(), workspace.output(), workspace.home(), workspace.tmp()] {
      std::fs::create_dir_all(sub)?;
    }
    Ok(workspace)
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn build(&self) -> PathBuf {
    self.root.join("build")
  }

  pub fn output(&self) -> PathBuf {
    self.root.join("output")
  }

  pub fn home(&self) -> PathBuf {
    self.build().join(".home")
  }

  pub fn tmp(&self) -> PathBuf {
    self.build().join(".tmp")
  }

  /// Unique suffix of this workspace, for naming external resources.
  pub fn token(&self) -> String {
    self
      .dir
      .path()
      .file_name()
      .map(|n| n.to_string_lossy().rsplit('-').next().unwrap_or_default().to_lowercase())
      .unwrap_or_default()
  }
}

//! Moving finished artifacts into the shared export directory.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::sandbox::BuildArtifact;
use crate::target::TargetId;
use crate::util::hash::hash_file;

use super::types::{DataFingerprint, ExportEntry};

#[derive(Debug, Error)]
pub enum ExportError {
  #[error("targets {first} and {second} would both export '{name}'")]
  DuplicateName {
    name: String,
    first: TargetId,
    second: TargetId,
  },

  #[error("cannot create export directory {}: {source}", .path.display())]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to export {target} to {}: {source}", .path.display())]
  Copy {
    target: TargetId,
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to digest {}: {message}", .path.display())]
  Digest { path: PathBuf, message: String },
}

/// Create the export directory. Safe against concurrent creators.
pub async fn prepare_export_dir(dir: &Path) -> Result<(), ExportError> {
  tokio::fs::create_dir_all(dir)
    .await
    .map_err(|source| ExportError::CreateDir {
      path: dir.to_path_buf(),
      source,
    })
}

/// Copy `artifact` to `<export_dir>/<filename>` through a hidden temporary
/// name, so readers never observe a half-written file.
///
/// Consumes the artifact; its workspace is deleted afterwards.
pub async fn export_artifact(
  artifact: BuildArtifact,
  export_dir: &Path,
  filename: &str,
) -> Result<ExportEntry, ExportError> {
  let target = artifact.target;
  let final_path = export_dir.join(filename);
  let temp_path = export_dir.join(format!(".{filename}.{}.tmp", std::process::id()));
  let copy_err = |path: &Path, source: std::io::Error| ExportError::Copy {
    target,
    path: path.to_path_buf(),
    source,
  };

  debug!(target = %target, from = %artifact.path.display(), to = %final_path.display(), "exporting");

  let copied = tokio::fs::copy(&artifact.path, &temp_path).await;
  let size = match copied {
    Ok(size) => size,
    Err(e) => {
      let _ = tokio::fs::remove_file(&temp_path).await;
      return Err(copy_err(&temp_path, e));
    }
  };
  if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
    let _ = tokio::fs::remove_file(&temp_path).await;
    return Err(copy_err(&final_path, e));
  }

  let digest_path = final_path.clone();
  let sha256 = tokio::task::spawn_blocking(move || hash_file(&digest_path))
    .await
    .map_err(|e| format!("task join error: {e}"))
    .and_then(|hashed| hashed.map_err(|e| e.to_string()))
    .map_err(|message| ExportError::Digest {
      path: final_path.clone(),
      message,
    })?;

  info!(target = %target, path = %final_path.display(), size, sha256 = %sha256, "exported artifact");
  let data = artifact.data.iter().map(DataFingerprint::from).collect();
  drop(artifact);

  Ok(ExportEntry {
    target,
    path: final_path,
    size,
    sha256,
    data,
  })
}

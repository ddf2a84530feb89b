//! Test utilities for morphpack-lib.
//!
//! Cross-platform shell helpers and a stand-in Python toolchain for tests that
//! drive a whole sandbox without a real interpreter.

use std::path::{Path, PathBuf};

/// Returns the shell command and args to execute a shell script.
#[cfg(unix)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), script.to_string()])
}

#[cfg(windows)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("cmd.exe", vec!["/C".to_string(), script.to_string()])
}

/// Script imitating `python` with `-m venv`, `-m pip install`, the sysconfig
/// and version queries, and `-m nuitka`.
pub const FAKE_PYTHON: &str = include_str!("../../tests/fixtures/fake_python.sh");

/// Write the stand-in interpreter into `dir` and return its path.
#[cfg(unix)]
pub fn install_fake_python(dir: &Path) -> PathBuf {
  use std::os::unix::fs::PermissionsExt;

  std::fs::create_dir_all(dir).unwrap();
  let path = dir.join("python3");
  std::fs::write(&path, FAKE_PYTHON).unwrap();
  std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
  path
}

/// Lay out a fake installed package with a populated data directory.
pub fn fake_data_package(site_packages: &Path, module: &str) -> PathBuf {
  let data = site_packages.join(module).join("data");
  std::fs::create_dir_all(&data).unwrap();
  std::fs::write(data.join("meta.json"), "{}").unwrap();
  data
}

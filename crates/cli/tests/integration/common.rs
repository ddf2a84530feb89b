//! Shared test helpers for CLI integration tests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

const FAKE_PYTHON: &str = include_str!("../../../lib/tests/fixtures/fake_python.sh");

/// Label of the host architecture in target ids and filenames.
pub fn host_arch() -> &'static str {
  match std::env::consts::ARCH {
    "x86_64" => "x64",
    "aarch64" => "arm64",
    other => panic!("unsupported test host architecture: {other}"),
  }
}

/// Isolated test project.
///
/// Each test gets a temporary directory holding the payload, a stand-in
/// interpreter and a `morphpack.toml` with host sandboxes.
pub struct TestEnv {
  pub temp: TempDir,
  pub python: PathBuf,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("morph_gen.py"), "import pymorphy3\n").unwrap();

    let bin = temp.path().join("toolchain").join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let python = bin.join("python3");
    std::fs::write(&python, FAKE_PYTHON).unwrap();
    std::fs::set_permissions(&python, std::fs::Permissions::from_mode(0o755)).unwrap();

    Self { temp, python }
  }

  pub fn path(&self) -> &Path {
    self.temp.path()
  }

  /// Write `morphpack.toml` with one host target per `(family, required)`.
  pub fn write_config(&self, requirements: &[&str], targets: &[(&str, bool)]) {
    let requirements = requirements
      .iter()
      .map(|r| format!("\"{r}\""))
      .collect::<Vec<_>>()
      .join(", ");

    let mut toml = format!(
      r#"
[payload]
entry = "morph_gen.py"

[dependencies]
requirements = [{requirements}]
include_packages = ["pymorphy3", "pymorphy3_dicts_ru"]

[[dependencies.data]]
package = "pymorphy3_dicts_ru"

[orchestrator]
work_dir = "work"
"#
    );

    for (family, required) in targets {
      toml.push_str(&format!(
        r#"
[[targets]]
target = "{family}/{arch}"
required = {required}
[targets.sandbox]
kind = "host"
interpreter = "{python}"
python_version = "3.12"
"#,
        arch = host_arch(),
        python = self.python.display(),
      ));
    }

    std::fs::write(self.path().join("morphpack.toml"), toml).unwrap();
  }

  /// Sorted file names in `dist/`; empty if it does not exist.
  pub fn exported(&self) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(self.path().join("dist")) else {
      return Vec::new();
    };
    let mut names: Vec<String> = entries
      .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
      .collect();
    names.sort();
    names
  }

  /// A morphpack command running inside the project directory.
  pub fn morphpack_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("morphpack");
    cmd.current_dir(self.path());
    cmd.env_remove("RUST_LOG");
    cmd
  }
}

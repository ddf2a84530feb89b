//! Shared helpers for library integration tests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use morphpack_lib::config::BuildConfig;
use morphpack_lib::orchestrate::RunOptions;
use morphpack_lib::platform::arch::Arch;
use tempfile::TempDir;

const FAKE_PYTHON: &str = include_str!("../fixtures/fake_python.sh");

/// Requirements that give every sandbox the bundler and the dictionary package.
pub const FULL_REQUIREMENTS: &[&str] = &["nuitka", "pymorphy3", "pymorphy3-dicts-ru", "pyyaml"];

/// Label of the host architecture in target ids and filenames.
pub fn host_arch() -> &'static str {
  Arch::current().expect("unsupported test host").as_str()
}

/// One target declaration backed by a host sandbox.
pub struct TargetDecl {
  pub family: &'static str,
  pub python_version: &'static str,
  pub required: bool,
}

impl TargetDecl {
  pub fn new(family: &'static str) -> Self {
    Self {
      family,
      python_version: "3.12",
      required: true,
    }
  }

  pub fn python_version(mut self, version: &'static str) -> Self {
    self.python_version = version;
    self
  }

  pub fn optional(mut self) -> Self {
    self.required = false;
    self
  }

  pub fn id(&self) -> String {
    format!("{}/{}", self.family, host_arch())
  }
}

/// A payload project in a temp directory with its own stand-in interpreter.
pub struct Project {
  pub temp: TempDir,
  pub python: PathBuf,
}

impl Project {
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

  pub fn export_dir(&self) -> PathBuf {
    self.path().join("dist")
  }

  pub fn work_dir(&self) -> PathBuf {
    self.path().join("work")
  }

  /// Write `morphpack.toml` and load it.
  pub fn config(&self, requirements: &[&str], targets: &[TargetDecl]) -> BuildConfig {
    let quoted = |items: &[&str]| {
      items
        .iter()
        .map(|s| format!("\"{s}\""))
        .collect::<Vec<_>>()
        .join(", ")
    };

    let mut toml = format!(
      r#"
[payload]
entry = "morph_gen.py"

[dependencies]
requirements = [{requirements}]
include_packages = ["pymorphy3", "pymorphy3_dicts_ru", "yaml"]

[[dependencies.data]]
package = "pymorphy3_dicts_ru"

[orchestrator]
work_dir = "work"
"#,
      requirements = quoted(requirements),
    );

    for target in targets {
      toml.push_str(&format!(
        r#"
[[targets]]
target = "{id}"
required = {required}
[targets.sandbox]
kind = "host"
interpreter = "{python}"
python_version = "{version}"
"#,
        id = target.id(),
        required = target.required,
        python = self.python.display(),
        version = target.python_version,
      ));
    }

    let path = self.path().join("morphpack.toml");
    std::fs::write(&path, toml).unwrap();
    BuildConfig::load(&path).unwrap()
  }

  pub fn options(&self) -> RunOptions {
    RunOptions {
      export_dir: self.export_dir(),
      ..Default::default()
    }
  }

  /// Sorted file names in the export directory; empty if it does not exist.
  pub fn exported(&self) -> Vec<String> {
    list(&self.export_dir())
  }

  /// Leftover sandbox workspaces.
  pub fn workspaces(&self) -> Vec<String> {
    list(&self.work_dir())
  }
}

fn list(dir: &Path) -> Vec<String> {
  let Ok(entries) = std::fs::read_dir(dir) else {
    return Vec::new();
  };
  let mut names: Vec<String> = entries
    .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
    .collect();
  names.sort();
  names
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::platform::arch::Arch;
use crate::platform::os::Os;

use super::template::{TemplateError, render_filename};

/// C runtime / OS family a target is built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RuntimeFamily {
  GlibcLinux,
  MuslLinux,
  Windows,
}

impl RuntimeFamily {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::GlibcLinux => "glibc-linux",
      Self::MuslLinux => "musl-linux",
      Self::Windows => "windows",
    }
  }

  pub fn os(&self) -> Os {
    match self {
      Self::GlibcLinux | Self::MuslLinux => Os::Linux,
      Self::Windows => Os::Windows,
    }
  }

  /// The C runtime flavor, for families where more than one exists.
  pub fn libc(&self) -> Option<&'static str> {
    match self {
      Self::GlibcLinux => Some("glibc"),
      Self::MuslLinux => Some("musl"),
      Self::Windows => None,
    }
  }

  /// Export filename used when a target does not declare its own.
  pub fn default_filename_template(&self) -> &'static str {
    match self {
      Self::GlibcLinux => "{artifact}_linux_{arch}_glibc",
      Self::MuslLinux => "{artifact}_musl_{arch}",
      Self::Windows => "{artifact}_windows_{arch}.exe",
    }
  }
}

impl fmt::Display for RuntimeFamily {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for RuntimeFamily {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "glibc-linux" => Ok(Self::GlibcLinux),
      "musl-linux" => Ok(Self::MuslLinux),
      "windows" => Ok(Self::Windows),
      other => Err(format!(
        "unknown target family '{other}' (expected glibc-linux, musl-linux or windows)"
      )),
    }
  }
}

impl TryFrom<String> for RuntimeFamily {
  type Error = String;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<RuntimeFamily> for String {
  fn from(family: RuntimeFamily) -> Self {
    family.as_str().to_string()
  }
}

/// Identity of a target, written `<family>/<arch>` (e.g. `musl-linux/x64`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetId {
  pub family: RuntimeFamily,
  pub arch: Arch,
}

impl TargetId {
  pub fn new(family: RuntimeFamily, arch: Arch) -> Self {
    Self { family, arch }
  }

  /// Filesystem and container-name safe form (`musl-linux-x64`).
  pub fn slug(&self) -> String {
    format!("{}-{}", self.family, self.arch)
  }
}

impl fmt::Display for TargetId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.family, self.arch)
  }
}

impl FromStr for TargetId {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (family, arch) = s
      .split_once('/')
      .ok_or_else(|| format!("invalid target '{s}' (expected <family>/<arch>, e.g. glibc-linux/x64)"))?;
    Ok(Self {
      family: family.parse()?,
      arch: arch.parse()?,
    })
  }
}

impl TryFrom<String> for TargetId {
  type Error = String;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<TargetId> for String {
  fn from(id: TargetId) -> Self {
    id.to_string()
  }
}

/// One build target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEnvironment {
  pub family: RuntimeFamily,
  pub arch: Arch,
  /// Export filename template, see [`render_filename`].
  pub filename_template: String,
  /// A failed required target makes the whole run fail.
  pub required: bool,
}

impl TargetEnvironment {
  pub fn new(family: RuntimeFamily, arch: Arch) -> Self {
    Self {
      family,
      arch,
      filename_template: family.default_filename_template().to_string(),
      required: true,
    }
  }

  pub fn with_template(mut self, template: &str) -> Self {
    self.filename_template = template.to_string();
    self
  }

  pub fn id(&self) -> TargetId {
    TargetId::new(self.family, self.arch)
  }

  pub fn os(&self) -> Os {
    self.family.os()
  }

  /// Name the toolchain writes inside the sandbox.
  pub fn sandbox_filename(&self, artifact: &str) -> String {
    format!("{}{}", artifact, self.os().exe_suffix())
  }

  /// Target-qualified name in the shared export directory.
  pub fn export_filename(&self, artifact: &str) -> Result<String, TemplateError> {
    render_filename(&self.filename_template, artifact, self)
  }
}

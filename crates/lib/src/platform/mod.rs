//! The machine morphpack runs on, and which targets it can build natively.

pub mod arch;
pub mod os;

use arch::Arch;
use os::Os;
use std::fmt;

use crate::target::{RuntimeFamily, TargetEnvironment};

/// The running host: OS, CPU architecture and C runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Host {
  pub arch: Arch,
  pub os: Os,
  /// Linked against musl rather than glibc. Meaningless off Linux.
  pub musl: bool,
}

impl Host {
  /// Detect the running host. `None` on an unsupported OS or architecture.
  pub fn current() -> Option<Self> {
    Some(Self {
      arch: Arch::current()?,
      os: Os::current()?,
      musl: cfg!(target_env = "musl"),
    })
  }

  /// Same OS and architecture as the target, so a host sandbox can build it.
  pub fn can_build(&self, target: &TargetEnvironment) -> bool {
    self.os == target.os() && self.arch == target.arch
  }

  /// Host sandboxes inherit the host C runtime; false when the target
  /// family expects the other one.
  pub fn libc_matches(&self, family: RuntimeFamily) -> bool {
    match family {
      RuntimeFamily::GlibcLinux => !self.musl,
      RuntimeFamily::MuslLinux => self.musl,
      RuntimeFamily::Windows => true,
    }
  }
}

impl fmt::Display for Host {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match (self.os, self.musl) {
      (Os::Linux, true) => write!(f, "{}/{} (musl)", self.os, self.arch),
      _ => write!(f, "{}/{}", self.os, self.arch),
    }
  }
}

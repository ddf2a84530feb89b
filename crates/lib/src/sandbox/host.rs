//! Host sandbox: runs directly on this machine, in a private workspace with a
//! cleared environment.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::HostSpec;
use crate::consts::SOURCE_DATE_EPOCH;
use crate::platform::Host;
use crate::process::{self, Invocation, ProcessError, ProcessOutput, RunLimits};
use crate::target::TargetEnvironment;
use crate::util::paths::PathMap;

use super::ProvisioningError;
use super::workspace::Workspace;

#[derive(Debug)]
pub struct HostBackend {
  build: PathBuf,
  output: PathBuf,
  env: BTreeMap<String, String>,
  paths: PathMap,
}

impl HostBackend {
  /// Only targets matching the host OS and architecture can be built here.
  pub fn new(spec: &HostSpec, target: &TargetEnvironment, workspace: &Workspace) -> Result<Self, ProvisioningError> {
    let Some(host) = Host::current().filter(|h| h.can_build(target)) else {
      return Err(ProvisioningError::HostMismatch {
        target: target.id(),
        host: Host::current().map(|h| h.to_string()).unwrap_or_else(|| "unsupported".to_string()),
      });
    };

    if !host.libc_matches(target.family) {
      warn!(
        target = %target.id(),
        "host C runtime differs from target; the interpreter decides what the executable links against"
      );
    }

    Ok(Self {
      build: workspace.build(),
      output: workspace.output(),
      env: sandbox_env(spec, workspace),
      paths: PathMap::identity(),
    })
  }

  pub fn paths(&self) -> &PathMap {
    &self.paths
  }

  pub fn build_dir(&self) -> PathBuf {
    self.build.clone()
  }

  pub fn output_dir(&self) -> PathBuf {
    self.output.clone()
  }

  pub fn env(&self) -> &BTreeMap<String, String> {
    &self.env
  }

  /// Apply the sandbox environment and working directory to `invocation`.
  pub fn wrap(&self, invocation: Invocation) -> Invocation {
    let mut env = self.env.clone();
    env.extend(invocation.env);
    Invocation {
      cwd: invocation.cwd.or_else(|| Some(self.build.clone())),
      env,
      clear_env: true,
      ..invocation
    }
  }

  pub async fn execute(
    &self,
    invocation: Invocation,
    limits: RunLimits,
    cancel: &CancellationToken,
  ) -> Result<ProcessOutput, ProcessError> {
    process::run(&self.wrap(invocation), limits, cancel).await
  }
}

fn sandbox_env(spec: &HostSpec, workspace: &Workspace) -> BTreeMap<String, String> {
  let mut env = BTreeMap::new();
  for name in &spec.pass_env {
    match std::env::var(name) {
      Ok(value) => {
        env.insert(name.clone(), value);
      }
      Err(_) => debug!(var = %name, "pass-through variable not set"),
    }
  }

  let home = workspace.home().display().to_string();
  let tmp = workspace.tmp().display().to_string();
  env.insert("HOME".to_string(), home.clone());
  env.insert("TMPDIR".to_string(), tmp.clone());
  #[cfg(windows)]
  {
    env.insert("USERPROFILE".to_string(), home);
    env.insert("TEMP".to_string(), tmp.clone());
    env.insert("TMP".to_string(), tmp);
  }
  env.insert("LANG".to_string(), "C".to_string());
  env.insert("SOURCE_DATE_EPOCH".to_string(), SOURCE_DATE_EPOCH.to_string());
  env.insert("PYTHONNOUSERSITE".to_string(), "1".to_string());
  env.insert("PIP_DISABLE_PIP_VERSION_CHECK".to_string(), "1".to_string());
  env
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::arch::Arch;
  use crate::target::RuntimeFamily;
  use serial_test::serial;
  use tempfile::TempDir;

  fn host_spec() -> HostSpec {
    HostSpec {
      interpreter: "python3".to_string(),
      python_version: None,
      provision: Vec::new(),
      pass_env: vec!["PATH".to_string(), "MORPHPACK_TEST_UNSET_VAR".to_string()],
    }
  }

  fn native_target() -> TargetEnvironment {
    let family = if cfg!(windows) {
      RuntimeFamily::Windows
    } else {
      RuntimeFamily::GlibcLinux
    };
    TargetEnvironment::new(family, Arch::current().unwrap())
  }

  #[test]
  #[serial]
  #[cfg(target_os = "linux")]
  fn environment_is_isolated() {
    let parent = TempDir::new().unwrap();
    let ws = Workspace::create(Some(parent.path()), "host").unwrap();

    let vars = [
      ("MORPHPACK_TEST_PASSED", Some("yes")),
      ("MORPHPACK_TEST_UNSET_VAR", None),
      ("MORPHPACK_TEST_LEAKED", Some("secret")),
    ];
    temp_env::with_vars(vars, || {
      let mut spec = host_spec();
      spec.pass_env.push("MORPHPACK_TEST_PASSED".to_string());
      let backend = HostBackend::new(&spec, &native_target(), &ws).unwrap();

      let env = backend.env();
      assert_eq!(env.get("HOME").unwrap(), &ws.home().display().to_string());
      assert_eq!(env.get("TMPDIR").unwrap(), &ws.tmp().display().to_string());
      assert_eq!(env.get("LANG").unwrap(), "C");
      assert_eq!(env.get("SOURCE_DATE_EPOCH").unwrap(), "315532800");
      assert_eq!(env.get("PYTHONNOUSERSITE").unwrap(), "1");
      assert_eq!(env.get("MORPHPACK_TEST_PASSED").unwrap(), "yes");
      assert!(env.contains_key("PATH"));
      assert!(!env.contains_key("MORPHPACK_TEST_UNSET_VAR"));
      assert!(!env.contains_key("MORPHPACK_TEST_LEAKED"));

      let wrapped = backend.wrap(Invocation::new("python3").env("EXTRA", "1"));
      assert!(wrapped.clear_env);
      assert_eq!(wrapped.cwd.as_deref(), Some(ws.build().as_path()));
      assert_eq!(wrapped.env.get("EXTRA").unwrap(), "1");
    });
  }

  #[test]
  fn foreign_os_is_rejected() {
    let parent = TempDir::new().unwrap();
    let ws = Workspace::create(Some(parent.path()), "host").unwrap();
    let family = if cfg!(windows) {
      RuntimeFamily::MuslLinux
    } else {
      RuntimeFamily::Windows
    };
    let target = TargetEnvironment::new(family, Arch::current().unwrap());

    let err = HostBackend::new(&host_spec(), &target, &ws).unwrap_err();
    assert!(matches!(err, ProvisioningError::HostMismatch { .. }));
  }

  #[test]
  fn foreign_arch_is_rejected() {
    let parent = TempDir::new().unwrap();
    let ws = Workspace::create(Some(parent.path()), "host").unwrap();
    let other = match Arch::current().unwrap() {
      Arch::X86_64 => Arch::Aarch64,
      Arch::Aarch64 => Arch::X86_64,
    };
    let target = TargetEnvironment::new(native_target().family, other);

    assert!(matches!(
      HostBackend::new(&host_spec(), &target, &ws),
      Err(ProvisioningError::HostMismatch { .. })
    ));
  }
}

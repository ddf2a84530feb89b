//! Container sandbox, driven through the docker/podman CLI.
//!
//! One long-lived container per target: created from the pinned image with
//! the workspace bind-mounted at `/build` and `/output`, kept alive by an idle
//! command, and every step is a `docker exec`. Teardown force-removes it.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ContainerSpec;
use crate::consts::{CONTAINER_BUILD_DIR, CONTAINER_OUTPUT_DIR, SOURCE_DATE_EPOCH};
use crate::process::{self, Invocation, ProcessError, ProcessOutput, RunLimits};
use crate::target::TargetEnvironment;
use crate::util::paths::PathMap;

use super::ProvisioningError;
use super::workspace::Workspace;

/// Upper bound for container management calls (create, start, rm).
const MANAGEMENT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct ContainerBackend {
  spec: ContainerSpec,
  name: String,
  host_build: PathBuf,
  host_output: PathBuf,
  paths: PathMap,
  created: bool,
}

impl ContainerBackend {
  pub fn new(spec: &ContainerSpec, target: &TargetEnvironment, workspace: &Workspace) -> Self {
    let host_build = workspace.build();
    let host_output = workspace.output();
    Self {
      spec: spec.clone(),
      name: format!("{}-{}-{}", crate::consts::APP_NAME, target.id().slug(), workspace.token()),
      paths: PathMap::identity()
        .mount(&host_build, CONTAINER_BUILD_DIR)
        .mount(&host_output, CONTAINER_OUTPUT_DIR),
      host_build,
      host_output,
      created: false,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn paths(&self) -> &PathMap {
    &self.paths
  }

  pub fn build_dir(&self) -> PathBuf {
    PathBuf::from(CONTAINER_BUILD_DIR)
  }

  pub fn output_dir(&self) -> PathBuf {
    PathBuf::from(CONTAINER_OUTPUT_DIR)
  }

  fn runtime(&self) -> Invocation {
    Invocation::new(&self.spec.runtime)
  }

  pub fn create_invocation(&self) -> Result<Invocation, ProcessError> {
    let mut inv = self.runtime().args(["create", "--name", self.name.as_str()]);
    if let Some(platform) = &self.spec.platform {
      inv = inv.arg("--platform").arg(platform);
    }
    for (host, target) in [
      (&self.host_build, CONTAINER_BUILD_DIR),
      (&self.host_output, CONTAINER_OUTPUT_DIR),
    ] {
      let source = process::path_to_arg(host)?;
      inv = inv
        .arg("--mount")
        .arg(format!("type=bind,source={source},target={target}"));
    }
    let inv = inv
      .args(["--workdir", CONTAINER_BUILD_DIR])
      .args(["--entrypoint", ""])
      .arg(&self.spec.image)
      .args(self.spec.keepalive.iter().cloned());
    inv.validate()?;
    Ok(inv)
  }

  /// Turn an in-container invocation into a `docker exec` call.
  pub fn exec_invocation(&self, invocation: Invocation) -> Invocation {
    let cwd = invocation
      .cwd
      .map(|p| p.display().to_string())
      .unwrap_or_else(|| CONTAINER_BUILD_DIR.to_string());

    let mut inv = self.runtime().args(["exec", "--workdir", cwd.as_str()]);
    for (key, value) in container_env().into_iter().chain(invocation.env) {
      inv = inv.arg("--env").arg(format!("{key}={value}"));
    }
    inv
      .arg(&self.name)
      .arg(invocation.program)
      .args(invocation.args)
  }

  /// Create and start the container.
  pub async fn start(&mut self, limits: RunLimits, cancel: &CancellationToken) -> Result<(), ProvisioningError> {
    let limits = RunLimits {
      timeout: Some(MANAGEMENT_TIMEOUT),
      ..limits
    };

    info!(name = %self.name, image = %self.spec.image, "creating container");
    let create = self.create_invocation().map_err(|source| ProvisioningError::Process {
      step: "container create".to_string(),
      source,
    })?;
    let output = managed(create, "container create", limits, cancel).await?;
    self.created = true;
    debug!(id = %output.stdout.trim(), "container created");

    let start = self.runtime().args(["start", self.name.as_str()]);
    managed(start, "container start", limits, cancel).await?;
    Ok(())
  }

  pub async fn execute(
    &self,
    invocation: Invocation,
    limits: RunLimits,
    cancel: &CancellationToken,
  ) -> Result<ProcessOutput, ProcessError> {
    process::run(&self.exec_invocation(invocation), limits, cancel).await
  }

  /// Hand mounted files back to us, then remove the container. Never fails.
  pub async fn teardown(&mut self) {
    if !self.created {
      return;
    }
    // Teardown must run even when the build was cancelled.
    let cancel = CancellationToken::new();
    let limits = RunLimits::with_timeout(MANAGEMENT_TIMEOUT);

    #[cfg(unix)]
    {
      let owner = format!("{}:{}", nix::unistd::getuid(), nix::unistd::getgid());
      let chown = Invocation::new("chown").args(["-R", owner.as_str(), CONTAINER_BUILD_DIR, CONTAINER_OUTPUT_DIR]);
      match process::run(&self.exec_invocation(chown), limits, &cancel).await {
        Ok(out) if out.success() => {}
        Ok(out) => debug!(name = %self.name, stderr = %out.stderr_tail(5), "chown in container failed"),
        Err(e) => debug!(name = %self.name, error = %e, "chown in container failed"),
      }
    }

    let rm = self.runtime().args(["rm", "--force", self.name.as_str()]);
    match process::run(&rm, limits, &cancel).await {
      Ok(out) if out.success() => debug!(name = %self.name, "container removed"),
      Ok(out) => warn!(name = %self.name, stderr = %out.stderr_tail(5), "failed to remove container"),
      Err(e) => warn!(name = %self.name, error = %e, "failed to remove container"),
    }
    self.created = false;
  }
}

fn container_env() -> Vec<(String, String)> {
  [
    ("HOME", format!("{CONTAINER_BUILD_DIR}/.home")),
    ("TMPDIR", format!("{CONTAINER_BUILD_DIR}/.tmp")),
    ("LANG", "C".to_string()),
    ("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH.to_string()),
    ("PYTHONNOUSERSITE", "1".to_string()),
    ("PIP_DISABLE_PIP_VERSION_CHECK", "1".to_string()),
    ("PIP_ROOT_USER_ACTION", "ignore".to_string()),
  ]
  .into_iter()
  .map(|(k, v)| (k.to_string(), v))
  .collect()
}

/// Run a container management command on the host.
async fn managed(
  invocation: Invocation,
  step: &str,
  limits: RunLimits,
  cancel: &CancellationToken,
) -> Result<ProcessOutput, ProvisioningError> {
  let output = process::run(&invocation, limits, cancel)
    .await
    .map_err(|source| ProvisioningError::Process {
      step: step.to_string(),
      source,
    })?;
  if !output.success() {
    return Err(ProvisioningError::Command {
      step: step.to_string(),
      code: output.code,
      stderr: output.stderr_tail(20),
    });
  }
  Ok(output)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::arch::Arch;
  use crate::target::RuntimeFamily;
  use std::path::Path;
  use tempfile::TempDir;

  fn spec() -> ContainerSpec {
    ContainerSpec {
      image: "quay.io/pypa/manylinux2014_x86_64".to_string(),
      runtime: "podman".to_string(),
      platform: Some("linux/amd64".to_string()),
      interpreter: "/opt/python/cp312-cp312/bin/python3.12".to_string(),
      python_version: Some("3.12".to_string()),
      provision: Vec::new(),
      keepalive: vec!["tail".to_string(), "-f".to_string(), "/dev/null".to_string()],
    }
  }

  fn backend(ws: &Workspace) -> ContainerBackend {
    let target = TargetEnvironment::new(RuntimeFamily::GlibcLinux, Arch::X86_64);
    ContainerBackend::new(&spec(), &target, ws)
  }

  #[test]
  fn create_mounts_workspace_and_idles() {
    let parent = TempDir::new().unwrap();
    let ws = Workspace::create(Some(parent.path()), "c").unwrap();
    let backend = backend(&ws);
    let inv = backend.create_invocation().unwrap();

    assert_eq!(inv.program, "podman");
    assert_eq!(&inv.args[..3], ["create", "--name", backend.name()]);
    assert!(backend.name().starts_with("morphpack-glibc-linux-x64-"));
    assert!(inv.args.windows(2).any(|w| w == ["--platform", "linux/amd64"]));
    let build_mount = format!("type=bind,source={},target=/build", ws.build().display());
    let output_mount = format!("type=bind,source={},target=/output", ws.output().display());
    assert!(inv.args.contains(&build_mount));
    assert!(inv.args.contains(&output_mount));
    assert_eq!(&inv.args[inv.args.len() - 4..], [
      "quay.io/pypa/manylinux2014_x86_64",
      "tail",
      "-f",
      "/dev/null"
    ]);
  }

  #[test]
  fn exec_wraps_program_with_env_and_workdir() {
    let parent = TempDir::new().unwrap();
    let ws = Workspace::create(Some(parent.path()), "c").unwrap();
    let backend = backend(&ws);

    let inner = Invocation::new("/build/venv/bin/python")
      .args(["-m", "pip", "install", "pyyaml"])
      .cwd("/build/src")
      .env("EXTRA", "yes");
    let inv = backend.exec_invocation(inner);

    assert_eq!(inv.program, "podman");
    assert_eq!(&inv.args[..3], ["exec", "--workdir", "/build/src"]);
    assert!(inv.args.windows(2).any(|w| w == ["--env", "SOURCE_DATE_EPOCH=315532800"]));
    assert!(inv.args.windows(2).any(|w| w == ["--env", "EXTRA=yes"]));
    let name_at = inv.args.iter().position(|a| a == backend.name()).unwrap();
    assert_eq!(&inv.args[name_at + 1..], [
      "/build/venv/bin/python",
      "-m",
      "pip",
      "install",
      "pyyaml"
    ]);
  }

  #[test]
  #[cfg(unix)]
  fn workspace_is_visible_through_mounts() {
    let parent = TempDir::new().unwrap();
    let ws = Workspace::create(Some(parent.path()), "c").unwrap();
    let backend = backend(&ws);

    let site = Path::new("/build/venv/lib/python3.12/site-packages");
    assert_eq!(
      backend.paths().to_host(site).unwrap(),
      ws.build().join("venv/lib/python3.12/site-packages")
    );
    assert_eq!(
      backend.paths().to_sandbox(&ws.output().join("morph_gen")).unwrap(),
      PathBuf::from("/output/morph_gen")
    );
  }

  #[tokio::test]
  async fn teardown_without_create_is_a_no_op() {
    let parent = TempDir::new().unwrap();
    let ws = Workspace::create(Some(parent.path()), "c").unwrap();
    let mut backend = backend(&ws);
    backend.teardown().await;
    assert!(!backend.created);
  }
}

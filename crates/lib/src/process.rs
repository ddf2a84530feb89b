//! External process invocation.
//!
//! Every toolchain, package manager and container call goes through here:
//! - argv vectors only, never a shell command line
//! - stdout/stderr captured, exit code reported
//! - bounded by an optional timeout and a cancellation token
//! - on timeout or cancel the child's process group gets SIGTERM, then is
//!   killed after a grace period

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ProcessError {
  /// An argument cannot be passed safely to a child process.
  #[error("invalid argument {arg:?}: {reason}")]
  InvalidArgument { arg: String, reason: &'static str },

  #[error("failed to start {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("io error while running {program}: {source}")]
  Io {
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("{program} timed out after {}", humantime::format_duration(*after))]
  TimedOut { program: String, after: Duration },

  #[error("{program} was cancelled")]
  Cancelled { program: String },
}

/// Convert a path into an argument, rejecting anything that cannot round-trip.
pub fn path_to_arg(path: &Path) -> Result<String, ProcessError> {
  let arg = path.to_str().ok_or_else(|| ProcessError::InvalidArgument {
    arg: path.to_string_lossy().to_string(),
    reason: "path is not valid UTF-8",
  })?;
  validate_arg(arg)?;
  Ok(arg.to_string())
}

fn validate_arg(arg: &str) -> Result<(), ProcessError> {
  if arg.contains('\0') {
    return Err(ProcessError::InvalidArgument {
      arg: arg.to_string(),
      reason: "contains a NUL byte",
    });
  }
  if arg.contains(['\n', '\r']) {
    return Err(ProcessError::InvalidArgument {
      arg: arg.to_string(),
      reason: "contains a line break",
    });
  }
  Ok(())
}

/// POSIX-style quoting, for log output only.
pub fn quote(arg: &str) -> Cow<'_, str> {
  let plain = !arg.is_empty()
    && arg
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
  if plain {
    Cow::Borrowed(arg)
  } else {
    Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
  }
}

/// A single process to run: program, argv, working directory and environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
  pub program: String,
  pub args: Vec<String>,
  pub cwd: Option<PathBuf>,
  pub env: BTreeMap<String, String>,
  /// Start from an empty environment instead of inheriting ours.
  pub clear_env: bool,
}

impl Invocation {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      ..Default::default()
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  /// Append a path argument after validating it.
  pub fn path_arg(self, path: &Path) -> Result<Self, ProcessError> {
    let arg = path_to_arg(path)?;
    Ok(self.arg(arg))
  }

  /// Append `<flag><path>`, e.g. `--output-dir=/output`.
  pub fn flag_path(self, flag: &str, path: &Path) -> Result<Self, ProcessError> {
    let arg = path_to_arg(path)?;
    Ok(self.arg(format!("{flag}{arg}")))
  }

  pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
    self.cwd = Some(dir.into());
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  pub fn env_clear(mut self) -> Self {
    self.clear_env = true;
    self
  }

  /// Check every piece that will reach the OS.
  pub fn validate(&self) -> Result<(), ProcessError> {
    validate_arg(&self.program)?;
    for arg in &self.args {
      validate_arg(arg)?;
    }
    for (key, value) in &self.env {
      validate_arg(key)?;
      validate_arg(value)?;
    }
    Ok(())
  }

  /// Quoted command line for logs and error messages.
  pub fn display(&self) -> String {
    std::iter::once(self.program.as_str())
      .chain(self.args.iter().map(String::as_str))
      .map(quote)
      .collect::<Vec<_>>()
      .join(" ")
  }
}

/// Time bounds for one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
  pub timeout: Option<Duration>,
  /// Time between SIGTERM and kill.
  pub grace: Duration,
}

impl Default for RunLimits {
  fn default() -> Self {
    Self {
      timeout: None,
      grace: Duration::from_secs(10),
    }
  }
}

impl RunLimits {
  pub fn with_timeout(timeout: Duration) -> Self {
    Self {
      timeout: Some(timeout),
      ..Self::default()
    }
  }
}

/// What a finished process left behind.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
  pub code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
  pub elapsed: Duration,
}

impl ProcessOutput {
  pub fn success(&self) -> bool {
    self.code == Some(0)
  }

  /// Last `lines` lines of stderr, for error messages.
  pub fn stderr_tail(&self, lines: usize) -> String {
    let all: Vec<&str> = self.stderr.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
  }
}

/// Runs invocations somewhere: directly on the host, or inside a sandbox.
pub trait Executor: Send + Sync {
  fn execute(
    &self,
    invocation: Invocation,
    limits: RunLimits,
    cancel: &CancellationToken,
  ) -> impl Future<Output = Result<ProcessOutput, ProcessError>> + Send;
}

/// Executes invocations as-is on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct Direct;

impl Executor for Direct {
  async fn execute(
    &self,
    invocation: Invocation,
    limits: RunLimits,
    cancel: &CancellationToken,
  ) -> Result<ProcessOutput, ProcessError> {
    run(&invocation, limits, cancel).await
  }
}

enum Waited {
  Finished(io::Result<ExitStatus>, String, String),
  Cancelled,
  TimedOut(Duration),
}

/// Run an invocation to completion, timeout or cancellation.
///
/// The child leads its own process group; timeout and cancellation cover
/// the whole group and the draining of its output pipes, so helpers left
/// running by the toolchain cannot outlive the bound.
///
/// A non-zero exit is not an error here; callers decide what it means.
pub async fn run(
  invocation: &Invocation,
  limits: RunLimits,
  cancel: &CancellationToken,
) -> Result<ProcessOutput, ProcessError> {
  invocation.validate()?;

  let program = invocation.program.clone();
  let mut command = Command::new(&invocation.program);
  command
    .args(&invocation.args)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);
  #[cfg(unix)]
  command.process_group(0);
  if invocation.clear_env {
    command.env_clear();
  }
  command.envs(&invocation.env);
  if let Some(cwd) = &invocation.cwd {
    command.current_dir(cwd);
  }

  debug!(cmd = %invocation.display(), cwd = ?invocation.cwd, "spawning process");

  let started = Instant::now();
  let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
    program: program.clone(),
    source,
  })?;
  // Process group id; `child.id()` is gone once the child is reaped.
  let group = child.id();

  let stdout_task = spawn_reader(child.stdout.take());
  let stderr_task = spawn_reader(child.stderr.take());

  let waited = tokio::select! {
    (status, stdout, stderr) = async {
      let status = child.wait().await;
      (status, collect(stdout_task).await, collect(stderr_task).await)
    } => Waited::Finished(status, stdout, stderr),
    _ = cancel.cancelled() => Waited::Cancelled,
    after = deadline(limits.timeout) => Waited::TimedOut(after),
  };

  let (status, stdout, stderr) = match waited {
    Waited::Finished(status, stdout, stderr) => {
      let status = status.map_err(|source| ProcessError::Io {
        program: program.clone(),
        source,
      })?;
      (status, stdout, stderr)
    }
    Waited::Cancelled => {
      warn!(program = %program, "cancelling process");
      terminate(&mut child, group, limits.grace).await;
      return Err(ProcessError::Cancelled { program });
    }
    Waited::TimedOut(after) => {
      warn!(program = %program, timeout = %humantime::format_duration(after), "process timed out");
      terminate(&mut child, group, limits.grace).await;
      return Err(ProcessError::TimedOut { program, after });
    }
  };

  let output = ProcessOutput {
    code: status.code(),
    stdout,
    stderr,
    elapsed: started.elapsed(),
  };

  if !output.success() {
    if !output.stderr.is_empty() {
      debug!(stderr = %output.stderr, "process stderr");
    }
    if !output.stdout.is_empty() {
      debug!(stdout = %output.stdout, "process stdout");
    }
  }
  debug!(program = %program, code = ?output.code, elapsed = ?output.elapsed, "process exited");

  Ok(output)
}

async fn deadline(timeout: Option<Duration>) -> Duration {
  match timeout {
    Some(after) => {
      tokio::time::sleep(after).await;
      after
    }
    None => std::future::pending().await,
  }
}

fn spawn_reader<R>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>>
where
  R: AsyncRead + Unpin + Send + 'static,
{
  pipe.map(|mut pipe| {
    tokio::spawn(async move {
      let mut buf = Vec::new();
      if let Err(e) = pipe.read_to_end(&mut buf).await {
        debug!(error = %e, "failed to read child output");
      }
      buf
    })
  })
}

async fn collect(task: Option<JoinHandle<Vec<u8>>>) -> String {
  match task {
    Some(task) => match task.await {
      Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
      Err(e) => {
        warn!(error = %e, "output reader task failed");
        String::new()
      }
    },
    None => String::new(),
  }
}

/// SIGTERM to the whole process group, wait up to `grace` for it to empty,
/// then SIGKILL whatever is left.
#[cfg(unix)]
async fn terminate(child: &mut Child, group: Option<u32>, grace: Duration) {
  use nix::sys::signal::{Signal, killpg};
  use nix::unistd::Pid;

  if let Some(pgid) = group {
    let pgrp = Pid::from_raw(pgid as i32);
    match killpg(pgrp, Signal::SIGTERM) {
      Ok(()) => {
        let emptied = tokio::time::timeout(grace, async {
          loop {
            // Reap the leader so a zombie does not keep the group alive.
            let _ = child.try_wait();
            if killpg(pgrp, None).is_err() {
              break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
          }
        })
        .await
        .is_ok();
        if !emptied {
          warn!(pgid, "process group ignored SIGTERM, killing");
          if let Err(e) = killpg(pgrp, Signal::SIGKILL) {
            debug!(pgid, error = %e, "failed to kill process group");
          }
        }
      }
      Err(e) => debug!(pgid, error = %e, "failed to send SIGTERM"),
    }
  }

  kill_leader(child).await;
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child, _group: Option<u32>, _grace: Duration) {
  kill_leader(child).await;
}

/// Kill and reap the direct child unless it is already reaped.
async fn kill_leader(child: &mut Child) {
  if let Ok(Some(_)) = child.try_wait() {
    return;
  }
  if let Err(e) = child.kill().await {
    warn!(error = %e, "failed to kill process");
  }
}

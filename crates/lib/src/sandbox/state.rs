use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of one sandbox. Each state names the phase being worked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
  Provisioning,
  DependenciesInstalled,
  Bundling,
  Succeeded,
  Failed,
}

impl SandboxState {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Succeeded | Self::Failed)
  }

  /// Transitions only move forward, one step at a time. Any live state may fail.
  pub fn can_transition_to(self, next: SandboxState) -> bool {
    use SandboxState::*;
    matches!(
      (self, next),
      (Provisioning, DependenciesInstalled)
        | (DependenciesInstalled, Bundling)
        | (Bundling, Succeeded)
        | (Provisioning | DependenciesInstalled | Bundling, Failed)
    )
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Provisioning => "provisioning",
      Self::DependenciesInstalled => "dependencies_installed",
      Self::Bundling => "bundling",
      Self::Succeeded => "succeeded",
      Self::Failed => "failed",
    }
  }
}

impl fmt::Display for SandboxState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid sandbox transition {from} -> {to}")]
pub struct InvalidTransition {
  pub from: SandboxState,
  pub to: SandboxState,
}

/// Current state plus every state visited so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMachine {
  history: Vec<SandboxState>,
}

impl Default for StateMachine {
  fn default() -> Self {
    Self::new()
  }
}

impl StateMachine {
  pub fn new() -> Self {
    Self {
      history: vec![SandboxState::Provisioning],
    }
  }

  pub fn current(&self) -> SandboxState {
    self.history.last().copied().unwrap_or(SandboxState::Provisioning)
  }

  pub fn history(&self) -> &[SandboxState] {
    &self.history
  }

  pub fn advance(&mut self, next: SandboxState) -> Result<(), InvalidTransition> {
    let from = self.current();
    if !from.can_transition_to(next) {
      return Err(InvalidTransition { from, to: next });
    }
    self.history.push(next);
    Ok(())
  }

  /// Move to `Failed` unless already terminal.
  pub fn fail(&mut self) {
    if !self.current().is_terminal() {
      self.history.push(SandboxState::Failed);
    }
  }

  pub fn into_history(self) -> Vec<SandboxState> {
    self.history
  }
}

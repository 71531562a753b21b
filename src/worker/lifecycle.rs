//! Explicit lifecycle of a cache generation set.
//!
//! `Parsed -> Installing -> Installed -> Activating -> Activated`, with
//! `Redundant` when installation fails. Only install, activate and the
//! skip-waiting message move the state.

use color_eyre::{eyre::eyre, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Created, nothing installed yet
  Parsed,
  /// Populating caches from the manifests
  Installing,
  /// Installed and waiting to take over
  Installed,
  /// Evicting stale generations
  Activating,
  /// Controlling pages and intercepting requests
  Activated,
  /// Installation failed; the previous version stays in charge
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      WorkerState::Parsed => "parsed",
      WorkerState::Installing => "installing",
      WorkerState::Installed => "installed",
      WorkerState::Activating => "activating",
      WorkerState::Activated => "activated",
      WorkerState::Redundant => "redundant",
    };
    f.write_str(label)
  }
}

#[derive(Debug)]
pub struct Lifecycle {
  state: WorkerState,
  skip_waiting: bool,
}

impl Lifecycle {
  /// Resume from persisted registration data.
  pub fn resume(state: WorkerState) -> Self {
    Self {
      state,
      skip_waiting: false,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn begin_install(&mut self) -> Result<()> {
    match self.state {
      WorkerState::Parsed | WorkerState::Redundant => {
        self.state = WorkerState::Installing;
        Ok(())
      }
      state => Err(eyre!("Cannot install while {}", state)),
    }
  }

  /// Finish installation. Returns true when activation should follow
  /// immediately because skip-waiting was requested.
  pub fn finish_install(&mut self, succeeded: bool) -> bool {
    if self.state != WorkerState::Installing {
      return false;
    }

    if succeeded {
      self.state = WorkerState::Installed;
      self.skip_waiting
    } else {
      self.state = WorkerState::Redundant;
      self.skip_waiting = false;
      false
    }
  }

  /// Record a skip-waiting request. Returns true when an installed
  /// generation is waiting and should activate now.
  pub fn request_skip_waiting(&mut self) -> bool {
    self.skip_waiting = true;
    self.state == WorkerState::Installed
  }

  /// Re-activating an active set is allowed and evicts nothing new.
  pub fn begin_activate(&mut self) -> Result<()> {
    match self.state {
      WorkerState::Installed | WorkerState::Activated => {
        self.state = WorkerState::Activating;
        Ok(())
      }
      state => Err(eyre!("Cannot activate while {}", state)),
    }
  }

  pub fn finish_activate(&mut self, succeeded: bool) {
    if self.state == WorkerState::Activating {
      self.state = if succeeded {
        WorkerState::Activated
      } else {
        WorkerState::Installed
      };
      self.skip_waiting = false;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_install_then_activate() {
    let mut lifecycle = Lifecycle::resume(WorkerState::Parsed);
    lifecycle.begin_install().unwrap();
    assert_eq!(lifecycle.state(), WorkerState::Installing);

    assert!(!lifecycle.finish_install(true));
    assert_eq!(lifecycle.state(), WorkerState::Installed);

    lifecycle.begin_activate().unwrap();
    lifecycle.finish_activate(true);
    assert_eq!(lifecycle.state(), WorkerState::Activated);
  }

  #[test]
  fn test_failed_install_is_redundant_and_retryable() {
    let mut lifecycle = Lifecycle::resume(WorkerState::Parsed);
    lifecycle.begin_install().unwrap();
    assert!(!lifecycle.finish_install(false));
    assert_eq!(lifecycle.state(), WorkerState::Redundant);

    assert!(lifecycle.begin_activate().is_err());
    lifecycle.begin_install().unwrap();
  }

  #[test]
  fn test_skip_waiting_before_install_finishes() {
    let mut lifecycle = Lifecycle::resume(WorkerState::Parsed);
    lifecycle.begin_install().unwrap();

    // Nothing is waiting yet
    assert!(!lifecycle.request_skip_waiting());

    // Remembered and honoured once install completes
    assert!(lifecycle.finish_install(true));
  }

  #[test]
  fn test_skip_waiting_while_installed() {
    let mut lifecycle = Lifecycle::resume(WorkerState::Installed);
    assert!(lifecycle.request_skip_waiting());
  }

  #[test]
  fn test_invalid_transitions_rejected() {
    let mut lifecycle = Lifecycle::resume(WorkerState::Parsed);
    assert!(lifecycle.begin_activate().is_err());

    let mut active = Lifecycle::resume(WorkerState::Activated);
    assert!(active.begin_install().is_err());
    assert!(!active.request_skip_waiting());
  }

  #[test]
  fn test_failed_activation_returns_to_installed() {
    let mut lifecycle = Lifecycle::resume(WorkerState::Installed);
    lifecycle.begin_activate().unwrap();
    lifecycle.finish_activate(false);
    assert_eq!(lifecycle.state(), WorkerState::Installed);
  }

  #[test]
  fn test_reactivation_allowed() {
    let mut lifecycle = Lifecycle::resume(WorkerState::Activated);
    lifecycle.begin_activate().unwrap();
    lifecycle.finish_activate(true);
    assert_eq!(lifecycle.state(), WorkerState::Activated);
  }
}

//! Service lifecycle state machine.
//!
//! ```text
//! Created ──► Connecting ──► Running ──► Draining ──► Stopped
//!    │             │                        ▲
//!    │             └──── (startup failure) ─┼──────► Stopped
//!    └──────────────────────────────────────┘
//! ```
//!
//! Every graceful exit passes through `Draining`. The only path to
//! `Stopped` that skips it is a failed `Connecting`, which is fatal.

use std::fmt;

use tokio::sync::watch;
use tracing::info;

use crate::error::{AlertError, Result};

mod handles;

pub use handles::{ConnectionHandle, HandleStack};

/// Lifecycle states of an alert service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Connecting,
    Running,
    Draining,
    Stopped,
}

impl LifecycleState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Created, Connecting)
                | (Created, Draining)
                | (Connecting, Running)
                | (Connecting, Stopped)
                | (Running, Draining)
                | (Draining, Stopped)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Created => "created",
            LifecycleState::Connecting => "connecting",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner of the current state; observers hold `watch` receivers.
pub struct Lifecycle {
    state: watch::Sender<LifecycleState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Created);
        Self { state }
    }

    pub fn current(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&self, next: LifecycleState) -> Result<()> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                info!(from = %current, to = %next, "Lifecycle transition");
                *current = next;
                true
            } else {
                outcome = Err(AlertError::InvalidTransition {
                    from: *current,
                    to: next,
                });
                false
            }
        });
        outcome
    }

    /// Move from `from` to `next` only if the current state is `from`.
    ///
    /// Returns `false` without changing anything otherwise; used where two
    /// callers may race for the same transition.
    pub fn transition_from(&self, from: LifecycleState, next: LifecycleState) -> bool {
        self.state.send_if_modified(|current| {
            if *current == from && from.can_transition_to(next) {
                info!(from = %current, to = %next, "Lifecycle transition");
                *current = next;
                true
            } else {
                false
            }
        })
    }
}

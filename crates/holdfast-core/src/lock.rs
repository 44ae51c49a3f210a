//! Lock state and toggle-trigger debouncing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Whether the reconciliation loop is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    #[default]
    Unlocked,
    Locked,
}

impl LockState {
    pub fn from_locked(locked: bool) -> Self {
        if locked {
            LockState::Locked
        } else {
            LockState::Unlocked
        }
    }

    pub fn is_locked(self) -> bool {
        matches!(self, LockState::Locked)
    }

    pub fn toggled(self) -> Self {
        match self {
            LockState::Unlocked => LockState::Locked,
            LockState::Locked => LockState::Unlocked,
        }
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Unlocked => f.write_str("unlocked"),
            LockState::Locked => f.write_str("locked"),
        }
    }
}

/// One press of the external toggle control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToggleEvent {
    /// Auto-repeat of a held key.
    pub repeat: bool,
}

impl ToggleEvent {
    pub fn press() -> Self {
        Self { repeat: false }
    }

    pub fn repeat() -> Self {
        Self { repeat: true }
    }
}

/// Filters repeat-fire and bursts so one physical press toggles once.
#[derive(Debug, Clone)]
pub struct ToggleDebouncer {
    window: Duration,
    last_accepted: Option<Instant>,
}

impl ToggleDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: None,
        }
    }

    /// Returns true when the event should reach `toggle()`.
    pub fn accept(&mut self, event: ToggleEvent, now: Instant) -> bool {
        if event.repeat {
            return false;
        }
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last_accepted = Some(now);
        true
    }
}

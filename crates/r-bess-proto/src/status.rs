//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Actor protocol requests, acknowledgements, and task runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use r_bess_fleet::ModuleKind;
use serde::{Deserialize, Serialize};

/// How many user actions an actor remembers.
pub const ACTION_LOG_DEPTH: usize = 10;

/// Identity card returned by `GET_INFO`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorInfo {
    /// Device uid from the site configuration.
    pub uid: String,
    /// Module kind the actor represents.
    pub kind: ModuleKind,
    /// Manufacturer string for the operator display.
    pub manufacturer: String,
    /// Model string for the operator display.
    pub model: String,
    /// Software or firmware version string.
    pub version: String,
}

/// One recorded operator interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAction {
    /// When the action happened.
    pub at: DateTime<Utc>,
    /// Short verb, e.g. `set_page`.
    pub action: String,
    /// Free-form detail, e.g. the fields that were written.
    pub detail: String,
}

impl UserAction {
    /// Record an action happening now.
    pub fn now(action: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            action: action.into(),
            detail: detail.into(),
        }
    }
}

/// Live status returned by `GET_STATUS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorStatus {
    /// Rolling liveness counter.
    pub heartbeat: u16,
    /// Active warning bits.
    pub warnings: u16,
    /// Active alarm bits.
    pub alarms: u16,
    /// Active fault bits.
    pub faults: u16,
    /// Human-readable state line.
    pub state_text: String,
    /// Most recent user actions, oldest first.
    pub recent_actions: Vec<UserAction>,
}

/// Bounded ring of recorded user actions.
#[derive(Debug, Default)]
pub struct ActionLog {
    entries: VecDeque<UserAction>,
}

impl ActionLog {
    /// Append an action, evicting the oldest past [`ACTION_LOG_DEPTH`].
    pub fn record(&mut self, action: UserAction) {
        if self.entries.len() == ACTION_LOG_DEPTH {
            self.entries.pop_front();
        }
        self.entries.push_back(action);
    }

    /// Chronological copy of the retained actions.
    pub fn snapshot(&self) -> Vec<UserAction> {
        self.entries.iter().cloned().collect()
    }

    /// Number of retained actions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Application records as reported by the platform.
//!
//! This module defines the `ApplicationRecord` snapshot type together with
//! the `WatchKey` used by the reconciler to decide whether two observations
//! refer to the same watched application.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a platform application.
///
/// Serialized as the platform's own string (`STARTED`, `STOPPED`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum LifecycleState {
    Started,
    Stopped,
    /// Any transient state reported by the platform (e.g. `PENDING`).
    Other(String),
}

impl LifecycleState {
    /// Maps the raw platform state string (`STARTED`, `STOPPED`, ...).
    pub fn from_platform(raw: &str) -> Self {
        match raw {
            "STARTED" => LifecycleState::Started,
            "STOPPED" => LifecycleState::Stopped,
            other => LifecycleState::Other(other.to_string()),
        }
    }

    /// Only `Started` counts as running; transient states are treated as stopped.
    pub fn is_started(&self) -> bool {
        matches!(self, LifecycleState::Started)
    }
}

impl From<String> for LifecycleState {
    fn from(raw: String) -> Self {
        LifecycleState::from_platform(&raw)
    }
}

impl From<LifecycleState> for String {
    fn from(state: LifecycleState) -> Self {
        state.to_string()
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Started => f.write_str("STARTED"),
            LifecycleState::Stopped => f.write_str("STOPPED"),
            LifecycleState::Other(raw) => f.write_str(raw),
        }
    }
}

/// Snapshot of one application at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub guid: String,
    pub name: String,
    /// Identifier of the owning space.
    pub space: String,
    pub state: LifecycleState,
    pub instances: u32,
}

impl ApplicationRecord {
    pub fn watch_key(&self) -> WatchKey {
        WatchKey {
            guid: self.guid.clone(),
            name: self.name.clone(),
        }
    }
}

/// Identity of a watched application.
///
/// Both the guid and the name must match. A rename therefore produces a new
/// key, which makes the reconciler tear the old watcher down and create a
/// fresh one labelled with the new name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchKey {
    pub guid: String,
    pub name: String,
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.guid)
    }
}

//! Lifecycle and checkpoint events delivered by `Events`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stasis_common::types::ContainerId;

/// What happened to a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// The init process started.
    StartContainer,
    /// An additional process started.
    StartProcess,
    /// A process exited; `status` carries its exit status.
    Exit,
    /// Resource limits changed.
    Update,
    /// A signal was delivered; `status` carries the signal number.
    Signal,
    /// A checkpoint was created.
    Checkpoint,
    /// A checkpoint was deleted.
    DeleteCheckpoint,
    /// The container was restored from a checkpoint.
    Restore,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StartContainer => "start-container",
            Self::StartProcess => "start-process",
            Self::Exit => "exit",
            Self::Update => "update",
            Self::Signal => "signal",
            Self::Checkpoint => "checkpoint",
            Self::DeleteCheckpoint => "delete-checkpoint",
            Self::Restore => "restore",
        };
        f.write_str(name)
    }
}

/// One lifecycle transition or checkpoint action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Kind of event.
    pub kind: EventKind,
    /// Container the event belongs to.
    pub id: ContainerId,
    /// Process name the event concerns.
    pub pid: String,
    /// Exit status or signal number; zero otherwise.
    #[serde(default)]
    pub status: i32,
    /// Checkpoint the event concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    /// When the agent observed the event.
    pub timestamp: DateTime<Utc>,
}

impl EventMessage {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(kind: EventKind, id: ContainerId, pid: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            pid: pid.into(),
            status: 0,
            checkpoint: None,
            timestamp: Utc::now(),
        }
    }

    /// Sets the exit status or signal number.
    #[must_use]
    pub fn with_status(mut self, status: i32) -> Self {
        self.status = status;
        self
    }

    /// Sets the checkpoint the event concerns.
    #[must_use]
    pub fn with_checkpoint(mut self, name: impl Into<String>) -> Self {
        self.checkpoint = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_kebab_case() {
        let json = serde_json::to_string(&EventKind::DeleteCheckpoint).unwrap();
        assert_eq!(json, "\"delete-checkpoint\"");
        assert_eq!(EventKind::StartContainer.to_string(), "start-container");
    }

    #[test]
    fn checkpoint_field_is_omitted_when_absent() {
        let event = EventMessage::new(EventKind::Exit, ContainerId::new("c1"), "init").with_status(3);
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("checkpoint").is_none());
        assert_eq!(json["status"], 3);
    }
}

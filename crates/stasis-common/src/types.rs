//! Domain primitive types shared by the agent and the manager.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StasisError};

/// Characters allowed in a restricted name, for error messages.
pub const RESTRICTED_NAME_CHARS: &str = "[a-zA-Z0-9][a-zA-Z0-9_.-]";

/// Opaque handle naming a container known to the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random container ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns whether the handle is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks that the handle can name a new container.
    ///
    /// # Errors
    ///
    /// Returns [`StasisError::InvalidArgument`] if the handle violates
    /// the restricted-name rule.
    pub fn validate(&self) -> Result<()> {
        if !is_restricted_name(&self.0) {
            return Err(StasisError::invalid_argument(format!(
                "invalid container ID ({}), only {RESTRICTED_NAME_CHARS} are allowed",
                self.0
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContainerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Returns whether `name` satisfies the restricted-name rule.
///
/// The first character must be an ASCII letter or digit; the rest may
/// also contain `_`, `.` and `-`. This keeps names usable as a single
/// path component (no separators, never `.` or `..`).
#[must_use]
pub fn is_restricted_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_ascii_alphanumeric()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Returns whether `id` is a well-formed checkpoint identifier.
#[must_use]
pub fn is_valid_checkpoint_id(id: &str) -> bool {
    is_restricted_name(id)
}

/// A validated checkpoint identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CheckpointId(String);

impl CheckpointId {
    /// Validates and wraps a checkpoint identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StasisError::InvalidArgument`] if `id` contains a
    /// character outside the restricted set.
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if !is_valid_checkpoint_id(&id) {
            return Err(StasisError::invalid_argument(format!(
                "invalid checkpoint ID ({id}), only {RESTRICTED_NAME_CHARS} are allowed"
            )));
        }
        Ok(Self(id))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for CheckpointId {
    type Error = StasisError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<CheckpointId> for String {
    fn from(value: CheckpointId) -> Self {
        value.0
    }
}

/// Resource limits for a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU weight (1-10000).
    pub cpu_weight: Option<u64>,
    /// Memory limit in bytes.
    pub memory_bytes: Option<u64>,
    /// I/O weight (1-10000).
    pub io_weight: Option<u16>,
}

impl ResourceLimits {
    /// Overlays the limits set in `other` on top of `self`.
    pub fn merge(&mut self, other: &Self) {
        if other.cpu_weight.is_some() {
            self.cpu_weight = other.cpu_weight;
        }
        if other.memory_bytes.is_some() {
            self.memory_bytes = other.memory_bytes;
        }
        if other.io_weight.is_some() {
            self.io_weight = other.io_weight;
        }
    }

    /// Checks that every set limit lies within its accepted range.
    ///
    /// # Errors
    ///
    /// Returns [`StasisError::InvalidArgument`] naming the first bad limit.
    pub fn validate(&self) -> Result<()> {
        if let Some(weight) = self.cpu_weight.filter(|w| !(1..=10_000).contains(w)) {
            return Err(StasisError::invalid_argument(format!(
                "cpu weight {weight} outside 1-10000"
            )));
        }
        if let Some(weight) = self.io_weight.filter(|w| !(1..=10_000).contains(w)) {
            return Err(StasisError::invalid_argument(format!(
                "io weight {weight} outside 1-10000"
            )));
        }
        if self.memory_bytes == Some(0) {
            return Err(StasisError::invalid_argument("memory limit must be non-zero"));
        }
        Ok(())
    }
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    /// Container is registered but its init process is not up yet.
    Created,
    /// Container's init process is running.
    Running,
    /// Container's init process has exited.
    Stopped,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn accepts_restricted_charset() {
        for id in ["snap-1", "a", "v1.2_final", "0abc", "A-b.C_d"] {
            assert!(is_valid_checkpoint_id(id), "{id} should be valid");
        }
    }

    #[test]
    fn rejects_separators_and_dots() {
        for id in ["", "bad id", "../x", "x/y", ".", "..", ".hidden", "-flag", "_x", "snap\0"] {
            assert!(!is_valid_checkpoint_id(id), "{id:?} should be invalid");
        }
    }

    #[test]
    fn parse_reports_invalid_argument() {
        let err = CheckpointId::parse("bad id").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.to_string().contains("bad id"));
    }

    #[test]
    fn checkpoint_id_deserialization_validates() {
        let ok: CheckpointId = serde_json::from_str("\"snap-1\"").unwrap();
        assert_eq!(ok.as_str(), "snap-1");
        assert!(serde_json::from_str::<CheckpointId>("\"../x\"").is_err());
    }

    #[test]
    fn container_id_validation_rejects_traversal() {
        assert!(ContainerId::new("c1").validate().is_ok());
        assert!(ContainerId::new("../c1").validate().is_err());
        assert!(ContainerId::new("").validate().is_err());
    }

    #[test]
    fn container_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&ContainerId::new("c1")).unwrap();
        assert_eq!(json, "\"c1\"");
    }

    #[test]
    fn merge_overlays_only_set_limits() {
        let mut limits = ResourceLimits {
            cpu_weight: Some(100),
            memory_bytes: Some(1024),
            io_weight: None,
        };
        limits.merge(&ResourceLimits {
            memory_bytes: Some(2048),
            ..ResourceLimits::default()
        });
        assert_eq!(limits.cpu_weight, Some(100));
        assert_eq!(limits.memory_bytes, Some(2048));
    }

    #[test]
    fn validate_rejects_out_of_range_weight() {
        let limits = ResourceLimits {
            cpu_weight: Some(0),
            ..ResourceLimits::default()
        };
        assert!(limits.validate().is_err());
    }
}

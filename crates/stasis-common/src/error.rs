//! Unified error types for the Stasis workspace.
//!
//! Every failure maps onto one [`ErrorKind`] of the protocol taxonomy.
//! Agent-side failures travel over the wire as a status code and come
//! back on the manager side as [`StasisError::Remote`], while failures of
//! the transport itself surface as [`StasisError::Transport`].

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of every error the protocol can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed identifier or request shape.
    InvalidArgument,
    /// Unknown container, process, or checkpoint.
    NotFound,
    /// Duplicate container, process, or checkpoint identifier.
    AlreadyExists,
    /// Operation incompatible with the container's lifecycle state.
    InvalidState,
    /// Connection loss or deadline exceeded.
    TransportFailure,
    /// Unexpected agent-side failure.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::NotFound => write!(f, "not found"),
            Self::AlreadyExists => write!(f, "already exists"),
            Self::InvalidState => write!(f, "invalid state"),
            Self::TransportFailure => write!(f, "transport failure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum StasisError {
    /// A request field or identifier is malformed.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the offending value.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A resource with the same identifier already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Type of the conflicting resource.
        kind: &'static str,
        /// Identifier that is already taken.
        id: String,
    },

    /// The container's lifecycle state does not allow the operation.
    #[error("container {id}: {message}")]
    InvalidState {
        /// Container the operation targeted.
        id: String,
        /// Description of the conflict.
        message: String,
    },

    /// The call never produced an application-level outcome.
    #[error("transport failure calling {method}: {message}")]
    Transport {
        /// Fully qualified method name.
        method: String,
        /// Description of the failure.
        message: String,
    },

    /// An error reported by the agent and decoded from the wire.
    #[error("{kind}: {message}")]
    Remote {
        /// Classification carried by the wire status.
        kind: ErrorKind,
        /// Message produced by the agent.
        message: String,
    },

    /// An unexpected failure inside the agent.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// Another error annotated with the container or checkpoint it concerns.
    #[error("{context}: {source}")]
    Context {
        /// Identifies the target of the failed operation.
        context: String,
        /// The annotated error.
        source: Box<StasisError>,
    },
}

impl StasisError {
    /// Returns the protocol classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Transport { .. } => ErrorKind::TransportFailure,
            Self::Remote { kind, .. } => *kind,
            Self::Internal { .. } | Self::Io { .. } | Self::Serialization { .. } => {
                ErrorKind::Internal
            }
            Self::Context { source, .. } => source.kind(),
        }
    }

    /// Shorthand for an [`StasisError::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Shorthand for an [`StasisError::InvalidState`].
    pub fn invalid_state(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidState {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Shorthand for an [`StasisError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wraps `self` with context naming the target of the operation.
    ///
    /// The [`kind`](Self::kind) of the result is unchanged.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns whether the failure happened below the application layer.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::TransportFailure
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, StasisError>;

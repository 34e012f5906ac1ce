//! Application error statuses as carried on the wire.

use serde::{Deserialize, Serialize};
use stasis_common::error::{ErrorKind, StasisError};

/// An agent-reported failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Classification of the failure.
    pub code: ErrorKind,
    /// Human-readable message, naming the offending identifier.
    pub message: String,
}

impl Status {
    /// Creates a status.
    pub fn new(code: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Converts the status back into an error on the manager side.
    #[must_use]
    pub fn into_error(self) -> StasisError {
        StasisError::Remote {
            kind: self.code,
            message: self.message,
        }
    }
}

impl From<&StasisError> for Status {
    fn from(err: &StasisError) -> Self {
        // Transport failures belong to the caller's side of the wire.
        let code = match err.kind() {
            ErrorKind::TransportFailure => ErrorKind::Internal,
            kind => kind,
        };
        Self::new(code, err.to_string())
    }
}

impl From<StasisError> for Status {
    fn from(err: StasisError) -> Self {
        Self::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_survives_the_round_trip() {
        let err = StasisError::NotFound {
            kind: "container",
            id: "unknown-container".into(),
        };
        let back = Status::from(&err).into_error();
        assert_eq!(back.kind(), ErrorKind::NotFound);
        assert!(back.to_string().contains("unknown-container"));
    }

    #[test]
    fn transport_kind_never_goes_on_the_wire() {
        let err = StasisError::Transport {
            method: "types.API.State".into(),
            message: "broken pipe".into(),
        };
        assert_eq!(Status::from(err).code, ErrorKind::Internal);
    }
}

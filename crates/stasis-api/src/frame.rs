//! Newline-delimited JSON frames, multiplexed by call id.
//!
//! A unary call is one `request` answered by one `response` or `error`.
//! A streaming call is one `request` answered by any number of `event`
//! frames and terminated by `end` or `error`; the caller may abort it
//! with `cancel`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use stasis_common::error::{Result, StasisError};

use crate::event::EventMessage;
use crate::status::Status;

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Opens a call.
    Request {
        /// Call id chosen by the caller, unique per connection.
        id: u64,
        /// Namespaced method name.
        method: String,
        /// Encoded request message.
        params: serde_json::Value,
    },
    /// Successful unary result.
    Response {
        /// Call id.
        id: u64,
        /// Encoded response message.
        result: serde_json::Value,
    },
    /// Failed call, unary or streaming.
    Error {
        /// Call id.
        id: u64,
        /// Failure description.
        status: Status,
    },
    /// One pushed event of a streaming call.
    Event {
        /// Call id.
        id: u64,
        /// The event.
        event: EventMessage,
    },
    /// Normal end of a streaming call.
    End {
        /// Call id.
        id: u64,
    },
    /// Caller abandons a streaming call.
    Cancel {
        /// Call id.
        id: u64,
    },
}

impl Frame {
    /// Returns the call id the frame belongs to.
    #[must_use]
    pub const fn id(&self) -> u64 {
        match self {
            Self::Request { id, .. }
            | Self::Response { id, .. }
            | Self::Error { id, .. }
            | Self::Event { id, .. }
            | Self::End { id }
            | Self::Cancel { id } => *id,
        }
    }

    /// Encodes the frame as a single line, newline included.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be serialized.
    pub fn encode(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Decodes a frame from one line.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is not a valid frame.
    pub fn decode(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

/// Encodes a message into a frame payload.
///
/// # Errors
///
/// Returns an error if the message cannot be serialized.
pub fn encode_message<T: Serialize>(message: &T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(message)?)
}

/// Decodes a request payload received by the agent.
///
/// A payload that does not match the message shape is the caller's
/// fault and is reported as [`StasisError::InvalidArgument`].
///
/// # Errors
///
/// Returns an error if the payload does not match `T`.
pub fn decode_request<T: DeserializeOwned>(method: &str, params: serde_json::Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| {
        StasisError::invalid_argument(format!("malformed {method} request: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stasis_common::error::ErrorKind;

    use crate::messages::StateRequest;

    #[test]
    fn frames_are_single_tagged_lines() {
        let frame = Frame::Request {
            id: 7,
            method: "types.API.State".into(),
            params: serde_json::json!({}),
        };
        let line = frame.encode().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.contains("\"type\":\"request\""));
        assert_eq!(Frame::decode(&line).unwrap(), frame);
    }

    #[test]
    fn error_frame_carries_status() {
        let line = r#"{"type":"error","id":3,"status":{"code":"not_found","message":"container not found: c1"}}"#;
        let Frame::Error { id, status } = Frame::decode(line).unwrap() else {
            panic!("expected error frame");
        };
        assert_eq!(id, 3);
        assert_eq!(status.code, ErrorKind::NotFound);
    }

    #[test]
    fn malformed_request_is_invalid_argument() {
        let err = decode_request::<StateRequest>("types.API.State", serde_json::json!({ "id": 5 }))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}

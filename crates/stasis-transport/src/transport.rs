//! The client-side transport seam.

use async_trait::async_trait;
use serde_json::Value;
use stasis_api::method::Method;
use stasis_api::stream::EventStream;
use stasis_common::error::{Result, StasisError};

/// Carries encoded calls to an agent.
///
/// Application failures come back as [`StasisError::Remote`]; failures
/// of the channel itself (connection loss, deadline exceeded) as
/// [`StasisError::Transport`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request and waits for its single response.
    ///
    /// # Errors
    ///
    /// Returns the agent's status or a transport failure.
    async fn call(&self, method: Method, params: Value) -> Result<Value>;

    /// Opens a server-streaming call.
    ///
    /// Errors the agent reports after the call is opened surface from
    /// [`EventStream::next`].
    ///
    /// # Errors
    ///
    /// Returns an error if the call cannot be sent.
    async fn open_stream(&self, method: Method, params: Value) -> Result<EventStream>;
}

/// Builds a transport failure for `method`.
pub fn transport_error(method: &str, message: impl Into<String>) -> StasisError {
    StasisError::Transport {
        method: method.to_string(),
        message: message.into(),
    }
}

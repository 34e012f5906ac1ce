//! In-process transport.
//!
//! Calls never leave the process but still go through frame encoding,
//! so everything that crosses a socket also crosses this transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use stasis_api::ControlService;
use stasis_api::frame::Frame;
use stasis_api::method::Method;
use stasis_api::stream::EventStream;
use stasis_common::error::{Result, StasisError};
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::transport::{Transport, transport_error};

/// Transport that dispatches straight into a service in the same process.
#[derive(Debug)]
pub struct LocalTransport {
    dispatcher: Dispatcher,
    next_id: AtomicU64,
    closed: CancellationToken,
}

impl LocalTransport {
    /// Connects to `service`.
    #[must_use]
    pub fn new(service: Arc<dyn ControlService>) -> Self {
        Self {
            dispatcher: Dispatcher::new(service),
            next_id: AtomicU64::new(1),
            closed: CancellationToken::new(),
        }
    }

    /// Severs the transport; later calls fail with a transport error.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn call(&self, method: Method, params: Value) -> Result<Value> {
        let name = method.full_name();
        if self.closed.is_cancelled() {
            return Err(transport_error(&name, "transport closed"));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let line = Frame::Request {
            id,
            method: name.clone(),
            params,
        }
        .encode()?;
        let Frame::Request { method, params, .. } = Frame::decode(&line)? else {
            return Err(StasisError::internal("request frame changed type in transit"));
        };

        let reply = match self.dispatcher.call(&method, params).await {
            Ok(result) => Frame::Response { id, result },
            Err(status) => Frame::Error { id, status },
        };
        match Frame::decode(&reply.encode()?)? {
            Frame::Response { result, .. } => Ok(result),
            Frame::Error { status, .. } => Err(status.into_error()),
            other => Err(StasisError::internal(format!(
                "unexpected reply frame for call {}",
                other.id()
            ))),
        }
    }

    async fn open_stream(&self, method: Method, params: Value) -> Result<EventStream> {
        let name = method.full_name();
        if self.closed.is_cancelled() {
            return Err(transport_error(&name, "transport closed"));
        }
        self.dispatcher
            .open_stream(&name, params)
            .await
            .map_err(stasis_api::status::Status::into_error)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use stasis_agent::Agent;
    use stasis_agent::runtime::simulated::SimulatedRuntime;
    use stasis_agent::store::FsCheckpointStore;
    use stasis_common::config::AgentConfig;
    use stasis_common::error::ErrorKind;

    use super::*;

    fn transport(dir: &std::path::Path) -> LocalTransport {
        LocalTransport::new(Arc::new(Agent::new(
            AgentConfig::with_data_dir(dir),
            Arc::new(SimulatedRuntime::new()),
            Arc::new(FsCheckpointStore::new()),
        )))
    }

    #[tokio::test]
    async fn remote_errors_keep_their_kind() {
        let tmp = tempfile::tempdir().unwrap();
        let err = transport(tmp.path())
            .call(Method::State, json!({ "id": "c9" }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(matches!(err, StasisError::Remote { .. }));
    }

    #[tokio::test]
    async fn closed_transport_fails_calls() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = transport(tmp.path());
        transport.close();
        let err = transport
            .call(Method::GetServerVersion, json!({}))
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert!(
            transport
                .open_stream(Method::Events, json!({}))
                .await
                .unwrap_err()
                .is_transport()
        );
    }
}

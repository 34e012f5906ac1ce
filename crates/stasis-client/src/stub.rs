//! Client stub: the manager's [`ControlService`] implementation.
//!
//! Every call is encoded, handed to a [`Transport`], and its response
//! decoded. Agent errors pass through untouched. Transport failures are
//! retried only for idempotent reads.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use stasis_api::ControlService;
use stasis_api::frame::encode_message;
use stasis_api::messages::{
    AddProcessRequest, AddProcessResponse, CreateCheckpointRequest, CreateCheckpointResponse,
    CreateContainerRequest, CreateContainerResponse, DeleteCheckpointRequest,
    DeleteCheckpointResponse, EventsRequest, GetServerVersionRequest, GetServerVersionResponse,
    ListCheckpointRequest, ListCheckpointResponse, SignalRequest, SignalResponse, StateRequest,
    StateResponse, StatsRequest, StatsResponse, UpdateContainerRequest, UpdateContainerResponse,
    UpdateProcessRequest, UpdateProcessResponse,
};
use stasis_api::method::Method;
use stasis_api::stream::EventStream;
use stasis_common::config::ClientConfig;
use stasis_common::error::{Result, StasisError};
use stasis_transport::{Transport, UnixTransport};

/// Forwards control calls to an agent.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    read_retries: u32,
    retry_backoff: Duration,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("read_retries", &self.read_retries)
            .field("retry_backoff", &self.retry_backoff)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a stub over an existing transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        Self {
            transport,
            read_retries: config.read_retries,
            retry_backoff: config.retry_backoff(),
        }
    }

    /// Connects to the agent socket named in `config`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the agent is unreachable.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let transport = UnixTransport::connect(&config.socket_path, config.call_timeout()).await?;
        Ok(Self::new(Arc::new(transport), config))
    }

    async fn invoke<Req, Resp>(&self, method: Method, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let params = encode_message(request)?;
        let retries = if method.is_idempotent_read() {
            self.read_retries
        } else {
            0
        };

        let mut attempt = 0;
        let result = loop {
            match self.transport.call(method, params.clone()).await {
                Err(e) if e.is_transport() && attempt < retries => {
                    attempt += 1;
                    tracing::warn!(method = %method, attempt, error = %e, "retrying read");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                other => break other?,
            }
        };

        serde_json::from_value(result)
            .map_err(|e| StasisError::internal(format!("malformed {method} response: {e}")))
    }
}

#[async_trait]
impl ControlService for Client {
    async fn get_server_version(
        &self,
        request: GetServerVersionRequest,
    ) -> Result<GetServerVersionResponse> {
        self.invoke(Method::GetServerVersion, &request).await
    }

    async fn create_container(
        &self,
        request: CreateContainerRequest,
    ) -> Result<CreateContainerResponse> {
        self.invoke(Method::CreateContainer, &request).await
    }

    async fn update_container(
        &self,
        request: UpdateContainerRequest,
    ) -> Result<UpdateContainerResponse> {
        self.invoke(Method::UpdateContainer, &request).await
    }

    async fn signal(&self, request: SignalRequest) -> Result<SignalResponse> {
        self.invoke(Method::Signal, &request).await
    }

    async fn update_process(
        &self,
        request: UpdateProcessRequest,
    ) -> Result<UpdateProcessResponse> {
        self.invoke(Method::UpdateProcess, &request).await
    }

    async fn add_process(&self, request: AddProcessRequest) -> Result<AddProcessResponse> {
        self.invoke(Method::AddProcess, &request).await
    }

    async fn create_checkpoint(
        &self,
        request: CreateCheckpointRequest,
    ) -> Result<CreateCheckpointResponse> {
        self.invoke(Method::CreateCheckpoint, &request).await
    }

    async fn delete_checkpoint(
        &self,
        request: DeleteCheckpointRequest,
    ) -> Result<DeleteCheckpointResponse> {
        self.invoke(Method::DeleteCheckpoint, &request).await
    }

    async fn list_checkpoint(
        &self,
        request: ListCheckpointRequest,
    ) -> Result<ListCheckpointResponse> {
        self.invoke(Method::ListCheckpoint, &request).await
    }

    async fn state(&self, request: StateRequest) -> Result<StateResponse> {
        self.invoke(Method::State, &request).await
    }

    async fn stats(&self, request: StatsRequest) -> Result<StatsResponse> {
        self.invoke(Method::Stats, &request).await
    }

    async fn events(&self, request: EventsRequest) -> Result<EventStream> {
        self.transport
            .open_stream(Method::Events, encode_message(&request)?)
            .await
    }
}

//! The control service interface, one method per catalogue entry.
//!
//! The agent implements it against live container state; the client stub
//! implements it by forwarding each call over a transport.

use async_trait::async_trait;
use stasis_common::error::Result;

use crate::messages::{
    AddProcessRequest, AddProcessResponse, CreateCheckpointRequest, CreateCheckpointResponse,
    CreateContainerRequest, CreateContainerResponse, DeleteCheckpointRequest,
    DeleteCheckpointResponse, EventsRequest, GetServerVersionRequest, GetServerVersionResponse,
    ListCheckpointRequest, ListCheckpointResponse, SignalRequest, SignalResponse, StateRequest,
    StateResponse, StatsRequest, StatsResponse, UpdateContainerRequest, UpdateContainerResponse,
    UpdateProcessRequest, UpdateProcessResponse,
};
use crate::stream::EventStream;

/// Container-runtime control protocol.
#[async_trait]
pub trait ControlService: Send + Sync {
    /// Reports the protocol version.
    ///
    /// # Errors
    ///
    /// Fails only on transport errors.
    async fn get_server_version(
        &self,
        request: GetServerVersionRequest,
    ) -> Result<GetServerVersionResponse>;

    /// Creates and starts a container, or restores it from a checkpoint.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` for a taken handle, `InvalidArgument` for a
    /// malformed request, `NotFound` for a missing restore checkpoint.
    async fn create_container(
        &self,
        request: CreateContainerRequest,
    ) -> Result<CreateContainerResponse>;

    /// Overlays new resource limits on a running container.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown container, `InvalidState` if it is not running.
    async fn update_container(
        &self,
        request: UpdateContainerRequest,
    ) -> Result<UpdateContainerResponse>;

    /// Delivers a signal to a container process.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown container or process, `InvalidState`
    /// if the target has exited.
    async fn signal(&self, request: SignalRequest) -> Result<SignalResponse>;

    /// Resizes a process terminal or closes its stdin.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown container or process, `InvalidState`
    /// if the process has exited or has no terminal to resize.
    async fn update_process(&self, request: UpdateProcessRequest)
    -> Result<UpdateProcessResponse>;

    /// Execs an additional process inside a running container.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown container, `InvalidState` if it is not
    /// running, `AlreadyExists` for a taken process name.
    async fn add_process(&self, request: AddProcessRequest) -> Result<AddProcessResponse>;

    /// Snapshots a running container to a named checkpoint.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState`, `InvalidArgument`, or `AlreadyExists`.
    async fn create_checkpoint(
        &self,
        request: CreateCheckpointRequest,
    ) -> Result<CreateCheckpointResponse>;

    /// Removes a named checkpoint. Removing an absent checkpoint succeeds.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown container, `InvalidArgument` for a
    /// malformed identifier.
    async fn delete_checkpoint(
        &self,
        request: DeleteCheckpointRequest,
    ) -> Result<DeleteCheckpointResponse>;

    /// Enumerates the checkpoints of a container.
    ///
    /// # Errors
    ///
    /// `NotFound` only for an unknown container.
    async fn list_checkpoint(
        &self,
        request: ListCheckpointRequest,
    ) -> Result<ListCheckpointResponse>;

    /// Reports the lifecycle state of one or all containers.
    ///
    /// # Errors
    ///
    /// `NotFound` if an explicitly requested container is unknown.
    async fn state(&self, request: StateRequest) -> Result<StateResponse>;

    /// Reports resource usage counters of a running container.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown container, `InvalidState` if it is not running.
    async fn stats(&self, request: StatsRequest) -> Result<StatsResponse>;

    /// Subscribes to lifecycle and checkpoint events.
    ///
    /// A filter may name a container that does not exist yet.
    ///
    /// # Errors
    ///
    /// Fails when the subscription cannot be established.
    async fn events(&self, request: EventsRequest) -> Result<EventStream>;
}

//! Method catalogue of the control protocol.

use std::fmt;

use stasis_common::constants::API_SERVICE;

/// Every method the agent serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Capability/version negotiation.
    GetServerVersion,
    /// Instantiate and start (or restore) a container.
    CreateContainer,
    /// Mutate resource limits of a running container.
    UpdateContainer,
    /// Deliver a signal to a container process.
    Signal,
    /// Resize a terminal or close stdin of a process.
    UpdateProcess,
    /// Exec an additional process inside a running container.
    AddProcess,
    /// Snapshot a running container to a named checkpoint.
    CreateCheckpoint,
    /// Remove a named checkpoint.
    DeleteCheckpoint,
    /// Enumerate checkpoints of a container.
    ListCheckpoint,
    /// Query lifecycle state of one or all containers.
    State,
    /// Query resource usage of a container.
    Stats,
    /// Subscribe to lifecycle and checkpoint events (server-streaming).
    Events,
}

impl Method {
    /// The full catalogue, in declaration order.
    pub const ALL: [Self; 12] = [
        Self::GetServerVersion,
        Self::CreateContainer,
        Self::UpdateContainer,
        Self::Signal,
        Self::UpdateProcess,
        Self::AddProcess,
        Self::CreateCheckpoint,
        Self::DeleteCheckpoint,
        Self::ListCheckpoint,
        Self::State,
        Self::Stats,
        Self::Events,
    ];

    /// Returns the method name without its service namespace.
    #[must_use]
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::GetServerVersion => "GetServerVersion",
            Self::CreateContainer => "CreateContainer",
            Self::UpdateContainer => "UpdateContainer",
            Self::Signal => "Signal",
            Self::UpdateProcess => "UpdateProcess",
            Self::AddProcess => "AddProcess",
            Self::CreateCheckpoint => "CreateCheckpoint",
            Self::DeleteCheckpoint => "DeleteCheckpoint",
            Self::ListCheckpoint => "ListCheckpoint",
            Self::State => "State",
            Self::Stats => "Stats",
            Self::Events => "Events",
        }
    }

    /// Returns the namespaced wire name, e.g. `types.API.State`.
    #[must_use]
    pub fn full_name(self) -> String {
        format!("{API_SERVICE}.{}", self.short_name())
    }

    /// Resolves a namespaced wire name.
    #[must_use]
    pub fn from_full_name(name: &str) -> Option<Self> {
        let short = name.strip_prefix(API_SERVICE)?.strip_prefix('.')?;
        Self::ALL.into_iter().find(|m| m.short_name() == short)
    }

    /// Returns whether the method pushes a stream of messages.
    #[must_use]
    pub const fn is_streaming(self) -> bool {
        matches!(self, Self::Events)
    }

    /// Returns whether the call has no side effects and may be retried
    /// after a transport failure.
    #[must_use]
    pub const fn is_idempotent_read(self) -> bool {
        matches!(
            self,
            Self::GetServerVersion | Self::State | Self::Stats | Self::ListCheckpoint
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{API_SERVICE}.{}", self.short_name())
    }
}

//! Request and response messages, one pair per catalogue method.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stasis_common::constants::INIT_PROCESS;
use stasis_common::types::{ContainerId, ContainerState, ResourceLimits};

fn init_process() -> String {
    INIT_PROCESS.to_string()
}

/// Description of a process to start inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSpec {
    /// Executable and arguments.
    pub args: Vec<String>,
    /// Environment entries in `KEY=value` form.
    pub env: Vec<String>,
    /// Working directory; relative paths resolve against the bundle.
    pub cwd: Option<PathBuf>,
    /// Whether the process runs attached to a terminal.
    pub terminal: bool,
    /// Whether stdin stays open as a pipe until closed by `UpdateProcess`.
    pub open_stdin: bool,
    /// File receiving standard output.
    pub stdout: Option<PathBuf>,
    /// File receiving standard error.
    pub stderr: Option<PathBuf>,
}

/// `GetServerVersion` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetServerVersionRequest {}

/// `GetServerVersion` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetServerVersionResponse {
    /// Protocol major version.
    pub major: u32,
    /// Protocol minor version.
    pub minor: u32,
    /// Protocol patch version.
    pub patch: u32,
    /// Agent build identifier.
    pub revision: String,
}

/// `CreateContainer` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateContainerRequest {
    /// Handle for the new container.
    pub id: ContainerId,
    /// Bundle directory the container runs from.
    pub bundle_path: PathBuf,
    /// Init process.
    pub process: ProcessSpec,
    /// Free-form labels echoed back by `State`.
    pub labels: BTreeMap<String, String>,
    /// Initial resource limits.
    pub resources: ResourceLimits,
    /// Checkpoint to restore from instead of starting fresh.
    pub checkpoint: Option<String>,
    /// Storage location of `checkpoint`; defaults to the container's root.
    pub checkpoint_dir: Option<PathBuf>,
}

/// `CreateContainer` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContainerResponse {
    /// State of the container right after it started.
    pub container: ContainerSnapshot,
}

/// `UpdateContainer` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateContainerRequest {
    /// Target container.
    pub id: ContainerId,
    /// Limits to overlay on the current ones.
    pub resources: ResourceLimits,
}

/// `UpdateContainer` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateContainerResponse {}

/// `Signal` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRequest {
    /// Target container.
    pub id: ContainerId,
    /// Process name inside the container.
    #[serde(default = "init_process")]
    pub pid: String,
    /// Signal number.
    pub signal: i32,
}

impl SignalRequest {
    /// Targets the container's init process.
    #[must_use]
    pub fn init(id: impl Into<ContainerId>, signal: i32) -> Self {
        Self {
            id: id.into(),
            pid: init_process(),
            signal,
        }
    }
}

/// `Signal` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalResponse {}

/// `UpdateProcess` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateProcessRequest {
    /// Target container.
    pub id: ContainerId,
    /// Process name inside the container.
    #[serde(default = "init_process")]
    pub pid: String,
    /// Close the process's stdin pipe.
    #[serde(default)]
    pub close_stdin: bool,
    /// New terminal width; zero leaves the size unchanged.
    #[serde(default)]
    pub width: u32,
    /// New terminal height; zero leaves the size unchanged.
    #[serde(default)]
    pub height: u32,
}

impl UpdateProcessRequest {
    /// Returns whether the request asks for a terminal resize.
    #[must_use]
    pub const fn is_resize(&self) -> bool {
        self.width > 0 || self.height > 0
    }
}

/// `UpdateProcess` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProcessResponse {}

/// `AddProcess` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddProcessRequest {
    /// Target container.
    pub id: ContainerId,
    /// Name of the new process, unique within the container.
    pub pid: String,
    /// Process to exec.
    pub process: ProcessSpec,
}

/// `AddProcess` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddProcessResponse {
    /// Host PID of the new process.
    pub system_pid: u32,
}

/// Flags controlling how a checkpoint is taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointOptions {
    /// Stop the container after the snapshot.
    pub exit: bool,
    /// Allow established TCP connections.
    pub tcp: bool,
    /// Allow external unix sockets.
    pub unix_sockets: bool,
    /// Allow shell jobs.
    pub shell: bool,
}

/// Payload returned by a successful `CreateCheckpoint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointStat {
    /// Checkpoint identifier.
    pub name: String,
    /// When the snapshot completed.
    pub created_at: DateTime<Utc>,
    /// Bytes written for the snapshot images.
    pub size_bytes: u64,
    /// Wall time spent taking the snapshot.
    pub duration_ms: u64,
}

/// Descriptor of a previously created checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Checkpoint identifier.
    pub name: String,
    /// Container the checkpoint was taken from.
    pub container: ContainerId,
    /// Storage location the checkpoint lives under.
    pub location: PathBuf,
    /// Flags the checkpoint was taken with.
    pub options: CheckpointOptions,
    /// Payload returned when the checkpoint was created.
    pub stat: CheckpointStat,
}

/// `CreateCheckpoint` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateCheckpointRequest {
    /// Target container.
    pub id: ContainerId,
    /// Checkpoint identifier.
    pub name: String,
    /// Snapshot flags.
    pub options: CheckpointOptions,
    /// Storage location; defaults to the container's root.
    pub checkpoint_dir: Option<PathBuf>,
}

/// `CreateCheckpoint` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCheckpointResponse {
    /// Stat of the new checkpoint.
    pub stat: CheckpointStat,
}

/// `DeleteCheckpoint` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteCheckpointRequest {
    /// Target container.
    pub id: ContainerId,
    /// Checkpoint identifier.
    pub name: String,
    /// Storage location; defaults to the container's root.
    pub checkpoint_dir: Option<PathBuf>,
}

/// `DeleteCheckpoint` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteCheckpointResponse {}

/// `ListCheckpoint` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListCheckpointRequest {
    /// Target container.
    pub id: ContainerId,
    /// Storage location; defaults to the container's root.
    pub checkpoint_dir: Option<PathBuf>,
}

/// `ListCheckpoint` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListCheckpointResponse {
    /// Checkpoints ordered by creation time, then name.
    pub checkpoints: Vec<CheckpointRecord>,
}

/// Point-in-time view of a process inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    /// Process name inside the container.
    pub pid: String,
    /// Host PID.
    pub system_pid: u32,
    /// Executable and arguments.
    pub args: Vec<String>,
    /// Whether the process has a terminal.
    pub terminal: bool,
    /// Exit status once the process has exited.
    pub exit_status: Option<i32>,
}

/// Point-in-time view of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    /// Container handle.
    pub id: ContainerId,
    /// Bundle directory.
    pub bundle_path: PathBuf,
    /// Lifecycle state.
    pub state: ContainerState,
    /// Host PID of the init process while it runs.
    pub pid: Option<u32>,
    /// Known processes, init first.
    pub processes: Vec<ProcessSnapshot>,
    /// Labels supplied at creation.
    pub labels: BTreeMap<String, String>,
    /// Current resource limits.
    pub resources: ResourceLimits,
    /// Checkpoint the container was restored from.
    pub restored_from: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Host information returned by `State`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInfo {
    /// Available CPUs.
    pub cpus: u32,
}

/// `State` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateRequest {
    /// Restrict the result to one container.
    pub id: Option<ContainerId>,
}

/// `State` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateResponse {
    /// Matching containers, ordered by handle.
    pub containers: Vec<ContainerSnapshot>,
    /// Host information.
    pub machine: MachineInfo,
}

/// `Stats` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsRequest {
    /// Target container.
    pub id: ContainerId,
}

/// `Stats` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    /// Container the counters belong to.
    pub id: ContainerId,
    /// CPU time consumed by running processes, in nanoseconds.
    pub cpu_usage_ns: u64,
    /// Resident memory of running processes, in bytes.
    pub memory_usage_bytes: u64,
    /// Number of running processes.
    pub processes: u32,
    /// When the counters were sampled.
    pub timestamp: DateTime<Utc>,
}

/// `Events` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsRequest {
    /// Only deliver events for this container.
    pub id: Option<ContainerId>,
    /// Replay retained events with a timestamp at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

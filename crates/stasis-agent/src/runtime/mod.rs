//! Runtime backend abstraction.
//!
//! The agent never touches processes directly: spawning, signalling,
//! dumping, and restoring all go through a [`Runtime`]. Two backends
//! exist, selected by [`RuntimeKind`]:
//!
//! - [`native::NativeRuntime`]: host processes, `criu` checkpoints,
//!   cgroup v2 limits.
//! - [`simulated::SimulatedRuntime`]: an in-memory process model.

pub mod native;
pub mod simulated;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use stasis_api::messages::{CheckpointOptions, ProcessSpec};
use stasis_common::config::{AgentConfig, RuntimeKind};
use stasis_common::error::Result;
use stasis_common::types::{ContainerId, ResourceLimits};
use tokio::io::AsyncWrite;
use tokio::sync::watch;

use crate::metrics::ProcessUsage;

/// Exit status reported when a process's exit code cannot be observed.
pub const UNKNOWN_EXIT_STATUS: i32 = -1;

/// Exit status of a tree killed after a dump (`128 + SIGKILL`).
pub const DUMPED_EXIT_STATUS: i32 = 128 + 9;

/// Write end of a process's standard input.
pub struct StdinPipe(Box<dyn AsyncWrite + Send + Sync + Unpin>);

impl StdinPipe {
    /// Wraps any async writer.
    pub fn new(writer: impl AsyncWrite + Send + Sync + Unpin + 'static) -> Self {
        Self(Box::new(writer))
    }

    /// Flushes and closes the pipe, delivering EOF to the process.
    pub async fn close(mut self) {
        use tokio::io::AsyncWriteExt;
        if let Err(e) = self.0.shutdown().await {
            tracing::debug!(error = %e, "stdin already closed");
        }
    }
}

impl fmt::Debug for StdinPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StdinPipe")
    }
}

/// Creates the channel a runtime reports one process's exit through.
#[must_use]
pub fn exit_channel() -> (ExitNotifier, ExitWatch) {
    let (tx, rx) = watch::channel(None);
    (ExitNotifier(tx), ExitWatch(rx))
}

/// Reporting half of an exit channel, owned by whatever reaps the process.
///
/// Dropping it without calling [`notify`](Self::notify) means the status
/// could not be observed.
#[derive(Debug)]
pub struct ExitNotifier(watch::Sender<Option<i32>>);

impl ExitNotifier {
    /// Publishes the exit status.
    pub fn notify(self, status: i32) {
        let _ = self.0.send_replace(Some(status));
    }
}

/// Observing half of an exit channel. Clones share the same status.
#[derive(Debug, Clone)]
pub struct ExitWatch(watch::Receiver<Option<i32>>);

impl ExitWatch {
    /// The exit status, if the runtime has already reported one.
    #[must_use]
    pub fn status(&self) -> Option<i32> {
        let reported = *self.0.borrow();
        reported.or_else(|| self.0.has_changed().is_err().then_some(UNKNOWN_EXIT_STATUS))
    }

    /// Waits until the process exits and returns its status.
    pub async fn wait(mut self) -> i32 {
        let reported = match self.0.wait_for(Option::is_some).await {
            Ok(status) => *status,
            Err(_) => None,
        };
        reported.unwrap_or(UNKNOWN_EXIT_STATUS)
    }
}

/// A process started by a runtime.
#[derive(Debug)]
pub struct SpawnedProcess {
    /// Host PID.
    pub system_pid: u32,
    /// Reports the exit status once the process terminates.
    pub exit: ExitWatch,
    /// Stdin pipe, present when the process asked for an open stdin.
    pub stdin: Option<StdinPipe>,
}

/// Platform backend that owns the actual processes.
///
/// Implementors must be cheap to share: the agent holds one instance
/// behind an `Arc` and calls it concurrently for different containers.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Starts a process for `container` inside `bundle`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started.
    async fn spawn(
        &self,
        container: &ContainerId,
        bundle: &Path,
        process: &ProcessSpec,
    ) -> Result<SpawnedProcess>;

    /// Dumps the process tree rooted at `system_pid` into `images_dir`.
    ///
    /// With `options.exit` the tree is terminated after the dump. The exit
    /// is reported through the original [`SpawnedProcess::exit`], which
    /// may lag behind the return of this call.
    ///
    /// # Errors
    ///
    /// Returns an error if the dump fails; `images_dir` may then hold
    /// partial output.
    async fn checkpoint(
        &self,
        container: &ContainerId,
        system_pid: u32,
        images_dir: &Path,
        options: &CheckpointOptions,
    ) -> Result<()>;

    /// Recreates a process tree from a dump in `images_dir`, taken with
    /// `options`.
    ///
    /// # Errors
    ///
    /// Returns an error if the dump is unusable or the restore fails.
    async fn restore(
        &self,
        container: &ContainerId,
        bundle: &Path,
        images_dir: &Path,
        options: &CheckpointOptions,
    ) -> Result<SpawnedProcess>;

    /// Delivers `signal` to a process.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal is unsupported or delivery fails,
    /// `InvalidState` when the process is already gone.
    fn signal(&self, system_pid: u32, signal: i32) -> Result<()>;

    /// Resizes the terminal attached to a process.
    ///
    /// # Errors
    ///
    /// Returns an error if the process has no terminal on this backend.
    fn resize(&self, system_pid: u32, width: u32, height: u32) -> Result<()>;

    /// Samples resource usage of one process.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be inspected.
    fn usage(&self, system_pid: u32) -> Result<ProcessUsage>;

    /// Applies the full effective limits of `container`.
    ///
    /// # Errors
    ///
    /// Returns an error if the limits cannot be written.
    fn update_resources(&self, container: &ContainerId, limits: &ResourceLimits) -> Result<()>;
}

/// Builds the backend selected by `config`.
#[must_use]
pub fn from_config(config: &AgentConfig) -> Arc<dyn Runtime> {
    match config.runtime {
        RuntimeKind::Native => Arc::new(native::NativeRuntime::new(
            config.criu_path.clone(),
            config.cgroup_root.clone(),
        )),
        RuntimeKind::Simulated => Arc::new(simulated::SimulatedRuntime::new()),
    }
}

//! In-memory runtime used where real processes are unavailable.
//!
//! Processes are entries in a table with synthetic PIDs. A checkpoint
//! writes a small JSON process image into the images directory and a
//! restore reads it back, so the on-disk checkpoint lifecycle is the same
//! as with the native backend. Exits happen when a terminating signal is
//! delivered, a checkpoint is taken with `exit`, or a caller invokes
//! [`SimulatedRuntime::exit`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stasis_api::messages::{CheckpointOptions, ProcessSpec};
use stasis_common::error::{Result, StasisError};
use stasis_common::types::{ContainerId, ResourceLimits};

use super::{DUMPED_EXIT_STATUS, ExitNotifier, Runtime, SpawnedProcess, StdinPipe, exit_channel};
use crate::metrics::ProcessUsage;

/// File holding the process image inside a checkpoint.
pub const PROCESS_IMAGE_FILE: &str = "process-image.json";

const FIRST_PID: u32 = 1000;
const RESIDENT_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct ProcessImage {
    container: ContainerId,
    args: Vec<String>,
    terminal: bool,
}

#[derive(Debug)]
struct SimProcess {
    container: ContainerId,
    args: Vec<String>,
    terminal: bool,
    started: Instant,
    size: Option<(u32, u32)>,
    exit: Option<ExitNotifier>,
}

#[derive(Debug, Default)]
struct SimState {
    processes: HashMap<u32, SimProcess>,
    limits: HashMap<ContainerId, ResourceLimits>,
    signals: Vec<(u32, i32)>,
    fail_next_checkpoint: bool,
}

/// Runtime backed by an in-memory process table.
#[derive(Debug)]
pub struct SimulatedRuntime {
    state: Mutex<SimState>,
    next_pid: AtomicU32,
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRuntime {
    /// Creates an empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            next_pid: AtomicU32::new(FIRST_PID),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(&self, container: &ContainerId, args: Vec<String>, terminal: bool) -> SpawnedProcess {
        let system_pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let (notifier, exit) = exit_channel();
        let _ = self.state().processes.insert(
            system_pid,
            SimProcess {
                container: container.clone(),
                args,
                terminal,
                started: Instant::now(),
                size: None,
                exit: Some(notifier),
            },
        );
        SpawnedProcess {
            system_pid,
            exit,
            stdin: None,
        }
    }

    /// Terminates a process with `status`. Returns whether it was alive.
    pub fn exit(&self, system_pid: u32, status: i32) -> bool {
        let Some(mut process) = self.state().processes.remove(&system_pid) else {
            return false;
        };
        tracing::debug!(id = %process.container, pid = system_pid, status, "simulated exit");
        if let Some(notifier) = process.exit.take() {
            notifier.notify(status);
        }
        true
    }

    /// Returns whether a process is alive.
    pub fn is_running(&self, system_pid: u32) -> bool {
        self.state().processes.contains_key(&system_pid)
    }

    /// Makes the next checkpoint fail after writing partial output.
    pub fn fail_next_checkpoint(&self) {
        self.state().fail_next_checkpoint = true;
    }

    /// Returns the limits last applied to `container`.
    pub fn limits(&self, container: &ContainerId) -> Option<ResourceLimits> {
        self.state().limits.get(container).cloned()
    }

    /// Returns every `(pid, signal)` delivered so far.
    pub fn delivered_signals(&self) -> Vec<(u32, i32)> {
        self.state().signals.clone()
    }

    /// Returns the terminal size last set on a process.
    pub fn terminal_size(&self, system_pid: u32) -> Option<(u32, u32)> {
        self.state()
            .processes
            .get(&system_pid)
            .and_then(|process| process.size)
    }
}

fn no_such_process(system_pid: u32) -> StasisError {
    StasisError::invalid_state(system_pid.to_string(), "no such process")
}

const fn is_terminating(signal: i32) -> bool {
    // SIGHUP, SIGINT, SIGQUIT, SIGKILL, SIGTERM
    matches!(signal, 1 | 2 | 3 | 9 | 15)
}

#[async_trait]
impl Runtime for SimulatedRuntime {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn spawn(
        &self,
        container: &ContainerId,
        _bundle: &Path,
        process: &ProcessSpec,
    ) -> Result<SpawnedProcess> {
        if process.args.is_empty() {
            return Err(StasisError::invalid_argument("process args must not be empty"));
        }
        let mut spawned = self.start(container, process.args.clone(), process.terminal);
        if process.open_stdin {
            spawned.stdin = Some(StdinPipe::new(tokio::io::sink()));
        }
        tracing::debug!(id = %container, pid = spawned.system_pid, "simulated spawn");
        Ok(spawned)
    }

    async fn checkpoint(
        &self,
        container: &ContainerId,
        system_pid: u32,
        images_dir: &Path,
        options: &CheckpointOptions,
    ) -> Result<()> {
        let (image, inject_failure) = {
            let mut state = self.state();
            let inject_failure = std::mem::take(&mut state.fail_next_checkpoint);
            let process = state
                .processes
                .get(&system_pid)
                .ok_or_else(|| no_such_process(system_pid))?;
            let image = ProcessImage {
                container: container.clone(),
                args: process.args.clone(),
                terminal: process.terminal,
            };
            (image, inject_failure)
        };

        let path = images_dir.join(PROCESS_IMAGE_FILE);
        std::fs::write(&path, serde_json::to_vec_pretty(&image)?)
            .map_err(|e| StasisError::Io { path, source: e })?;
        if inject_failure {
            return Err(StasisError::internal(format!(
                "dump of {system_pid} failed midway"
            )));
        }

        if options.exit {
            let _ = self.exit(system_pid, DUMPED_EXIT_STATUS);
        }
        Ok(())
    }

    async fn restore(
        &self,
        container: &ContainerId,
        _bundle: &Path,
        images_dir: &Path,
        _options: &CheckpointOptions,
    ) -> Result<SpawnedProcess> {
        let path = images_dir.join(PROCESS_IMAGE_FILE);
        let content = std::fs::read(&path).map_err(|e| StasisError::Io {
            path: path.clone(),
            source: e,
        })?;
        let image: ProcessImage = serde_json::from_slice(&content)?;
        let spawned = self.start(container, image.args, image.terminal);
        tracing::debug!(id = %container, pid = spawned.system_pid, from = %image.container, "simulated restore");
        Ok(spawned)
    }

    fn signal(&self, system_pid: u32, signal: i32) -> Result<()> {
        {
            let mut state = self.state();
            if !state.processes.contains_key(&system_pid) {
                return Err(no_such_process(system_pid));
            }
            state.signals.push((system_pid, signal));
        }
        if is_terminating(signal) {
            let _ = self.exit(system_pid, 128 + signal);
        }
        Ok(())
    }

    fn resize(&self, system_pid: u32, width: u32, height: u32) -> Result<()> {
        let mut state = self.state();
        let process = state
            .processes
            .get_mut(&system_pid)
            .ok_or_else(|| no_such_process(system_pid))?;
        if !process.terminal {
            return Err(StasisError::internal(format!(
                "process {system_pid} has no terminal"
            )));
        }
        process.size = Some((width, height));
        Ok(())
    }

    fn usage(&self, system_pid: u32) -> Result<ProcessUsage> {
        let state = self.state();
        let process = state
            .processes
            .get(&system_pid)
            .ok_or_else(|| no_such_process(system_pid))?;
        let cpu_ns = u64::try_from(process.started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        Ok(ProcessUsage {
            cpu_ns,
            memory_bytes: RESIDENT_BYTES,
        })
    }

    fn update_resources(&self, container: &ContainerId, limits: &ResourceLimits) -> Result<()> {
        let _ = self
            .state()
            .limits
            .insert(container.clone(), limits.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(args: &[&str]) -> ProcessSpec {
        ProcessSpec {
            args: args.iter().map(ToString::to_string).collect(),
            ..ProcessSpec::default()
        }
    }

    #[tokio::test]
    async fn terminating_signal_resolves_exit() {
        let runtime = SimulatedRuntime::new();
        let id = ContainerId::new("c1");
        let spawned = runtime.spawn(&id, Path::new("/b"), &spec(&["sleep"])).await.unwrap();
        runtime.signal(spawned.system_pid, 15).unwrap();
        assert_eq!(spawned.exit.status(), Some(143));
        assert!(!runtime.is_running(spawned.system_pid));

        let err = runtime.signal(spawned.system_pid, 15).unwrap_err();
        assert_eq!(err.kind(), stasis_common::error::ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn non_terminating_signal_is_recorded() {
        let runtime = SimulatedRuntime::new();
        let id = ContainerId::new("c1");
        let spawned = runtime.spawn(&id, Path::new("/b"), &spec(&["sleep"])).await.unwrap();
        runtime.signal(spawned.system_pid, 10).unwrap();
        assert!(runtime.is_running(spawned.system_pid));
        assert_eq!(runtime.delivered_signals(), vec![(spawned.system_pid, 10)]);
    }

    #[tokio::test]
    async fn checkpoint_then_restore_recreates_process() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = SimulatedRuntime::new();
        let id = ContainerId::new("c1");
        let spawned = runtime
            .spawn(&id, Path::new("/b"), &spec(&["server", "--port", "80"]))
            .await
            .unwrap();
        runtime
            .checkpoint(&id, spawned.system_pid, tmp.path(), &CheckpointOptions::default())
            .await
            .unwrap();
        assert!(runtime.is_running(spawned.system_pid));

        let restored = runtime
            .restore(&id, Path::new("/b"), tmp.path(), &CheckpointOptions::default())
            .await
            .unwrap();
        assert_ne!(restored.system_pid, spawned.system_pid);
        assert!(runtime.is_running(restored.system_pid));
    }

    #[tokio::test]
    async fn checkpoint_with_exit_stops_process() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = SimulatedRuntime::new();
        let id = ContainerId::new("c1");
        let spawned = runtime.spawn(&id, Path::new("/b"), &spec(&["sleep"])).await.unwrap();
        let options = CheckpointOptions {
            exit: true,
            ..CheckpointOptions::default()
        };
        runtime
            .checkpoint(&id, spawned.system_pid, tmp.path(), &options)
            .await
            .unwrap();
        assert_eq!(spawned.exit.status(), Some(DUMPED_EXIT_STATUS));
    }

    #[tokio::test]
    async fn injected_failure_leaves_partial_output() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = SimulatedRuntime::new();
        let id = ContainerId::new("c1");
        let spawned = runtime.spawn(&id, Path::new("/b"), &spec(&["sleep"])).await.unwrap();
        runtime.fail_next_checkpoint();
        assert!(
            runtime
                .checkpoint(&id, spawned.system_pid, tmp.path(), &CheckpointOptions::default())
                .await
                .is_err()
        );
        assert!(tmp.path().join(PROCESS_IMAGE_FILE).exists());
    }

    #[tokio::test]
    async fn resize_requires_terminal() {
        let runtime = SimulatedRuntime::new();
        let id = ContainerId::new("c1");
        let plain = runtime.spawn(&id, Path::new("/b"), &spec(&["sh"])).await.unwrap();
        assert!(runtime.resize(plain.system_pid, 80, 24).is_err());

        let mut tty = spec(&["sh"]);
        tty.terminal = true;
        let tty = runtime.spawn(&id, Path::new("/b"), &tty).await.unwrap();
        runtime.resize(tty.system_pid, 120, 40).unwrap();
        assert_eq!(runtime.terminal_size(tty.system_pid), Some((120, 40)));
    }
}

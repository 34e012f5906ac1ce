//! Per-container bookkeeping held by the agent.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use stasis_api::messages::{ContainerSnapshot, ProcessSnapshot, ProcessSpec};
use stasis_common::constants::INIT_PROCESS;
use stasis_common::error::{Result, StasisError};
use stasis_common::types::{ContainerId, ContainerState, ResourceLimits};
use tokio::sync::{Mutex, MutexGuard};

use crate::runtime::{ExitWatch, StdinPipe, UNKNOWN_EXIT_STATUS};

/// A process tracked inside a container.
#[derive(Debug)]
pub struct ProcessEntry {
    /// Caller-chosen process name; the init process is `init`.
    pub name: String,
    /// Host PID.
    pub system_pid: u32,
    /// How the process was started.
    pub spec: ProcessSpec,
    /// Exit status once the process has exited.
    pub exit_status: Option<i32>,
    /// Open stdin pipe, until closed.
    pub stdin: Option<StdinPipe>,
    /// Exit as reported by the runtime, possibly not yet recorded.
    pub exit: ExitWatch,
}

impl ProcessEntry {
    /// Returns whether the process is still running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.exit_status.is_none()
    }

    fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot {
            pid: self.name.clone(),
            system_pid: self.system_pid,
            args: self.spec.args.clone(),
            terminal: self.spec.terminal,
            exit_status: self.exit_status,
        }
    }
}

/// Mutable state of one container.
#[derive(Debug)]
pub struct ContainerRecord {
    /// Container handle.
    pub id: ContainerId,
    /// Bundle directory the container runs from.
    pub bundle_path: PathBuf,
    /// Lifecycle state.
    pub state: ContainerState,
    /// Free-form labels.
    pub labels: BTreeMap<String, String>,
    /// Effective resource limits.
    pub resources: ResourceLimits,
    /// Processes in start order; the init process comes first.
    pub processes: Vec<ProcessEntry>,
    /// Checkpoint the container was restored from.
    pub restored_from: Option<String>,
    /// When the container was created.
    pub created_at: DateTime<Utc>,
}

impl ContainerRecord {
    /// Creates a record in the `Created` state with no processes.
    #[must_use]
    pub fn new(
        id: ContainerId,
        bundle_path: PathBuf,
        labels: BTreeMap<String, String>,
        resources: ResourceLimits,
    ) -> Self {
        Self {
            id,
            bundle_path,
            state: ContainerState::Created,
            labels,
            resources,
            processes: Vec::new(),
            restored_from: None,
            created_at: Utc::now(),
        }
    }

    /// Returns a wire snapshot of the record.
    #[must_use]
    pub fn snapshot(&self) -> ContainerSnapshot {
        ContainerSnapshot {
            id: self.id.clone(),
            bundle_path: self.bundle_path.clone(),
            state: self.state,
            pid: self.init().map(|init| init.system_pid),
            processes: self.processes.iter().map(ProcessEntry::snapshot).collect(),
            labels: self.labels.clone(),
            resources: self.resources.clone(),
            restored_from: self.restored_from.clone(),
            created_at: self.created_at,
        }
    }

    /// The init process, once started.
    #[must_use]
    pub fn init(&self) -> Option<&ProcessEntry> {
        self.process(INIT_PROCESS)
    }

    /// Looks a process up by name.
    #[must_use]
    pub fn process(&self, name: &str) -> Option<&ProcessEntry> {
        self.processes.iter().find(|p| p.name == name)
    }

    /// Looks a process up by name for mutation.
    pub fn process_mut(&mut self, name: &str) -> Option<&mut ProcessEntry> {
        self.processes.iter_mut().find(|p| p.name == name)
    }

    /// Fails unless the container is running.
    ///
    /// # Errors
    ///
    /// Returns [`StasisError::InvalidState`] naming the current state.
    pub fn ensure_running(&self) -> Result<()> {
        if self.state == ContainerState::Running {
            Ok(())
        } else {
            Err(StasisError::invalid_state(
                self.id.as_str(),
                format!("container is {}, not running", self.state),
            ))
        }
    }

    /// Looks up a live process.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown name, `InvalidState` if it has exited.
    pub fn running_process(&self, name: &str) -> Result<&ProcessEntry> {
        let process = self.process(name).ok_or_else(|| StasisError::NotFound {
            kind: "process",
            id: format!("{}/{name}", self.id),
        })?;
        if !process.is_running() {
            return Err(StasisError::invalid_state(
                self.id.as_str(),
                format!("process {name} has exited"),
            ));
        }
        Ok(process)
    }

    /// Records the exit of `name` with `status`.
    ///
    /// When the init process exits the container stops and every other
    /// live process is marked exited too. Returns the `(name, status)`
    /// pairs that changed, empty if `name` had already exited.
    pub fn mark_exited(&mut self, name: &str, status: i32) -> Vec<(String, i32)> {
        let Some(process) = self.process_mut(name) else {
            return Vec::new();
        };
        if !process.is_running() {
            return Vec::new();
        }
        process.exit_status = Some(status);
        process.stdin = None;
        let mut exited = vec![(name.to_string(), status)];

        if name == INIT_PROCESS {
            self.state = ContainerState::Stopped;
            for other in self.processes.iter_mut().filter(|p| p.is_running()) {
                other.exit_status = Some(UNKNOWN_EXIT_STATUS);
                other.stdin = None;
                exited.push((other.name.clone(), UNKNOWN_EXIT_STATUS));
            }
        }
        exited
    }

    /// Records every exit the runtime has reported but the record does
    /// not show yet. Side processes are recorded before init, so they keep
    /// their own status. Returns the `(name, status)` pairs that changed.
    pub fn reap_exited(&mut self) -> Vec<(String, i32)> {
        let mut reported: Vec<(String, i32)> = self
            .processes
            .iter()
            .filter(|p| p.is_running())
            .filter_map(|p| p.exit.status().map(|status| (p.name.clone(), status)))
            .collect();
        reported.sort_by_key(|(name, _)| name == INIT_PROCESS);
        reported
            .into_iter()
            .flat_map(|(name, status)| self.mark_exited(&name, status))
            .collect()
    }
}

/// A container slot: its record plus the lock serializing mutations.
///
/// `op_lock` is held across the whole of a mutating call, including
/// runtime awaits. The record lock is only held for short synchronous
/// sections, so reads never wait for a slow operation.
#[derive(Debug)]
pub struct ContainerSlot {
    /// Container handle.
    pub id: ContainerId,
    op_lock: Mutex<()>,
    record: RwLock<ContainerRecord>,
}

impl ContainerSlot {
    /// Wraps a fresh record.
    #[must_use]
    pub fn new(record: ContainerRecord) -> Self {
        Self {
            id: record.id.clone(),
            op_lock: Mutex::new(()),
            record: RwLock::new(record),
        }
    }

    /// Acquires the operation lock.
    pub async fn lock_ops(&self) -> MutexGuard<'_, ()> {
        self.op_lock.lock().await
    }

    /// Runs `f` with shared access to the record.
    pub fn read<R>(&self, f: impl FnOnce(&ContainerRecord) -> R) -> R {
        let record = self.record.read().unwrap_or_else(PoisonError::into_inner);
        f(&record)
    }

    /// Runs `f` with exclusive access to the record.
    pub fn write<R>(&self, f: impl FnOnce(&mut ContainerRecord) -> R) -> R {
        let mut record = self.record.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut record)
    }
}

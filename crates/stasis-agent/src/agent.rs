//! The agent: [`ControlService`] implemented against live containers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use stasis_api::ControlService;
use stasis_api::event::{EventKind, EventMessage};
use stasis_api::messages::{
    AddProcessRequest, AddProcessResponse, CheckpointRecord, CheckpointStat,
    ContainerSnapshot, CreateCheckpointRequest, CreateCheckpointResponse, CreateContainerRequest,
    CreateContainerResponse, DeleteCheckpointRequest, DeleteCheckpointResponse, EventsRequest,
    GetServerVersionRequest, GetServerVersionResponse, ListCheckpointRequest,
    ListCheckpointResponse, MachineInfo, SignalRequest, SignalResponse, StateRequest,
    StateResponse, StatsRequest, StatsResponse, UpdateContainerRequest, UpdateContainerResponse,
    UpdateProcessRequest, UpdateProcessResponse,
};
use stasis_api::stream::EventStream;
use stasis_common::config::AgentConfig;
use stasis_common::constants::{
    API_VERSION_MAJOR, API_VERSION_MINOR, API_VERSION_PATCH, INIT_PROCESS, MAX_SIGNAL,
};
use stasis_common::error::{Result, StasisError};
use stasis_common::types::{
    CheckpointId, ContainerId, ContainerState, RESTRICTED_NAME_CHARS, is_restricted_name,
};

use crate::container::{ContainerRecord, ContainerSlot, ProcessEntry};
use crate::events::EventHub;
use crate::metrics::ProcessUsage;
use crate::runtime::{self, DUMPED_EXIT_STATUS, ExitWatch, Runtime};
use crate::store::{self, CheckpointStore, FsCheckpointStore};

const SIGKILL: i32 = 9;

/// Container-runtime agent serving the control protocol.
///
/// Mutating calls on one container hold that container's operation lock
/// for their whole duration, so two concurrent `CreateCheckpoint` calls
/// with the same name resolve to one success and one `AlreadyExists`.
/// `State`, `Stats`, and `ListCheckpoint` never take the lock.
///
/// Exits the runtime has already reported are recorded under the lock at
/// the start and end of every mutating call, so a call that kills a
/// process returns with the exit visible and its own event published
/// ahead of the `exit` event.
pub struct Agent {
    config: AgentConfig,
    runtime: Arc<dyn Runtime>,
    store: Arc<dyn CheckpointStore>,
    containers: RwLock<HashMap<ContainerId, Arc<ContainerSlot>>>,
    events: Arc<EventHub>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("data_dir", &self.config.data_dir)
            .field("runtime", &self.runtime.name())
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Creates an agent over explicit backends.
    #[must_use]
    pub fn new(
        config: AgentConfig,
        runtime: Arc<dyn Runtime>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        let events = EventHub::new(config.event_buffer, config.event_history);
        tracing::info!(runtime = runtime.name(), data_dir = %config.data_dir.display(), "agent initialized");
        Self {
            config,
            runtime,
            store,
            containers: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Creates an agent with the runtime selected by `config` and the
    /// filesystem checkpoint store.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the data
    /// directory cannot be created.
    pub fn from_config(config: AgentConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir).map_err(|e| StasisError::Io {
            path: config.data_dir.clone(),
            source: e,
        })?;
        let runtime = runtime::from_config(&config);
        Ok(Self::new(config, runtime, Arc::new(FsCheckpointStore::new())))
    }

    /// The agent's configuration.
    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// The event hub, for in-process publishers and inspection.
    #[must_use]
    pub const fn event_hub(&self) -> &Arc<EventHub> {
        &self.events
    }

    fn slot(&self, id: &ContainerId) -> Result<Arc<ContainerSlot>> {
        self.containers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| StasisError::NotFound {
                kind: "container",
                id: id.to_string(),
            })
    }

    fn remove_slot(&self, slot: &Arc<ContainerSlot>) {
        let mut containers = self.containers.write().unwrap_or_else(PoisonError::into_inner);
        if containers
            .get(&slot.id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            let _ = containers.remove(&slot.id);
        }
    }

    /// Resolves a caller-supplied checkpoint location, falling back to
    /// the container's default root.
    fn location(&self, id: &ContainerId, requested: Option<&Path>) -> PathBuf {
        match requested {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => self.config.checkpoint_root(id.as_str()),
        }
    }

    /// Tracks a process until it exits, then records the exit and
    /// publishes `exit` events unless a call already did.
    fn watch_exit(&self, slot: &Arc<ContainerSlot>, name: String, exit: ExitWatch) {
        let slot = Arc::clone(slot);
        let events = Arc::clone(&self.events);
        let _ = tokio::spawn(async move {
            let status = exit.wait().await;
            // Wait out the call that may have caused the exit.
            let _guard = slot.lock_ops().await;
            let exited = slot.write(|record| record.mark_exited(&name, status));
            publish_exits(&events, &slot, exited);
        });
    }

    /// Records exits the runtime has reported but the record does not
    /// show yet. Callers hold the operation lock.
    fn reap(&self, slot: &ContainerSlot) {
        let exited = slot.write(ContainerRecord::reap_exited);
        publish_exits(&self.events, slot, exited);
    }

    /// Records the end of a successful dump taken with `exit`: the tree is
    /// gone even if the runtime has not reported it yet.
    fn settle_after_dump(&self, slot: &ContainerSlot, exited: bool) {
        self.reap(slot);
        if exited {
            let exited = slot.write(|record| record.mark_exited(INIT_PROCESS, DUMPED_EXIT_STATUS));
            publish_exits(&self.events, slot, exited);
        }
    }

    async fn start_container(
        &self,
        slot: &Arc<ContainerSlot>,
        request: &CreateContainerRequest,
        restore: Option<&CheckpointId>,
    ) -> Result<ContainerSnapshot> {
        let id = &request.id;
        let spawned = match restore {
            Some(name) => {
                let location = self.location(id, request.checkpoint_dir.as_deref());
                let metadata = self.store.get(&location, name)?.ok_or_else(|| {
                    StasisError::NotFound {
                        kind: "checkpoint",
                        id: self.store.entry_dir(&location, name).display().to_string(),
                    }
                })?;
                let record: CheckpointRecord = serde_json::from_slice(&metadata)?;
                self.runtime
                    .restore(
                        id,
                        &request.bundle_path,
                        &self.store.entry_dir(&location, name),
                        &record.options,
                    )
                    .await?
            }
            None => {
                self.runtime
                    .spawn(id, &request.bundle_path, &request.process)
                    .await?
            }
        };

        if let Err(e) = self.runtime.update_resources(id, &request.resources) {
            let _ = self.runtime.signal(spawned.system_pid, SIGKILL);
            return Err(e);
        }

        let system_pid = spawned.system_pid;
        let stdin = spawned.stdin;
        let exit = spawned.exit.clone();
        let snapshot = slot.write(|record| {
            record.processes.push(ProcessEntry {
                name: INIT_PROCESS.to_string(),
                system_pid,
                spec: request.process.clone(),
                exit_status: None,
                stdin,
                exit,
            });
            record.state = ContainerState::Running;
            record.restored_from = restore.map(ToString::to_string);
            record.snapshot()
        });

        let event = match restore {
            Some(name) => {
                tracing::info!(id = %id, pid = system_pid, checkpoint = %name, "container restored");
                EventMessage::new(EventKind::Restore, id.clone(), INIT_PROCESS).with_checkpoint(name.as_str())
            }
            None => {
                tracing::info!(id = %id, pid = system_pid, "container started");
                EventMessage::new(EventKind::StartContainer, id.clone(), INIT_PROCESS)
            }
        };
        self.events.publish(event);
        self.watch_exit(slot, INIT_PROCESS.to_string(), spawned.exit);
        Ok(snapshot)
    }
}

fn publish_exits(events: &EventHub, slot: &ContainerSlot, exited: Vec<(String, i32)>) {
    for (pid, status) in exited {
        tracing::info!(id = %slot.id, pid = %pid, status, "process exited");
        events.publish(EventMessage::new(EventKind::Exit, slot.id.clone(), pid).with_status(status));
    }
}

#[async_trait]
impl ControlService for Agent {
    async fn get_server_version(
        &self,
        _request: GetServerVersionRequest,
    ) -> Result<GetServerVersionResponse> {
        Ok(GetServerVersionResponse {
            major: API_VERSION_MAJOR,
            minor: API_VERSION_MINOR,
            patch: API_VERSION_PATCH,
            revision: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    async fn create_container(
        &self,
        request: CreateContainerRequest,
    ) -> Result<CreateContainerResponse> {
        request.id.validate()?;
        if request.process.args.is_empty() {
            return Err(StasisError::invalid_argument(
                "process args must not be empty",
            ));
        }
        request.resources.validate()?;
        let restore = match request.checkpoint.as_deref() {
            Some(name) if !name.is_empty() => Some(CheckpointId::parse(name)?),
            _ => None,
        };

        let slot = Arc::new(ContainerSlot::new(ContainerRecord::new(
            request.id.clone(),
            request.bundle_path.clone(),
            request.labels.clone(),
            request.resources.clone(),
        )));
        {
            let mut containers = self.containers.write().unwrap_or_else(PoisonError::into_inner);
            if containers.contains_key(&request.id) {
                return Err(StasisError::AlreadyExists {
                    kind: "container",
                    id: request.id.to_string(),
                });
            }
            let _ = containers.insert(request.id.clone(), Arc::clone(&slot));
        }

        let _guard = slot.lock_ops().await;
        match self.start_container(&slot, &request, restore.as_ref()).await {
            Ok(container) => Ok(CreateContainerResponse { container }),
            Err(e) => {
                tracing::warn!(id = %request.id, error = %e, "container creation failed");
                self.remove_slot(&slot);
                Err(e)
            }
        }
    }

    async fn update_container(
        &self,
        request: UpdateContainerRequest,
    ) -> Result<UpdateContainerResponse> {
        let slot = self.slot(&request.id)?;
        request.resources.validate()?;
        let _guard = slot.lock_ops().await;
        self.reap(&slot);

        let merged = slot.read(|record| {
            record.ensure_running()?;
            let mut merged = record.resources.clone();
            merged.merge(&request.resources);
            Ok::<_, StasisError>(merged)
        })?;
        self.runtime
            .update_resources(&request.id, &merged)
            .map_err(|e| e.context(format!("cannot update container {}", request.id)))?;
        slot.write(|record| record.resources = merged);

        tracing::info!(id = %request.id, "resources updated");
        self.events.publish(EventMessage::new(
            EventKind::Update,
            request.id.clone(),
            INIT_PROCESS,
        ));
        Ok(UpdateContainerResponse {})
    }

    async fn signal(&self, request: SignalRequest) -> Result<SignalResponse> {
        let slot = self.slot(&request.id)?;
        if !(1..=MAX_SIGNAL).contains(&request.signal) {
            return Err(StasisError::invalid_argument(format!(
                "signal {} outside 1-{MAX_SIGNAL}",
                request.signal
            )));
        }
        let _guard = slot.lock_ops().await;
        self.reap(&slot);

        let system_pid =
            slot.read(|record| record.running_process(&request.pid).map(|p| p.system_pid))?;
        if let Err(e) = self.runtime.signal(system_pid, request.signal) {
            // The process may have died after the lookup.
            self.reap(&slot);
            slot.read(|record| record.running_process(&request.pid).map(|_| ()))?;
            return Err(e.context(format!(
                "cannot signal process {} of container {}",
                request.pid, request.id
            )));
        }

        tracing::info!(id = %request.id, pid = %request.pid, signal = request.signal, "signal delivered");
        self.events.publish(
            EventMessage::new(EventKind::Signal, request.id.clone(), request.pid.clone())
                .with_status(request.signal),
        );
        self.reap(&slot);
        Ok(SignalResponse {})
    }

    async fn update_process(
        &self,
        request: UpdateProcessRequest,
    ) -> Result<UpdateProcessResponse> {
        let slot = self.slot(&request.id)?;
        let _guard = slot.lock_ops().await;
        self.reap(&slot);

        let (system_pid, terminal) = slot.read(|record| {
            record
                .running_process(&request.pid)
                .map(|p| (p.system_pid, p.spec.terminal))
        })?;

        if request.is_resize() {
            if !terminal {
                return Err(StasisError::invalid_state(
                    request.id.as_str(),
                    format!("process {} has no terminal", request.pid),
                ));
            }
            self.runtime
                .resize(system_pid, request.width, request.height)
                .map_err(|e| {
                    e.context(format!(
                        "cannot resize process {} of container {}",
                        request.pid, request.id
                    ))
                })?;
            tracing::debug!(id = %request.id, pid = %request.pid, width = request.width, height = request.height, "terminal resized");
        }

        if request.close_stdin {
            let stdin = slot.write(|record| {
                record
                    .process_mut(&request.pid)
                    .and_then(|process| process.stdin.take())
            });
            if let Some(stdin) = stdin {
                stdin.close().await;
                tracing::debug!(id = %request.id, pid = %request.pid, "stdin closed");
            }
        }
        Ok(UpdateProcessResponse {})
    }

    async fn add_process(&self, request: AddProcessRequest) -> Result<AddProcessResponse> {
        let slot = self.slot(&request.id)?;
        if !is_restricted_name(&request.pid) {
            return Err(StasisError::invalid_argument(format!(
                "invalid process ID ({}), only {RESTRICTED_NAME_CHARS} are allowed",
                request.pid
            )));
        }
        if request.process.args.is_empty() {
            return Err(StasisError::invalid_argument(
                "process args must not be empty",
            ));
        }
        let _guard = slot.lock_ops().await;
        self.reap(&slot);

        let bundle = slot.read(|record| {
            record.ensure_running()?;
            if record.process(&request.pid).is_some() {
                return Err(StasisError::AlreadyExists {
                    kind: "process",
                    id: format!("{}/{}", record.id, request.pid),
                });
            }
            Ok(record.bundle_path.clone())
        })?;

        let spawned = self
            .runtime
            .spawn(&request.id, &bundle, &request.process)
            .await?;
        let system_pid = spawned.system_pid;
        let stdin = spawned.stdin;
        let exit = spawned.exit.clone();
        self.reap(&slot);
        let added = slot.write(|record| {
            if record.state != ContainerState::Running {
                return false;
            }
            record.processes.push(ProcessEntry {
                name: request.pid.clone(),
                system_pid,
                spec: request.process.clone(),
                exit_status: None,
                stdin,
                exit,
            });
            true
        });
        if !added {
            // The init process exited while the new process was starting.
            let _ = self.runtime.signal(system_pid, SIGKILL);
            return Err(StasisError::invalid_state(
                request.id.as_str(),
                "container stopped while the process was starting",
            ));
        }

        tracing::info!(id = %request.id, pid = %request.pid, system_pid, "process added");
        self.events.publish(EventMessage::new(
            EventKind::StartProcess,
            request.id.clone(),
            request.pid.clone(),
        ));
        self.watch_exit(&slot, request.pid, spawned.exit);
        Ok(AddProcessResponse { system_pid })
    }

    async fn create_checkpoint(
        &self,
        request: CreateCheckpointRequest,
    ) -> Result<CreateCheckpointResponse> {
        let slot = self.slot(&request.id)?;
        let _guard = slot.lock_ops().await;
        self.reap(&slot);

        let init_pid = slot.read(|record| {
            record.ensure_running()?;
            record
                .init()
                .map(|init| init.system_pid)
                .ok_or_else(|| StasisError::internal(format!("container {} has no init", record.id)))
        })?;
        let name = CheckpointId::parse(request.name.as_str())?;
        let location = self.location(&request.id, request.checkpoint_dir.as_deref());
        let reservation = self.store.reserve(&location, &name).map_err(|e| match e {
            StasisError::AlreadyExists { kind, .. } => StasisError::AlreadyExists {
                kind,
                id: format!("{}/{name}", request.id),
            },
            other => other.context(format!("cannot checkpoint container {}", request.id)),
        })?;

        let created_at = Utc::now();
        let started = Instant::now();
        if let Err(e) = self
            .runtime
            .checkpoint(&request.id, init_pid, reservation.dir(), &request.options)
            .await
        {
            tracing::warn!(id = %request.id, checkpoint = %name, error = %e, "checkpoint failed, discarding partial snapshot");
            self.store.abort(reservation);
            self.reap(&slot);
            return Err(e.context(format!("cannot checkpoint container {}", request.id)));
        }

        let stat = CheckpointStat {
            name: name.to_string(),
            created_at,
            size_bytes: store::dir_size(reservation.dir()),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        let record = CheckpointRecord {
            name: name.to_string(),
            container: request.id.clone(),
            location: location.clone(),
            options: request.options,
            stat: stat.clone(),
        };
        let metadata = match serde_json::to_vec_pretty(&record) {
            Ok(metadata) => metadata,
            Err(e) => {
                self.store.abort(reservation);
                self.settle_after_dump(&slot, request.options.exit);
                return Err(e.into());
            }
        };
        if let Err(e) = self.store.commit(reservation, &metadata) {
            self.settle_after_dump(&slot, request.options.exit);
            return Err(e);
        }

        tracing::info!(
            id = %request.id,
            checkpoint = %name,
            location = %location.display(),
            size_bytes = stat.size_bytes,
            duration_ms = stat.duration_ms,
            exit = request.options.exit,
            "checkpoint created"
        );
        self.events.publish(
            EventMessage::new(EventKind::Checkpoint, request.id.clone(), INIT_PROCESS)
                .with_checkpoint(name.as_str()),
        );
        self.settle_after_dump(&slot, request.options.exit);
        Ok(CreateCheckpointResponse { stat })
    }

    async fn delete_checkpoint(
        &self,
        request: DeleteCheckpointRequest,
    ) -> Result<DeleteCheckpointResponse> {
        let slot = self.slot(&request.id)?;
        let name = CheckpointId::parse(request.name.as_str())?;
        let _guard = slot.lock_ops().await;

        let location = self.location(&request.id, request.checkpoint_dir.as_deref());
        if self.store.delete(&location, &name)? {
            tracing::info!(id = %request.id, checkpoint = %name, "checkpoint deleted");
            self.events.publish(
                EventMessage::new(EventKind::DeleteCheckpoint, request.id.clone(), INIT_PROCESS)
                    .with_checkpoint(name.as_str()),
            );
        } else {
            tracing::debug!(id = %request.id, checkpoint = %name, "checkpoint already absent");
        }
        Ok(DeleteCheckpointResponse {})
    }

    async fn list_checkpoint(
        &self,
        request: ListCheckpointRequest,
    ) -> Result<ListCheckpointResponse> {
        let _slot = self.slot(&request.id)?;
        let location = self.location(&request.id, request.checkpoint_dir.as_deref());

        let mut checkpoints = Vec::new();
        for (name, metadata) in self.store.list(&location)? {
            match serde_json::from_slice::<CheckpointRecord>(&metadata) {
                Ok(mut record) => {
                    record.location.clone_from(&location);
                    checkpoints.push(record);
                }
                Err(e) => {
                    tracing::warn!(location = %location.display(), checkpoint = %name, error = %e, "skipping unreadable checkpoint metadata");
                }
            }
        }
        checkpoints.sort_by(|a, b| {
            a.stat
                .created_at
                .cmp(&b.stat.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(ListCheckpointResponse { checkpoints })
    }

    async fn state(&self, request: StateRequest) -> Result<StateResponse> {
        let containers = match &request.id {
            Some(id) => vec![self.slot(id)?.read(ContainerRecord::snapshot)],
            None => {
                let slots: Vec<Arc<ContainerSlot>> = self
                    .containers
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .values()
                    .cloned()
                    .collect();
                let mut snapshots: Vec<ContainerSnapshot> = slots
                    .iter()
                    .map(|slot| slot.read(ContainerRecord::snapshot))
                    .collect();
                snapshots.sort_by(|a, b| a.id.cmp(&b.id));
                snapshots
            }
        };
        let cpus = std::thread::available_parallelism()
            .map_or(1, |n| u32::try_from(n.get()).unwrap_or(u32::MAX));
        Ok(StateResponse {
            containers,
            machine: MachineInfo { cpus },
        })
    }

    async fn stats(&self, request: StatsRequest) -> Result<StatsResponse> {
        let slot = self.slot(&request.id)?;
        let pids: Vec<u32> = slot.read(|record| {
            record.ensure_running()?;
            Ok::<_, StasisError>(
                record
                    .processes
                    .iter()
                    .filter(|p| p.is_running())
                    .map(|p| p.system_pid)
                    .collect(),
            )
        })?;

        let mut total = ProcessUsage::default();
        let mut sampled = 0u32;
        for pid in pids {
            match self.runtime.usage(pid) {
                Ok(usage) => {
                    total.accumulate(usage);
                    sampled += 1;
                }
                Err(e) => {
                    tracing::debug!(id = %request.id, pid, error = %e, "process vanished while sampling");
                }
            }
        }
        Ok(StatsResponse {
            id: request.id,
            cpu_usage_ns: total.cpu_ns,
            memory_usage_bytes: total.memory_bytes,
            processes: sampled,
            timestamp: Utc::now(),
        })
    }

    async fn events(&self, request: EventsRequest) -> Result<EventStream> {
        Ok(self.events.subscribe(&request))
    }
}

#[cfg(test)]
mod tests {
    use stasis_api::messages::ProcessSpec;
    use stasis_common::error::ErrorKind;

    use super::*;
    use crate::runtime::simulated::SimulatedRuntime;

    fn agent(dir: &Path) -> Agent {
        Agent::new(
            AgentConfig::with_data_dir(dir),
            Arc::new(SimulatedRuntime::new()),
            Arc::new(FsCheckpointStore::new()),
        )
    }

    fn assert_shareable<T: Send + Sync>(_: &T) {}

    #[tokio::test]
    async fn agent_and_its_calls_cross_threads() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = Arc::new(agent(tmp.path()));
        assert_shareable(&agent);
        let worker = Arc::clone(&agent);
        let handle = tokio::spawn(async move {
            worker
                .state(StateRequest { id: None })
                .await
                .map(|state| state.containers.len())
        });
        assert_eq!(handle.await.unwrap().unwrap(), 0);
    }

    #[test]
    fn explicit_location_wins_over_default() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = agent(tmp.path());
        let id = ContainerId::new("c1");
        assert_eq!(
            agent.location(&id, Some(Path::new("/srv/cp"))),
            PathBuf::from("/srv/cp")
        );
        assert_eq!(
            agent.location(&id, Some(Path::new(""))),
            tmp.path().join("containers/c1/checkpoints")
        );
        assert_eq!(
            agent.location(&id, None),
            tmp.path().join("containers/c1/checkpoints")
        );
    }

    #[tokio::test]
    async fn version_reports_protocol_constants() {
        let tmp = tempfile::tempdir().unwrap();
        let version = agent(tmp.path())
            .get_server_version(GetServerVersionRequest {})
            .await
            .unwrap();
        assert_eq!(version.major, API_VERSION_MAJOR);
        assert!(!version.revision.is_empty());
    }

    #[tokio::test]
    async fn failed_create_frees_the_handle() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = agent(tmp.path());
        let request = CreateContainerRequest {
            id: ContainerId::new("c1"),
            bundle_path: tmp.path().to_path_buf(),
            process: ProcessSpec {
                args: vec!["sleep".into()],
                ..ProcessSpec::default()
            },
            checkpoint: Some("missing".into()),
            ..CreateContainerRequest::default()
        };
        let err = agent.create_container(request.clone()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let fresh = CreateContainerRequest {
            checkpoint: None,
            ..request
        };
        assert!(agent.create_container(fresh).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_container_handle_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let err = agent(tmp.path())
            .create_container(CreateContainerRequest {
                id: ContainerId::new("../escape"),
                process: ProcessSpec {
                    args: vec!["sleep".into()],
                    ..ProcessSpec::default()
                },
                ..CreateContainerRequest::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}

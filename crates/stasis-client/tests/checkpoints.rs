//! Checkpoint workflows driven from the manager side, through the client
//! stub and the in-process transport, against a simulated agent.

#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use stasis_agent::Agent;
use stasis_agent::runtime::simulated::SimulatedRuntime;
use stasis_agent::store::FsCheckpointStore;
use stasis_api::ControlService;
use stasis_api::event::EventKind;
use stasis_api::messages::{
    CheckpointOptions, CreateContainerRequest, EventsRequest, ProcessSpec, StateRequest,
};
use stasis_api::method::Method;
use stasis_api::stream::EventStream;
use stasis_client::{CheckpointOrchestrator, Client};
use stasis_common::config::{AgentConfig, ClientConfig};
use stasis_common::error::{ErrorKind, Result};
use stasis_common::types::{ContainerId, ContainerState};
use stasis_transport::{LocalTransport, Transport};
use tempfile::TempDir;

/// Counts the calls that reach the transport.
struct Counting {
    inner: LocalTransport,
    calls: AtomicUsize,
}

impl Counting {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for Counting {
    async fn call(&self, method: Method, params: Value) -> Result<Value> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.call(method, params).await
    }

    async fn open_stream(&self, method: Method, params: Value) -> Result<EventStream> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.open_stream(method, params).await
    }
}

struct Manager {
    tmp: TempDir,
    agent: Arc<Agent>,
    transport: Arc<Counting>,
    client: Arc<Client>,
    checkpoints: CheckpointOrchestrator,
}

fn manager() -> Manager {
    let tmp = tempfile::tempdir().unwrap();
    let agent = Arc::new(Agent::new(
        AgentConfig::with_data_dir(tmp.path()),
        Arc::new(SimulatedRuntime::new()),
        Arc::new(FsCheckpointStore::new()),
    ));
    let transport = Arc::new(Counting {
        inner: LocalTransport::new(agent.clone()),
        calls: AtomicUsize::new(0),
    });
    let config = ClientConfig {
        data_dir: tmp.path().to_path_buf(),
        retry_backoff_ms: 1,
        ..ClientConfig::default()
    };
    let client = Arc::new(Client::new(transport.clone(), &config));
    let checkpoints = CheckpointOrchestrator::new(client.clone(), &config);
    Manager {
        tmp,
        agent,
        transport,
        client,
        checkpoints,
    }
}

fn sleeper(id: &str) -> CreateContainerRequest {
    CreateContainerRequest {
        id: ContainerId::new(id),
        bundle_path: PathBuf::from("/bundles").join(id),
        process: ProcessSpec {
            args: vec!["sleep".into(), "infinity".into()],
            ..ProcessSpec::default()
        },
        ..CreateContainerRequest::default()
    }
}

fn names(records: &[stasis_api::messages::CheckpointRecord]) -> Vec<&str> {
    records.iter().map(|r| r.name.as_str()).collect()
}

fn default_root(data_dir: &Path, id: &str) -> PathBuf {
    data_dir.join("containers").join(id).join("checkpoints")
}

#[tokio::test]
async fn create_list_delete_with_default_location() {
    let m = manager();
    let c1 = ContainerId::new("c1");
    let _ = m.client.create_container(sleeper("c1")).await.unwrap();

    let record = m
        .checkpoints
        .create(&c1, "snap-1", CheckpointOptions::default(), Some(Path::new("")))
        .await
        .unwrap();
    assert_eq!(record.name, "snap-1");
    assert_eq!(record.container, c1);
    assert_eq!(record.location, default_root(m.tmp.path(), "c1"));
    assert_eq!(record.stat.name, "snap-1");

    let listed = m.checkpoints.list(&c1, Some(Path::new(""))).await.unwrap();
    assert_eq!(names(&listed), ["snap-1"]);
    assert_eq!(listed[0].stat, record.stat);

    m.checkpoints
        .delete(&c1, "snap-1", Some(Path::new("")))
        .await
        .unwrap();
    assert!(m.checkpoints.list(&c1, None).await.unwrap().is_empty());
    assert!(!record.location.join("snap-1").exists());
}

#[tokio::test]
async fn malformed_identifiers_fail_without_a_call() {
    let m = manager();
    let c1 = ContainerId::new("c1");
    let location = m.tmp.path().join("snaps");

    for name in ["bad id", "../x", "", "a/b"] {
        let err = m
            .checkpoints
            .create(&c1, name, CheckpointOptions::default(), Some(&location))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{name}");
        assert!(err.to_string().contains("c1"));
    }
    assert_eq!(m.transport.calls(), 0);
    assert!(!location.exists());
    assert!(!m.tmp.path().join("x").exists());
}

#[tokio::test]
async fn unknown_container_keeps_not_found_with_context() {
    let m = manager();
    let err = m
        .checkpoints
        .create(
            &ContainerId::new("unknown-container"),
            "snap-1",
            CheckpointOptions::default(),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(
        err.to_string()
            .starts_with("cannot checkpoint container unknown-container")
    );
}

#[tokio::test]
async fn listing_an_implicit_location_creates_it_empty() {
    let m = manager();
    let c1 = ContainerId::new("c1");
    let _ = m.client.create_container(sleeper("c1")).await.unwrap();

    let root = default_root(m.tmp.path(), "c1");
    assert!(!root.exists());
    assert!(m.checkpoints.list(&c1, None).await.unwrap().is_empty());
    assert!(root.is_dir());
}

#[tokio::test]
async fn failed_listing_removes_the_location_it_created() {
    let m = manager();
    let location = m.tmp.path().join("scratch/deep/snaps");
    let err = m
        .checkpoints
        .list(&ContainerId::new("ghost"), Some(&location))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!m.tmp.path().join("scratch").exists());

    let err = m
        .checkpoints
        .list(&ContainerId::new("ghost"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!m.tmp.path().join("containers/ghost").exists());
    assert!(!m.tmp.path().join("containers").exists());
}

#[tokio::test]
async fn failed_listing_keeps_directories_it_did_not_create() {
    let m = manager();
    let _ = m.client.create_container(sleeper("c1")).await.unwrap();
    assert!(m.checkpoints.list(&ContainerId::new("c1"), None).await.unwrap().is_empty());

    let err = m
        .checkpoints
        .list(&ContainerId::new("ghost"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!m.tmp.path().join("containers/ghost").exists());
    assert!(default_root(m.tmp.path(), "c1").is_dir());
}

#[tokio::test]
async fn default_root_follows_the_manager_data_dir() {
    let m = manager();
    let agent_dir = tempfile::tempdir().unwrap();
    let agent = Arc::new(Agent::new(
        AgentConfig::with_data_dir(agent_dir.path()),
        Arc::new(SimulatedRuntime::new()),
        Arc::new(FsCheckpointStore::new()),
    ));
    let config = ClientConfig {
        data_dir: m.tmp.path().to_path_buf(),
        ..ClientConfig::default()
    };
    let client = Arc::new(Client::new(Arc::new(LocalTransport::new(agent.clone())), &config));
    let checkpoints = CheckpointOrchestrator::new(client.clone(), &config);
    let c1 = ContainerId::new("c1");
    let _ = client.create_container(sleeper("c1")).await.unwrap();

    let record = checkpoints
        .create(&c1, "snap-1", CheckpointOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(record.location, default_root(m.tmp.path(), "c1"));
    assert!(record.location.join("snap-1").is_dir());
    assert!(!default_root(agent_dir.path(), "c1").join("snap-1").exists());

    // Callers that leave the location to the agent see the agent's root.
    let raw = agent
        .list_checkpoint(stasis_api::messages::ListCheckpointRequest {
            id: c1.clone(),
            checkpoint_dir: None,
        })
        .await
        .unwrap();
    assert!(raw.checkpoints.is_empty());
    assert_eq!(names(&checkpoints.list(&c1, None).await.unwrap()), ["snap-1"]);
}

#[tokio::test]
async fn concurrent_creates_of_one_name_yield_one_checkpoint() {
    let m = manager();
    let c1 = ContainerId::new("c1");
    let _ = m.client.create_container(sleeper("c1")).await.unwrap();

    let (a, b) = tokio::join!(
        m.checkpoints
            .create(&c1, "snap-1", CheckpointOptions::default(), None),
        m.checkpoints
            .create(&c1, "snap-1", CheckpointOptions::default(), None),
    );
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let err = outcomes.into_iter().find_map(Result::err).unwrap();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let listed = m.checkpoints.list(&c1, None).await.unwrap();
    assert_eq!(names(&listed), ["snap-1"]);
}

#[tokio::test]
async fn deleting_an_absent_checkpoint_leaves_others() {
    let m = manager();
    let c1 = ContainerId::new("c1");
    let _ = m.client.create_container(sleeper("c1")).await.unwrap();
    let _ = m
        .checkpoints
        .create(&c1, "keep", CheckpointOptions::default(), None)
        .await
        .unwrap();

    m.checkpoints.delete(&c1, "never-made", None).await.unwrap();
    let listed = m.checkpoints.list(&c1, None).await.unwrap();
    assert_eq!(names(&listed), ["keep"]);
}

#[tokio::test]
async fn restore_starts_a_container_from_a_checkpoint() {
    let m = manager();
    let c1 = ContainerId::new("c1");
    let _ = m.client.create_container(sleeper("c1")).await.unwrap();
    let location = m.tmp.path().join("shared");
    let _ = m
        .checkpoints
        .create(
            &c1,
            "snap-1",
            CheckpointOptions {
                exit: true,
                ..CheckpointOptions::default()
            },
            Some(&location),
        )
        .await
        .unwrap();

    let restored = m
        .checkpoints
        .restore(sleeper("c2"), "snap-1", Some(&location))
        .await
        .unwrap();
    assert_eq!(restored.state, ContainerState::Running);
    assert_eq!(restored.restored_from.as_deref(), Some("snap-1"));

    let err = m
        .checkpoints
        .restore(sleeper("c3"), "missing", Some(&location))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn events_arrive_through_the_stub_and_stop_on_cancel() {
    let m = manager();
    let mut events = m
        .client
        .events(EventsRequest {
            id: Some(ContainerId::new("c1")),
            since: None,
        })
        .await
        .unwrap();

    let c1 = ContainerId::new("c1");
    let _ = m.client.create_container(sleeper("c1")).await.unwrap();
    let _ = m
        .checkpoints
        .create(&c1, "snap-1", CheckpointOptions::default(), None)
        .await
        .unwrap();

    let kinds = [
        events.next().await.unwrap().unwrap().kind,
        events.next().await.unwrap().unwrap().kind,
    ];
    assert_eq!(kinds, [EventKind::StartContainer, EventKind::Checkpoint]);

    events.cancel();
    assert!(events.next().await.unwrap().is_none());
    for _ in 0..200 {
        if m.agent.event_hub().subscriber_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(m.agent.event_hub().subscriber_count(), 0);

    let state = m.client.state(StateRequest { id: Some(c1) }).await.unwrap();
    assert_eq!(state.containers[0].state, ContainerState::Running);
}

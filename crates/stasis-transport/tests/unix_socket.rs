//! Calls over a real Unix socket against an agent on the simulated runtime.

#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use stasis_agent::Agent;
use stasis_agent::runtime::simulated::SimulatedRuntime;
use stasis_agent::store::FsCheckpointStore;
use stasis_api::event::{EventKind, EventMessage};
use stasis_api::frame::Frame;
use stasis_api::method::Method;
use stasis_common::config::AgentConfig;
use stasis_common::error::{ErrorKind, StasisError};
use stasis_transport::{Dispatcher, Transport, UnixServer, UnixTransport};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Served {
    _tmp: TempDir,
    socket: PathBuf,
    agent: Arc<Agent>,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
}

fn serve() -> Served {
    let tmp = tempfile::tempdir().unwrap();
    let config = AgentConfig::with_data_dir(tmp.path());
    let socket = config.socket_path.clone();
    let agent = Arc::new(Agent::new(
        config,
        Arc::new(SimulatedRuntime::new()),
        Arc::new(FsCheckpointStore::new()),
    ));
    let server = UnixServer::bind(&socket, Dispatcher::new(agent.clone())).unwrap();
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let server = tokio::spawn(async move {
        server.serve(token).await.unwrap();
    });
    Served {
        _tmp: tmp,
        socket,
        agent,
        shutdown,
        server,
    }
}

fn sleeper(id: &str) -> Value {
    json!({
        "id": id,
        "bundle_path": format!("/bundles/{id}"),
        "process": { "args": ["sleep", "infinity"] },
    })
}

/// Accepts one connection and answers only `GetServerVersion` promptly.
/// Every other request is answered after `delay`.
fn serve_slowly(socket: PathBuf, delay: Duration) -> JoinHandle<()> {
    let listener = UnixListener::bind(&socket).unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let (replies, mut outbound) = tokio::sync::mpsc::channel::<Frame>(16);
        let _ = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                let line = frame.encode().unwrap();
                if writer.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Ok(Frame::Request { id, method, .. }) = Frame::decode(&line) else {
                continue;
            };
            let reply = Frame::Response {
                id,
                result: json!({ "major": 0, "minor": 1, "patch": 0, "revision": "slow" }),
            };
            let replies = replies.clone();
            let wait = if method == Method::GetServerVersion.full_name() {
                Duration::ZERO
            } else {
                delay
            };
            let _ = tokio::spawn(async move {
                tokio::time::sleep(wait).await;
                let _ = replies.send(reply).await;
            });
        }
    })
}

async fn wait_for_subscribers(agent: &Agent, expected: usize) {
    for _ in 0..200 {
        if agent.event_hub().subscriber_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("subscriber count never reached {expected}");
}

#[tokio::test]
async fn version_round_trip() {
    let served = serve();
    let client = UnixTransport::connect(&served.socket, TIMEOUT).await.unwrap();
    let version = client
        .call(Method::GetServerVersion, json!({}))
        .await
        .unwrap();
    assert_eq!(version["major"], 0);
    assert!(version["revision"].is_string());
}

#[tokio::test]
async fn agent_errors_arrive_as_remote_errors() {
    let served = serve();
    let client = UnixTransport::connect(&served.socket, TIMEOUT).await.unwrap();
    let err = client
        .call(
            Method::CreateCheckpoint,
            json!({ "id": "unknown-container", "name": "snap-1" }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(matches!(err, StasisError::Remote { .. }));
    assert!(err.to_string().contains("unknown-container"));
}

#[tokio::test]
async fn concurrent_calls_share_one_connection() {
    let served = serve();
    let client = Arc::new(UnixTransport::connect(&served.socket, TIMEOUT).await.unwrap());
    let _ = client
        .call(Method::CreateContainer, sleeper("c1"))
        .await
        .unwrap();

    let mut calls = Vec::new();
    for n in 0..16 {
        let client = Arc::clone(&client);
        calls.push(tokio::spawn(async move {
            client
                .call(
                    Method::CreateCheckpoint,
                    json!({ "id": "c1", "name": format!("snap-{n}") }),
                )
                .await
        }));
    }
    for call in calls {
        let stat = call.await.unwrap().unwrap();
        assert!(stat["stat"]["name"].as_str().unwrap().starts_with("snap-"));
    }

    let listed = client
        .call(Method::ListCheckpoint, json!({ "id": "c1" }))
        .await
        .unwrap();
    assert_eq!(listed["checkpoints"].as_array().unwrap().len(), 16);
}

#[tokio::test]
async fn events_stream_and_cancel_releases_the_agent() {
    let served = serve();
    let client = UnixTransport::connect(&served.socket, TIMEOUT).await.unwrap();
    let mut events = client
        .open_stream(Method::Events, json!({ "id": "c1" }))
        .await
        .unwrap();
    wait_for_subscribers(&served.agent, 1).await;

    let _ = client
        .call(Method::CreateContainer, sleeper("c1"))
        .await
        .unwrap();
    let _ = client
        .call(
            Method::CreateCheckpoint,
            json!({ "id": "c1", "name": "snap-1" }),
        )
        .await
        .unwrap();

    let first: EventMessage = events.next().await.unwrap().unwrap();
    assert_eq!(first.kind, EventKind::StartContainer);
    let second = events.next().await.unwrap().unwrap();
    assert_eq!(second.kind, EventKind::Checkpoint);
    assert_eq!(second.checkpoint.as_deref(), Some("snap-1"));

    events.cancel();
    assert!(events.next().await.unwrap().is_none());
    wait_for_subscribers(&served.agent, 0).await;

    // The connection stays usable for other calls.
    let state = client
        .call(Method::State, json!({ "id": "c1" }))
        .await
        .unwrap();
    assert_eq!(state["containers"][0]["state"], "running");
}

#[tokio::test]
async fn server_shutdown_fails_pending_streams_and_later_calls() {
    let served = serve();
    let client = UnixTransport::connect(&served.socket, TIMEOUT).await.unwrap();
    let mut events = client.open_stream(Method::Events, json!({})).await.unwrap();
    wait_for_subscribers(&served.agent, 1).await;

    served.shutdown.cancel();
    served.server.await.unwrap();

    let err = events.next().await.unwrap_err();
    assert!(err.is_transport());
    for _ in 0..200 {
        if client.is_closed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let err = client
        .call(Method::GetServerVersion, json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportFailure);
    assert!(!served.socket.exists());
}

#[tokio::test]
async fn missing_socket_is_a_transport_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let err = UnixTransport::connect(&tmp.path().join("absent.sock"), TIMEOUT)
        .await
        .unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn malformed_params_are_rejected_over_the_socket() {
    let served = serve();
    let client = UnixTransport::connect(&served.socket, TIMEOUT).await.unwrap();
    let err = client
        .call(Method::Stats, json!({ "id": 7 }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn stalled_call_hits_its_deadline_and_frees_the_connection() {
    let tmp = tempfile::tempdir().unwrap();
    let socket = tmp.path().join("slow.sock");
    let _peer = serve_slowly(socket.clone(), Duration::from_millis(300));
    let client = UnixTransport::connect(&socket, Duration::from_millis(50))
        .await
        .unwrap();

    let err = client
        .call(Method::State, json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportFailure);
    assert!(err.to_string().contains("deadline of 50ms exceeded"), "{err}");
    assert!(err.to_string().contains("types.API.State"), "{err}");
    assert_eq!(client.pending_calls(), 0);

    let version = client
        .call(Method::GetServerVersion, json!({}))
        .await
        .unwrap();
    assert_eq!(version["revision"], "slow");

    // The late answer to the abandoned call is dropped quietly.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!client.is_closed());
    assert_eq!(client.pending_calls(), 0);
    let version = client
        .call(Method::GetServerVersion, json!({}))
        .await
        .unwrap();
    assert_eq!(version["major"], 0);
}

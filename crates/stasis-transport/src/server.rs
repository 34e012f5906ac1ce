//! Unix socket server for the agent.
//!
//! Each connection gets a reader loop and a writer task fed through a
//! bounded queue. Every request runs in its own task, so calls on one
//! connection complete independently and out of order. A streaming call
//! ends when the service ends it, when the client sends `cancel`, or
//! when the connection drops.

use std::collections::HashMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use stasis_api::frame::Frame;
use stasis_api::method::Method;
use stasis_api::status::Status;
use stasis_api::stream::EventStream;
use stasis_common::error::{Result, StasisError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;

/// Frames waiting to be written on one connection.
const OUTBOUND_QUEUE: usize = 64;

type StreamTable = Arc<Mutex<HashMap<u64, CancellationToken>>>;

fn streams(table: &StreamTable) -> MutexGuard<'_, HashMap<u64, CancellationToken>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serves a [`Dispatcher`] on a Unix socket.
#[derive(Debug)]
pub struct UnixServer {
    listener: UnixListener,
    path: PathBuf,
    dispatcher: Dispatcher,
}

impl UnixServer {
    /// Binds `path`, replacing a stale socket file. Must be called from
    /// within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub fn bind(path: &Path, dispatcher: Dispatcher) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StasisError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == IoErrorKind::NotFound => {}
            Err(e) => {
                return Err(StasisError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        }
        let listener = UnixListener::bind(path).map_err(|e| StasisError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            listener,
            path: path.to_path_buf(),
            dispatcher,
        })
    }

    /// Socket path the server listens on.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accepts connections until `shutdown` fires, then tears down every
    /// connection and removes the socket file.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok`; accept failures are logged.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(path = %self.path.display(), "listening");
        loop {
            let accepted = tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, _)) => {
                    tracing::debug!("connection accepted");
                    let _ = tokio::spawn(serve_connection(
                        stream,
                        self.dispatcher.clone(),
                        shutdown.child_token(),
                    ));
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            }
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "socket already gone");
        }
        tracing::info!(path = %self.path.display(), "server stopped");
        Ok(())
    }
}

async fn serve_connection(stream: UnixStream, dispatcher: Dispatcher, token: CancellationToken) {
    let (reader, writer) = stream.into_split();
    let (out, out_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let writer_task = tokio::spawn(write_frames(writer, out_rx, token.clone()));
    let table = StreamTable::default();

    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = tokio::select! {
            () = token.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "connection read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match Frame::decode(&line) {
            Ok(Frame::Request { id, method, params }) => {
                start_call(id, method, params, &dispatcher, &out, &table, &token);
            }
            Ok(Frame::Cancel { id }) => {
                if let Some(call) = streams(&table).remove(&id) {
                    tracing::debug!(call = id, "stream cancelled by client");
                    call.cancel();
                }
            }
            Ok(other) => tracing::warn!(call = other.id(), "unexpected frame from client"),
            Err(e) => tracing::warn!(error = %e, "dropping malformed frame"),
        }
    }

    // Ends every stream still open on this connection.
    token.cancel();
    drop(out);
    let _ = writer_task.await;
    tracing::debug!("connection closed");
}

fn start_call(
    id: u64,
    method: String,
    params: Value,
    dispatcher: &Dispatcher,
    out: &mpsc::Sender<Frame>,
    table: &StreamTable,
    token: &CancellationToken,
) {
    let dispatcher = dispatcher.clone();
    let out = out.clone();
    let streaming = Method::from_full_name(&method).is_some_and(Method::is_streaming);
    if !streaming {
        let _ = tokio::spawn(async move {
            let frame = match dispatcher.call(&method, params).await {
                Ok(result) => Frame::Response { id, result },
                Err(status) => Frame::Error { id, status },
            };
            let _ = out.send(frame).await;
        });
        return;
    }

    let call_token = token.child_token();
    let _ = streams(table).insert(id, call_token.clone());
    let table = Arc::clone(table);
    let _ = tokio::spawn(async move {
        match dispatcher.open_stream(&method, params).await {
            Ok(stream) => forward_events(id, stream, &out, &call_token).await,
            Err(status) => {
                let _ = out.send(Frame::Error { id, status }).await;
            }
        }
        let _ = streams(&table).remove(&id);
    });
}

async fn forward_events(
    id: u64,
    mut stream: EventStream,
    out: &mpsc::Sender<Frame>,
    token: &CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => {
                stream.cancel();
                return;
            }
            next = stream.next() => next,
        };
        let frame = match next {
            Ok(Some(event)) => Frame::Event { id, event },
            Ok(None) => {
                let _ = out.send(Frame::End { id }).await;
                return;
            }
            Err(e) => {
                tracing::warn!(call = id, error = %e, "event stream failed");
                let _ = out
                    .send(Frame::Error {
                        id,
                        status: Status::from(&e),
                    })
                    .await;
                return;
            }
        };
        let sent = tokio::select! {
            biased;
            () = token.cancelled() => false,
            sent = out.send(frame) => sent.is_ok(),
        };
        if !sent {
            stream.cancel();
            return;
        }
    }
}

async fn write_frames(
    writer: OwnedWriteHalf,
    mut frames: mpsc::Receiver<Frame>,
    token: CancellationToken,
) {
    let mut writer = BufWriter::new(writer);
    while let Some(frame) = frames.recv().await {
        let line = match frame.encode() {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(call = frame.id(), error = %e, "dropping unencodable frame");
                continue;
            }
        };
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            tracing::debug!(error = %e, "connection write failed");
            break;
        }
    }
    token.cancel();
}

//! Client side of the Unix socket transport.
//!
//! One connection carries any number of concurrent calls. A reader task
//! routes incoming frames to the waiting call by id; when the connection
//! drops, every call still waiting fails with a transport error and every
//! open stream terminates with one.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use stasis_api::frame::Frame;
use stasis_api::method::Method;
use stasis_api::stream::{EventSink, EventStream, SendRejected, event_channel};
use stasis_common::constants::DEFAULT_EVENT_BUFFER;
use stasis_common::error::{Result, StasisError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::transport::{Transport, transport_error};

const OUTBOUND_QUEUE: usize = 64;

#[derive(Debug)]
enum Pending {
    Unary {
        method: String,
        reply: oneshot::Sender<Result<Value>>,
    },
    Stream {
        method: String,
        sink: EventSink,
    },
}

#[derive(Debug)]
struct Connection {
    out: mpsc::Sender<Frame>,
    pending: Mutex<HashMap<u64, Pending>>,
    next_id: AtomicU64,
    closed: CancellationToken,
}

impl Connection {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a call, unless the connection is already down.
    fn register(&self, method: &str, make: impl FnOnce() -> Pending) -> Result<u64> {
        let mut pending = self.pending();
        // Checked under the lock so a concurrent `fail_all` never misses it.
        if self.closed.is_cancelled() {
            return Err(transport_error(method, "connection closed"));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = pending.insert(id, make());
        Ok(id)
    }

    fn take(&self, id: u64) -> Option<Pending> {
        self.pending().remove(&id)
    }

    async fn route(&self, frame: Frame) {
        match frame {
            Frame::Response { id, result } => {
                if let Some(Pending::Unary { reply, .. }) = self.take(id) {
                    let _ = reply.send(Ok(result));
                }
            }
            Frame::Error { id, status } => match self.take(id) {
                Some(Pending::Unary { reply, .. }) => {
                    let _ = reply.send(Err(status.into_error()));
                }
                Some(Pending::Stream { sink, .. }) => sink.fail(status.into_error()),
                None => {}
            },
            Frame::Event { id, event } => {
                let rejected = match self.pending().get(&id) {
                    Some(Pending::Stream { sink, .. }) => sink.try_send(event).err(),
                    _ => None,
                };
                match rejected {
                    Some(SendRejected::Full) => {
                        if let Some(Pending::Stream { method, sink }) = self.take(id) {
                            tracing::warn!(call = id, method = %method, "event consumer fell behind");
                            sink.fail(StasisError::internal(
                                "event stream overflowed: consumer fell behind",
                            ));
                        }
                        let _ = self.out.send(Frame::Cancel { id }).await;
                    }
                    Some(SendRejected::Closed) => {
                        let _ = self.take(id);
                        let _ = self.out.send(Frame::Cancel { id }).await;
                    }
                    None => {}
                }
            }
            // Dropping the sink ends the consumer's stream.
            Frame::End { id } => drop(self.take(id)),
            Frame::Request { id, .. } | Frame::Cancel { id } => {
                tracing::warn!(call = id, "unexpected frame from agent");
            }
        }
    }

    fn fail_all(&self, reason: &str) {
        self.closed.cancel();
        let drained: Vec<Pending> = self.pending().drain().map(|(_, call)| call).collect();
        for call in drained {
            match call {
                Pending::Unary { method, reply } => {
                    let _ = reply.send(Err(transport_error(&method, reason)));
                }
                Pending::Stream { method, sink } => sink.fail(transport_error(&method, reason)),
            }
        }
    }
}

/// A connection to an agent's Unix socket.
#[derive(Debug)]
pub struct UnixTransport {
    conn: Arc<Connection>,
    call_timeout: Duration,
    stream_buffer: usize,
}

impl UnixTransport {
    /// Connects to the agent at `path`. Every unary call made through
    /// the connection is bounded by `call_timeout`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the socket cannot be reached.
    pub async fn connect(path: &Path, call_timeout: Duration) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| transport_error("connect", format!("{}: {e}", path.display())))?;
        let (reader, writer) = stream.into_split();
        let (out, out_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let conn = Arc::new(Connection {
            out,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: CancellationToken::new(),
        });
        let _ = tokio::spawn(write_frames(writer, out_rx, conn.closed.clone()));
        let _ = tokio::spawn(read_frames(reader, Arc::clone(&conn)));
        tracing::debug!(path = %path.display(), "connected to agent");
        Ok(Self {
            conn,
            call_timeout,
            stream_buffer: DEFAULT_EVENT_BUFFER,
        })
    }

    /// Sets how many undelivered events an open stream may buffer
    /// locally before it fails.
    #[must_use]
    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity.max(1);
        self
    }

    /// Returns whether the connection has been lost.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.conn.closed.is_cancelled()
    }

    /// Number of calls and streams still waiting on the agent.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.conn.pending().len()
    }
}

impl Drop for UnixTransport {
    fn drop(&mut self) {
        self.conn.closed.cancel();
    }
}

#[async_trait]
impl Transport for UnixTransport {
    async fn call(&self, method: Method, params: Value) -> Result<Value> {
        let name = method.full_name();
        let (reply, response) = oneshot::channel();
        let id = self.conn.register(&name, || Pending::Unary {
            method: name.clone(),
            reply,
        })?;
        let request = Frame::Request {
            id,
            method: name.clone(),
            params,
        };
        if self.conn.out.send(request).await.is_err() {
            let _ = self.conn.take(id);
            return Err(transport_error(&name, "connection closed"));
        }

        match tokio::time::timeout(self.call_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(transport_error(&name, "connection closed")),
            Err(_) => {
                let _ = self.conn.take(id);
                Err(transport_error(
                    &name,
                    format!("deadline of {}ms exceeded", self.call_timeout.as_millis()),
                ))
            }
        }
    }

    async fn open_stream(&self, method: Method, params: Value) -> Result<EventStream> {
        let name = method.full_name();
        let (sink, stream) = event_channel(self.stream_buffer);
        let consumer = sink.cancellation_token();
        let id = self.conn.register(&name, || Pending::Stream {
            method: name.clone(),
            sink,
        })?;
        let request = Frame::Request {
            id,
            method: name.clone(),
            params,
        };
        if self.conn.out.send(request).await.is_err() {
            let _ = self.conn.take(id);
            return Err(transport_error(&name, "connection closed"));
        }

        // Tells the agent as soon as the consumer gives up.
        let conn = Arc::clone(&self.conn);
        let _ = tokio::spawn(async move {
            tokio::select! {
                () = consumer.cancelled() => {
                    if conn.take(id).is_some() {
                        let _ = conn.out.send(Frame::Cancel { id }).await;
                    }
                }
                () = conn.closed.cancelled() => {}
            }
        });
        Ok(stream)
    }
}

async fn read_frames(reader: OwnedReadHalf, conn: Arc<Connection>) {
    let mut lines = BufReader::new(reader).lines();
    let reason = loop {
        let line = tokio::select! {
            () = conn.closed.cancelled() => break "connection closed".to_string(),
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match Frame::decode(&line) {
                Ok(frame) => conn.route(frame).await,
                Err(e) => tracing::warn!(error = %e, "dropping malformed frame"),
            },
            Ok(None) => break "connection closed by agent".to_string(),
            Err(e) => break format!("connection read failed: {e}"),
        }
    };
    tracing::debug!(reason = %reason, "agent connection down");
    conn.fail_all(&reason);
}

async fn write_frames(
    writer: OwnedWriteHalf,
    mut frames: mpsc::Receiver<Frame>,
    closed: CancellationToken,
) {
    let mut writer = BufWriter::new(writer);
    loop {
        let frame = tokio::select! {
            () = closed.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
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
    closed.cancel();
}

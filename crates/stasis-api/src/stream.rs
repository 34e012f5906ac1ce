//! Bounded, cancellable event channel backing the `Events` call.
//!
//! The producer holds an [`EventSink`], the consumer an [`EventStream`].
//! The stream ends in exactly one of three ways: the producer drops the
//! sink (end of stream), the producer calls [`EventSink::fail`]
//! (mid-stream error), or the consumer cancels. After cancellation the
//! consumer observes no further events and the producer sees
//! [`EventSink::is_closed`] immediately.

use std::sync::{Arc, Mutex, PoisonError};

use stasis_common::error::{Result, StasisError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::event::EventMessage;

type FailureSlot = Arc<Mutex<Option<StasisError>>>;

/// Creates a connected sink/stream pair holding at most `capacity`
/// undelivered events.
#[must_use]
pub fn event_channel(capacity: usize) -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let failure = FailureSlot::default();
    let token = CancellationToken::new();
    (
        EventSink {
            tx,
            failure: Arc::clone(&failure),
            token: token.clone(),
        },
        EventStream { rx, failure, token },
    )
}

/// Why a non-blocking send did not enqueue the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejected {
    /// The consumer's queue is at capacity.
    Full,
    /// The consumer cancelled or went away.
    Closed,
}

/// Producer half of an event channel.
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::Sender<EventMessage>,
    failure: FailureSlot,
    token: CancellationToken,
}

impl EventSink {
    /// Enqueues an event without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SendRejected::Full`] when the queue is at capacity and
    /// [`SendRejected::Closed`] once the consumer has cancelled.
    pub fn try_send(&self, event: EventMessage) -> std::result::Result<(), SendRejected> {
        if self.token.is_cancelled() {
            return Err(SendRejected::Closed);
        }
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendRejected::Full,
            mpsc::error::TrySendError::Closed(_) => SendRejected::Closed,
        })
    }

    /// Enqueues an event, waiting for queue space.
    ///
    /// Returns `false` if the consumer cancelled before the event was
    /// accepted.
    pub async fn send(&self, event: EventMessage) -> bool {
        tokio::select! {
            biased;
            () = self.token.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }

    /// Terminates the stream with an error.
    ///
    /// Events already queued are still delivered before the error.
    pub fn fail(self, error: StasisError) {
        let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(error);
    }

    /// Returns whether the consumer has cancelled or gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the consumer cancels.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Returns a token that fires when the consumer cancels.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Consumer half of an event channel: a pull interface yielding one
/// event per call.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<EventMessage>,
    failure: FailureSlot,
    token: CancellationToken,
}

impl EventStream {
    /// Waits for the next event.
    ///
    /// Returns `Ok(None)` at end of stream or after cancellation.
    ///
    /// # Errors
    ///
    /// Returns the producer's error when the stream terminated abnormally.
    pub async fn next(&mut self) -> Result<Option<EventMessage>> {
        if self.token.is_cancelled() {
            return Ok(None);
        }
        tokio::select! {
            biased;
            () = self.token.cancelled() => Ok(None),
            received = self.rx.recv() => match received {
                Some(event) => Ok(Some(event)),
                None => self.take_failure().map_or(Ok(None), Err),
            },
        }
    }

    /// Cancels the subscription, releasing the producer.
    pub fn cancel(&mut self) {
        self.token.cancel();
        self.rx.close();
    }

    /// Returns whether the subscription was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns a token that cancels this subscription when fired.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn take_failure(&self) -> Option<StasisError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

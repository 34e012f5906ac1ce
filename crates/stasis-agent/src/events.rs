//! Event fan-out to `Events` subscribers.
//!
//! Every published event is appended to a bounded history and offered
//! to each matching subscriber without blocking. A subscriber whose queue
//! is full is dropped and its stream fails with an `Internal` overflow
//! error; events are never silently skipped. Cancelling a stream removes
//! its subscriber right away.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use stasis_api::event::EventMessage;
use stasis_api::messages::EventsRequest;
use stasis_api::stream::{EventSink, EventStream, SendRejected, event_channel};
use stasis_common::error::StasisError;
use stasis_common::types::ContainerId;

#[derive(Debug)]
struct Subscriber {
    filter: Option<ContainerId>,
    sink: EventSink,
}

impl Subscriber {
    fn wants(&self, event: &EventMessage) -> bool {
        self.filter.as_ref().is_none_or(|id| *id == event.id)
    }
}

#[derive(Debug, Default)]
struct HubState {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
    history: VecDeque<EventMessage>,
}

/// Broadcasts agent events to live subscribers.
#[derive(Debug)]
pub struct EventHub {
    state: Mutex<HubState>,
    capacity: usize,
    history_len: usize,
}

impl EventHub {
    /// Creates a hub whose subscribers each hold at most `capacity`
    /// undelivered events and which retains `history_len` past events.
    #[must_use]
    pub fn new(capacity: usize, history_len: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState::default()),
            capacity: capacity.max(1),
            history_len,
        })
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers an event to every matching subscriber.
    pub fn publish(&self, event: EventMessage) {
        tracing::debug!(kind = %event.kind, id = %event.id, pid = %event.pid, "event");
        let mut state = self.state();
        if self.history_len > 0 {
            if state.history.len() == self.history_len {
                let _ = state.history.pop_front();
            }
            state.history.push_back(event.clone());
        }

        let mut overflowed = Vec::new();
        let mut closed = Vec::new();
        for (&id, subscriber) in &state.subscribers {
            if !subscriber.wants(&event) {
                continue;
            }
            match subscriber.sink.try_send(event.clone()) {
                Ok(()) => {}
                Err(SendRejected::Full) => overflowed.push(id),
                Err(SendRejected::Closed) => closed.push(id),
            }
        }
        for id in closed {
            let _ = state.subscribers.remove(&id);
        }
        for id in overflowed {
            if let Some(subscriber) = state.subscribers.remove(&id) {
                tracing::warn!(subscriber = id, capacity = self.capacity, "event subscriber overflowed");
                subscriber.sink.fail(StasisError::internal(format!(
                    "event stream overflowed: more than {} undelivered events",
                    self.capacity
                )));
            }
        }
    }

    /// Registers a subscriber.
    ///
    /// With `since` set, retained events at or after that instant are
    /// replayed first; replay and registration happen atomically, so no
    /// event is missed or duplicated between the two. Must be called
    /// from within a Tokio runtime.
    pub fn subscribe(self: &Arc<Self>, request: &EventsRequest) -> EventStream {
        let mut state = self.state();
        let backlog: Vec<EventMessage> = request.since.map_or_else(Vec::new, |since| {
            state
                .history
                .iter()
                .filter(|event| event.timestamp >= since)
                .filter(|event| request.id.as_ref().is_none_or(|id| *id == event.id))
                .cloned()
                .collect()
        });

        // The backlog gets its own headroom so replay cannot overflow.
        let (sink, stream) = event_channel(self.capacity + backlog.len());
        for event in backlog {
            let _ = sink.try_send(event);
        }

        let id = state.next_id;
        state.next_id += 1;
        let token = sink.cancellation_token();
        let _ = state.subscribers.insert(
            id,
            Subscriber {
                filter: request.id.clone(),
                sink,
            },
        );
        drop(state);

        let hub: Weak<Self> = Arc::downgrade(self);
        let _ = tokio::spawn(async move {
            token.cancelled().await;
            if let Some(hub) = hub.upgrade() {
                hub.unsubscribe(id);
            }
        });
        tracing::debug!(subscriber = id, filter = ?request.id, "event subscriber added");
        stream
    }

    fn unsubscribe(&self, id: u64) {
        if self.state().subscribers.remove(&id).is_some() {
            tracing::debug!(subscriber = id, "event subscriber released");
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stasis_api::event::EventKind;
    use stasis_common::error::ErrorKind;

    use super::*;

    fn event(id: &str) -> EventMessage {
        EventMessage::new(EventKind::StartContainer, ContainerId::new(id), "init")
    }

    async fn wait_for_subscribers(hub: &EventHub, expected: usize) {
        for _ in 0..100 {
            if hub.subscriber_count() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("subscriber count never reached {expected}");
    }

    #[tokio::test]
    async fn filter_limits_delivery() {
        let hub = EventHub::new(8, 0);
        let mut only_c1 = hub.subscribe(&EventsRequest {
            id: Some(ContainerId::new("c1")),
            since: None,
        });
        hub.publish(event("c2"));
        hub.publish(event("c1"));
        let got = only_c1.next().await.unwrap().unwrap();
        assert_eq!(got.id.as_str(), "c1");
    }

    #[tokio::test]
    async fn overflow_fails_the_stream_after_queued_events() {
        let hub = EventHub::new(2, 0);
        let mut stream = hub.subscribe(&EventsRequest::default());
        for _ in 0..3 {
            hub.publish(event("c1"));
        }
        assert_eq!(hub.subscriber_count(), 0);
        assert!(stream.next().await.unwrap().is_some());
        assert!(stream.next().await.unwrap().is_some());
        let err = stream.next().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("overflowed"));
    }

    #[tokio::test]
    async fn since_replays_retained_history() {
        let hub = EventHub::new(1, 16);
        let start = chrono::Utc::now();
        hub.publish(event("c1"));
        hub.publish(event("c1"));
        hub.publish(event("c1"));

        let mut stream = hub.subscribe(&EventsRequest {
            id: None,
            since: Some(start),
        });
        for _ in 0..3 {
            assert!(stream.next().await.unwrap().is_some());
        }
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let hub = EventHub::new(8, 2);
        let start = chrono::Utc::now();
        for _ in 0..5 {
            hub.publish(event("c1"));
        }
        let mut stream = hub.subscribe(&EventsRequest {
            id: None,
            since: Some(start),
        });
        assert!(stream.next().await.unwrap().is_some());
        assert!(stream.next().await.unwrap().is_some());
        hub.publish(event("c2"));
        assert_eq!(stream.next().await.unwrap().unwrap().id.as_str(), "c2");
    }

    #[tokio::test]
    async fn cancel_releases_subscriber() {
        let hub = EventHub::new(8, 0);
        let mut stream = hub.subscribe(&EventsRequest::default());
        assert_eq!(hub.subscriber_count(), 1);
        stream.cancel();
        wait_for_subscribers(&hub, 0).await;
        hub.publish(event("c1"));
        assert!(stream.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dropped_stream_releases_subscriber() {
        let hub = EventHub::new(8, 0);
        let stream = hub.subscribe(&EventsRequest::default());
        drop(stream);
        wait_for_subscribers(&hub, 0).await;
    }
}

//! Event system for dispatcher notifications

use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::broadcast;

/// Event key type
pub type EventKey = String;

/// Event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Empty,
    String(String),
    Map(HashMap<String, serde_json::Value>),
}

/// Dispatcher event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEvent {
    /// Event key (e.g., "dispatch.lane.created", "dispatch.task.failed")
    pub key: EventKey,

    /// Event payload
    pub payload: EventPayload,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl DispatchEvent {
    /// Create a new event
    pub fn new(key: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            key: key.into(),
            payload,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Create an event with no payload
    pub fn empty(key: impl Into<String>) -> Self {
        Self::new(key, EventPayload::Empty)
    }

    /// Create an event with a string payload
    pub fn with_string(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(key, EventPayload::String(message.into()))
    }

    /// Create an event with a map payload
    pub fn with_map(key: impl Into<String>, map: HashMap<String, serde_json::Value>) -> Self {
        Self::new(key, EventPayload::Map(map))
    }

    /// Look up a field of a map payload
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        match &self.payload {
            EventPayload::Map(map) => map.get(name),
            _ => None,
        }
    }
}

/// Event emitter
///
/// Sending never blocks; with no subscribers events are discarded, and slow
/// subscribers lose the oldest events once the channel capacity is exceeded.
#[derive(Clone)]
pub struct EventEmitter {
    sender: Arc<broadcast::Sender<DispatchEvent>>,
}

impl EventEmitter {
    /// Create a new event emitter
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Emit an event
    pub fn emit(&self, event: DispatchEvent) {
        let _ = self.sender.send(event);
    }

    /// True if anyone is listening
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to filtered events as an `EventStream` (implements `Stream`)
    pub fn subscribe_filtered(
        &self,
        filter: impl Fn(&DispatchEvent) -> bool + Send + Sync + 'static,
    ) -> EventStream {
        use tokio_stream::wrappers::BroadcastStream;
        use tokio_stream::StreamExt as TokioStreamExt;
        let stream = BroadcastStream::new(self.sender.subscribe())
            .filter_map(|r: Result<DispatchEvent, _>| r.ok())
            .filter(move |e| filter(e));
        EventStream {
            inner: Box::pin(stream),
        }
    }

    /// Subscribe to all events as an `EventStream` (implements `Stream`)
    pub fn subscribe_stream(&self) -> EventStream {
        self.subscribe_filtered(|_| true)
    }
}

/// Event stream, implements `futures_core::Stream<Item = DispatchEvent>`.
///
/// Use `.next().await` via `StreamExt` from `tokio_stream` or `futures`, or call
/// [`EventStream::recv`] directly.
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = DispatchEvent> + Send>>,
}

impl Stream for EventStream {
    type Item = DispatchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl EventStream {
    /// Receive the next matching event
    pub async fn recv(&mut self) -> Option<DispatchEvent> {
        use tokio_stream::StreamExt;
        self.next().await
    }
}

/// Event catalog - predefined event keys
pub mod events {
    // Lane events
    pub const LANE_CREATED: &str = "dispatch.lane.created";
    pub const LANE_RECLAIMED: &str = "dispatch.lane.reclaimed";
    // Pool events
    pub const WORKER_SPAWNED: &str = "dispatch.worker.spawned";
    // Task events
    pub const TASK_SUBMITTED: &str = "dispatch.task.submitted";
    pub const TASK_STARTED: &str = "dispatch.task.started";
    pub const TASK_COMPLETED: &str = "dispatch.task.completed";
    pub const TASK_FAILED: &str = "dispatch.task.failed";
    // Main queue events
    pub const MAIN_QUEUE_DRAINED: &str = "dispatch.main.drained";
    // Lifecycle events
    pub const SHUTDOWN_STARTED: &str = "dispatch.shutdown.started";
    pub const SHUTDOWN_COMPLETE: &str = "dispatch.shutdown.complete";
}

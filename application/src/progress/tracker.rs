//! Topic-based event bus with per-session streams.
//!
//! Two delivery paths share every published event:
//!
//! - handler subscriptions ([`ProgressTracker::subscribe`]), called
//!   synchronously on the publishing task, filtered by [`Topic`]
//! - a broadcast channel ([`ProgressTracker::subscribe_stream`]) filtered to
//!   one session, for async consumers
//!
//! The handler list is read on every publish and written rarely, so it sits
//! behind an `RwLock` and is snapshotted before handlers run.

use crate::ports::event_subscriber::EventSubscriber;
use diligence_domain::{SessionEvent, SessionId, Topic};
use futures::Stream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{trace, warn};

const DEFAULT_STREAM_CAPACITY: usize = 1024;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    /// `None` receives every topic
    topic: Option<Topic>,
    handler: Arc<dyn EventSubscriber>,
}

pub struct ProgressTracker {
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    next_id: AtomicU64,
    stream: broadcast::Sender<SessionEvent>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_STREAM_CAPACITY)
    }

    /// `capacity` bounds how far a stream consumer may lag before it starts
    /// missing events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (stream, _) = broadcast::channel(capacity.max(1));
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            stream,
        }
    }

    /// Register `handler` for events on `topic`.
    pub fn subscribe(&self, topic: Topic, handler: Arc<dyn EventSubscriber>) -> SubscriptionId {
        self.add(Some(topic), handler)
    }

    /// Register `handler` for every topic.
    pub fn subscribe_all(&self, handler: Arc<dyn EventSubscriber>) -> SubscriptionId {
        self.add(None, handler)
    }

    fn add(&self, topic: Option<Topic>, handler: Arc<dyn EventSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(Subscription { id, topic, handler }));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.snapshot().len()
    }

    fn snapshot(&self) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Publish under the event's own topic.
    pub fn publish(&self, event: SessionEvent) {
        self.publish_to(event.topic(), event);
    }

    /// Deliver `event` to the handlers of `topic` and to stream consumers.
    pub fn publish_to(&self, topic: Topic, event: SessionEvent) {
        trace!(
            session_id = %event.session_id,
            sequence = event.sequence,
            event = event.kind.event_type(),
            "publish"
        );

        for subscription in self.snapshot() {
            if subscription.topic.is_none_or(|t| t == topic) {
                subscription.handler.on_event(&event);
            }
        }

        // No receivers is not an error.
        let _ = self.stream.send(event);
    }

    /// Stream of events for one session, starting now.
    pub fn subscribe_stream(&self, session_id: SessionId) -> SessionEventStream {
        SessionEventStream {
            session_id,
            receiver: self.stream.subscribe(),
        }
    }
}

/// Receiver side of [`ProgressTracker::subscribe_stream`].
pub struct SessionEventStream {
    session_id: SessionId,
    receiver: broadcast::Receiver<SessionEvent>,
}

impl SessionEventStream {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Next event of this session; `None` once the tracker is gone.
    ///
    /// A lagging consumer skips what it missed and keeps going.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.session_id == self.session_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(session_id = %self.session_id, missed, "Event stream lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = SessionEvent> {
        futures::stream::unfold(self, |mut stream| async move {
            stream.recv().await.map(|event| (event, stream))
        })
    }
}

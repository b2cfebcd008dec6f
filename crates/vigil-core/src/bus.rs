//! Topic-keyed publish/subscribe.
//!
//! [`EventBus`] is the seam the relay consumes. [`BroadcastBus`] is the
//! in-process implementation: one `tokio::sync::broadcast` channel per topic,
//! every subscriber sees every message published after it subscribed.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::events::SubmissionEvent;

#[derive(Clone, Debug, thiserror::Error)]
pub enum BusError {
    #[error("topic closed: {0}")]
    Closed(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// One subscriber's handle on a topic. Owned by exactly one listener.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message. `Ok(None)` means the topic was closed.
    async fn next(&mut self) -> Result<Option<SubmissionEvent>, BusError>;
}

pub trait EventBus: Send + Sync {
    fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, BusError>;

    /// Publish to every current subscriber. Returns how many received it.
    fn publish(&self, topic: &str, event: SubmissionEvent) -> Result<usize, BusError>;
}

pub struct BroadcastBus {
    topics: DashMap<String, broadcast::Sender<Arc<SubmissionEvent>>>,
    capacity: usize,
}

impl BroadcastBus {
    /// `capacity` bounds how far a slow subscriber may fall behind before
    /// it starts skipping messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Arc<SubmissionEvent>> {
        self.topics
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Drop a topic. Its subscribers drain what is buffered, then end.
    pub fn close_topic(&self, topic: &str) {
        if self.topics.remove(topic).is_some() {
            tracing::info!(topic, "bus topic closed");
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map_or(0, |tx| tx.receiver_count())
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus for BroadcastBus {
    fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, BusError> {
        let rx = self.sender(topic).subscribe();
        Ok(Box::new(BroadcastSubscription {
            topic: topic.to_owned(),
            rx,
        }))
    }

    fn publish(&self, topic: &str, event: SubmissionEvent) -> Result<usize, BusError> {
        // No receivers is not a failure: nobody is watching yet.
        Ok(self.sender(topic).send(Arc::new(event)).unwrap_or(0))
    }
}

struct BroadcastSubscription {
    topic: String,
    rx: broadcast::Receiver<Arc<SubmissionEvent>>,
}

#[async_trait]
impl Subscription for BroadcastSubscription {
    async fn next(&mut self) -> Result<Option<SubmissionEvent>, BusError> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Ok(Some(Arc::unwrap_or_clone(event))),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(topic = %self.topic, skipped = n, "bus subscriber lagged, dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}

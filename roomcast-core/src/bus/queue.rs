//! Topic-based publish/subscribe transport

use super::events::Envelope;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Publish/subscribe primitives the rest of roomcast is written against.
///
/// Delivery is at-most-once per subscriber and unordered across topics.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Start receiving every envelope published on `topic` from now on
    async fn subscribe(&self, topic: &str) -> crate::Result<Subscription>;

    /// Publish an envelope on its topic.
    ///
    /// Returns the number of subscribers it was handed to. Zero subscribers is
    /// not an error; an unavailable bus is.
    async fn publish(&self, envelope: Envelope) -> crate::Result<usize>;
}

/// Shared bus handle
pub type BusPtr = Arc<dyn Bus>;

/// A live subscription to one topic
pub struct Subscription {
    topic: String,
    rx: mpsc::Receiver<Envelope>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, rx: mpsc::Receiver<Envelope>) -> Self {
        Self {
            topic: topic.into(),
            rx,
        }
    }

    /// Topic this subscription listens on
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next envelope; `None` once the bus is closed
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Take an envelope if one is already queued
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

/// In-process bus
///
/// Each subscriber gets its own bounded queue; a subscriber that falls
/// `capacity` envelopes behind misses new ones. Closed subscriptions are
/// pruned lazily on the next publish to their topic.
#[derive(Clone)]
pub struct InMemoryBus {
    subscribers: Arc<RwLock<HashMap<String, Vec<mpsc::Sender<Envelope>>>>>,
    capacity: usize,
    published: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl InMemoryBus {
    /// Create a new in-memory bus with the default per-subscriber capacity
    pub fn new() -> Self {
        Self::with_capacity(crate::DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new in-memory bus with the given per-subscriber capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
            published: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of live subscriptions on a topic
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        let subscribers = self.subscribers.read().await;
        subscribers
            .get(topic)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Per-subscriber queue capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total envelopes accepted for publishing
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Close the bus. Subscriptions drain and then end; later publishes and
    /// subscribes fail with a transport error.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.write().await.clear();
        debug!("Bus closed");
    }

    /// Check if the bus has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> crate::Result<()> {
        if self.is_closed() {
            return Err(crate::Error::Transport("bus is closed".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn subscribe(&self, topic: &str) -> crate::Result<Subscription> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subscribers = self.subscribers.write().await;
        subscribers.entry(topic.to_string()).or_default().push(tx);
        debug!(topic = topic, "New subscription created");
        Ok(Subscription::new(topic, rx))
    }

    async fn publish(&self, envelope: Envelope) -> crate::Result<usize> {
        self.ensure_open()?;
        self.published.fetch_add(1, Ordering::Relaxed);

        let topic = envelope.topic.clone();
        let mut subscribers = self.subscribers.write().await;
        let Some(senders) = subscribers.get_mut(&topic) else {
            warn!(
                topic = %topic,
                sender = %envelope.sender,
                "Envelope dropped (no subscribers)"
            );
            return Ok(0);
        };

        senders.retain(|tx| !tx.is_closed());
        let mut delivered = 0;
        for tx in senders.iter() {
            match tx.try_send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(topic = %topic, "Subscriber lagging, envelope dropped");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }

        debug!(
            topic = %topic,
            sender = %envelope.sender,
            correlation_id = envelope.correlation_id.as_deref().unwrap_or("-"),
            receivers = delivered,
            "Envelope published"
        );
        Ok(delivered)
    }
}

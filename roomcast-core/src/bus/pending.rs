//! Table of requests waiting for a correlated response

use super::events::Envelope;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, warn};

struct PendingRequest {
    sender: oneshot::Sender<Envelope>,
    created_at: Instant,
    /// Request topic, for logging
    topic: String,
}

/// Counters kept by [`PendingRequests`]
#[derive(Debug, Default)]
pub struct PendingStats {
    pub registered: AtomicU64,
    pub completed: AtomicU64,
    pub timed_out: AtomicU64,
    /// Responses whose correlation id matched nothing in the table
    pub orphaned: AtomicU64,
}

/// Correlation id -> waiting caller.
///
/// An entry is removed the moment it is completed, cancelled or expired, so
/// one id resolves at most one waiter and a response can never reach a
/// caller registered under a different id.
#[derive(Default)]
pub struct PendingRequests {
    pending: Mutex<HashMap<String, PendingRequest>>,
    stats: PendingStats,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `correlation_id`.
    ///
    /// Fails if the id is already in flight.
    pub fn register(
        &self,
        correlation_id: &str,
        topic: &str,
    ) -> crate::Result<oneshot::Receiver<Envelope>> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock();
        if pending.contains_key(correlation_id) {
            return Err(crate::Error::Correlation(format!(
                "correlation id {} is already in flight",
                correlation_id
            )));
        }
        pending.insert(
            correlation_id.to_string(),
            PendingRequest {
                sender: tx,
                created_at: Instant::now(),
                topic: topic.to_string(),
            },
        );
        self.stats.registered.fetch_add(1, Ordering::Relaxed);
        debug!(correlation_id = correlation_id, topic = topic, "Registered pending request");
        Ok(rx)
    }

    /// Hand a response to whoever registered its correlation id.
    ///
    /// Returns false when nobody is waiting for it any more.
    pub fn complete(&self, response: Envelope) -> bool {
        let Some(correlation_id) = response.correlation_id.clone() else {
            warn!(sender = %response.sender, "Response without correlation id dropped");
            self.stats.orphaned.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let Some(waiter) = self.pending.lock().remove(&correlation_id) else {
            warn!(
                correlation_id = %correlation_id,
                "Response for unknown or expired correlation id"
            );
            self.stats.orphaned.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let elapsed = waiter.created_at.elapsed();
        match waiter.sender.send(response) {
            Ok(()) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %correlation_id,
                    topic = %waiter.topic,
                    response_time_ms = elapsed.as_millis() as u64,
                    "Completed pending request"
                );
                true
            }
            Err(_) => {
                debug!(
                    correlation_id = %correlation_id,
                    topic = %waiter.topic,
                    "Pending request receiver dropped"
                );
                false
            }
        }
    }

    /// Forget a waiter whose deadline passed
    pub fn expire(&self, correlation_id: &str) -> bool {
        let removed = self.pending.lock().remove(correlation_id);
        match removed {
            Some(waiter) => {
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(
                    correlation_id = correlation_id,
                    topic = %waiter.topic,
                    elapsed_ms = waiter.created_at.elapsed().as_millis() as u64,
                    "Pending request timed out"
                );
                true
            }
            None => false,
        }
    }

    /// Forget a waiter without counting it as a timeout (publish failed)
    pub fn cancel(&self, correlation_id: &str) -> bool {
        self.pending.lock().remove(correlation_id).is_some()
    }

    /// Drop every waiter; their receivers observe a closed channel
    pub fn clear(&self) {
        self.pending.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.pending.lock().contains_key(correlation_id)
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

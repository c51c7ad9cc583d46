//! Awaitable request/response on top of publish/subscribe

use super::events::Envelope;
use super::pending::PendingRequests;
use super::queue::BusPtr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Issues correlated requests over a bus.
///
/// One listener task subscribes to the response topic and routes every
/// response into the pending table by correlation id. Dropping the requester
/// stops the listener.
pub struct Requester {
    bus: BusPtr,
    response_topic: String,
    pending: Arc<PendingRequests>,
    listener: JoinHandle<()>,
}

impl Requester {
    /// Subscribe to `response_topic` and start routing responses
    pub async fn start(bus: BusPtr, response_topic: impl Into<String>) -> crate::Result<Self> {
        let response_topic = response_topic.into();
        let mut responses = bus.subscribe(&response_topic).await?;
        let pending = Arc::new(PendingRequests::new());

        let table = pending.clone();
        let topic = response_topic.clone();
        let listener = tokio::spawn(async move {
            while let Some(response) = responses.recv().await {
                table.complete(response);
            }
            debug!(topic = %topic, "Response listener stopped");
            // Nothing can answer the remaining waiters now
            table.clear();
        });

        Ok(Self {
            bus,
            response_topic,
            pending,
            listener,
        })
    }

    /// Publish `envelope` and wait for the response carrying its correlation id.
    ///
    /// A missing correlation id is generated. With `timeout = None` the wait
    /// is unbounded. Dropping the returned future abandons the call and
    /// removes its waiter.
    pub async fn request(
        &self,
        mut envelope: Envelope,
        timeout: Option<Duration>,
    ) -> crate::Result<Envelope> {
        let correlation_id = envelope.ensure_correlation_id().to_string();
        // Register before publishing so a fast responder cannot miss the waiter
        let rx = self.pending.register(&correlation_id, &envelope.topic)?;
        let mut waiter = WaiterGuard {
            pending: &self.pending,
            correlation_id: &correlation_id,
            settled: false,
        };

        self.bus.publish(envelope).await?;

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    waiter.settled = true;
                    self.pending.expire(&correlation_id);
                    return Err(crate::Error::Correlation(format!(
                        "no response for {} within {:?}",
                        correlation_id, limit
                    )));
                }
            },
            None => rx.await,
        };
        // Completed or cleared by the listener; the entry is already gone
        waiter.settled = true;

        outcome.map_err(|_| {
            warn!(correlation_id = %correlation_id, "Response channel closed while waiting");
            crate::Error::Correlation(format!(
                "response listener on {} closed before {} was answered",
                self.response_topic, correlation_id
            ))
        })
    }

    /// Topic responses are read from
    pub fn response_topic(&self) -> &str {
        &self.response_topic
    }

    /// Pending-request table, for inspection
    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }
}

/// Removes the waiter of a call that ended without being settled: the
/// publish failed or the caller dropped the future.
struct WaiterGuard<'a> {
    pending: &'a PendingRequests,
    correlation_id: &'a str,
    settled: bool,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.pending.cancel(self.correlation_id) {
            debug!(correlation_id = self.correlation_id, "Abandoned pending request");
        }
    }
}

impl Drop for Requester {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::events::topics;
    use crate::bus::queue::{Bus, InMemoryBus};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    /// Answers every request on `topic` with an event id derived from its correlation id
    async fn spawn_echo_responder(bus: InMemoryBus, topic: &str) {
        let mut requests = bus.subscribe(topic).await.unwrap();
        tokio::spawn(async move {
            while let Some(req) = requests.recv().await {
                let id = req.correlation_id.clone().unwrap_or_default();
                let reply = Envelope::new(
                    topics::MESSAGE_RESPONSE,
                    "echo",
                    json!({ "eventId": format!("${}", id) }),
                )
                .with_correlation_id(id);
                let _ = bus.publish(reply).await;
            }
        });
    }

    #[tokio::test]
    async fn test_request_resolves_with_matching_response() {
        let bus = InMemoryBus::new();
        spawn_echo_responder(bus.clone(), topics::MESSAGE_SEND).await;
        let requester = Requester::start(Arc::new(bus), topics::MESSAGE_RESPONSE)
            .await
            .unwrap();

        let req = Envelope::new(topics::MESSAGE_SEND, "test", json!({})).with_correlation_id("r1");
        let resp = requester
            .request(req, Some(Duration::from_secs(2)))
            .await
            .unwrap();

        assert_eq!(resp.correlation_id.as_deref(), Some("r1"));
        assert_eq!(resp.data, json!({"eventId": "$r1"}));
        assert!(requester.pending().is_empty());
    }

    #[tokio::test]
    async fn test_request_times_out_without_responder() {
        let bus = InMemoryBus::new();
        let requester = Requester::start(Arc::new(bus), topics::MESSAGE_RESPONSE)
            .await
            .unwrap();

        let req = Envelope::new(topics::MESSAGE_SEND, "test", json!({}));
        let err = requester
            .request(req, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();

        assert!(err.is_correlation());
        assert!(requester.pending().is_empty());
    }

    #[tokio::test]
    async fn test_request_on_closed_bus_is_transport_error() {
        let bus = InMemoryBus::new();
        let requester = Requester::start(Arc::new(bus.clone()), topics::MESSAGE_RESPONSE)
            .await
            .unwrap();
        bus.close().await;

        let req = Envelope::new(topics::MESSAGE_SEND, "test", json!({}));
        let err = requester.request(req, None).await.unwrap_err();
        assert!(matches!(err, crate::Error::Transport(_)));
        assert!(requester.pending().is_empty());
    }

    #[tokio::test]
    async fn test_request_assigns_missing_correlation_id() {
        let bus = InMemoryBus::new();
        spawn_echo_responder(bus.clone(), topics::MESSAGE_SEND).await;
        let requester = Requester::start(Arc::new(bus), topics::MESSAGE_RESPONSE)
            .await
            .unwrap();

        let mut req = Envelope::new(topics::MESSAGE_SEND, "test", json!({}));
        req.correlation_id = None;
        let resp = requester
            .request(req, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert!(resp.correlation_id.is_some());
    }

    #[tokio::test]
    async fn test_abandoned_requests_leave_no_waiters() {
        let bus = InMemoryBus::new();
        let requester = Requester::start(Arc::new(bus), topics::MESSAGE_RESPONSE)
            .await
            .unwrap();

        for _ in 0..100 {
            let req = Envelope::new(topics::MESSAGE_SEND, "test", json!({}));
            let abandoned =
                tokio::time::timeout(Duration::from_millis(1), requester.request(req, None)).await;
            assert!(abandoned.is_err());
        }

        assert!(requester.pending().is_empty());
        assert_eq!(requester.pending().stats().registered.load(Ordering::Relaxed), 100);
        assert_eq!(requester.pending().stats().timed_out.load(Ordering::Relaxed), 0);
    }
}

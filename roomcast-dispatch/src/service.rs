//! Delivery dispatcher
//!
//! Consumes send requests from the bus, delivers them through the intent of
//! the requested identity and answers each one on the response topic with the
//! same correlation id.

use crate::crypto::EncryptionBootstrapper;
use crate::identity::IdentityResolver;
use crate::intent::{IntentError, IntentProviderPtr};
use crate::policy::{choose_path, message_subtype, SendPath};
use roomcast_core::bus::{
    topics, BusPtr, DeliveryResponse, Envelope, SendMessageRequest, SendStateEventRequest,
};
use roomcast_core::config::{Config, EncryptionConfig};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Why a request could not be delivered
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Resolving, registering, joining or bootstrapping the identity failed
    #[error("Identity stage failed: {0}")]
    Identity(#[source] IntentError),

    /// The remote endpoint failed the send
    #[error("Delivery failed: {0}")]
    Delivery(#[source] IntentError),
}

/// Serves `message.send` and `state_event.send`
pub struct DispatchService {
    bus: BusPtr,
    resolver: IdentityResolver,
    bootstrapper: EncryptionBootstrapper,
    encryption: EncryptionConfig,
    component_name: String,
    span: Span,
}

impl DispatchService {
    pub fn new(bus: BusPtr, provider: IntentProviderPtr, config: &Config) -> Self {
        Self {
            bus,
            resolver: IdentityResolver::new(provider, config.identity.default_identity.clone()),
            bootstrapper: EncryptionBootstrapper::new(),
            encryption: config.encryption.clone(),
            component_name: config.bus.component_name.clone(),
            span: Span::current(),
        }
    }

    /// Parent span for every per-request span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Subscribe to both request topics and serve them until shut down.
    ///
    /// Every envelope is handled in its own task, so a slow delivery never
    /// holds up the subscription loop.
    pub async fn start(self: Arc<Self>) -> roomcast_core::Result<DispatchHandle> {
        let mut messages = self.bus.subscribe(topics::MESSAGE_SEND).await?;
        let mut state_events = self.bus.subscribe(topics::STATE_EVENT_SEND).await?;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        info!(component = %self.component_name, "Dispatch service started");
        let service = self;
        let task = tokio::spawn(async move {
            loop {
                let mut envelope = tokio::select! {
                    _ = &mut shutdown_rx => break,
                    Some(envelope) = messages.recv() => envelope,
                    Some(envelope) = state_events.recv() => envelope,
                    else => break,
                };

                let correlation_id = envelope.ensure_correlation_id().to_string();
                let span = info_span!(
                    parent: &service.span,
                    "dispatch",
                    correlation_id = %correlation_id,
                    topic = %envelope.topic
                );
                let worker = service.clone();
                tokio::spawn(async move { worker.process(envelope).await }.instrument(span));
            }
            info!(component = %service.component_name, "Dispatch service stopped");
        });

        Ok(DispatchHandle {
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    /// Deliver a timeline message. Never fails: every outcome is a response.
    pub async fn handle_send(&self, request: SendMessageRequest) -> DeliveryResponse {
        match self.try_send(&request).await {
            Ok(event_id) => {
                info!(room_id = %request.room_id, event_id = %event_id, "Message delivered");
                DeliveryResponse::success(event_id)
            }
            Err(e) => {
                self.log_failure(&request.room_id, &e);
                DeliveryResponse::failure()
            }
        }
    }

    /// Deliver a state event. State events never go through the encryption
    /// bootstrap.
    pub async fn handle_send_state(&self, request: SendStateEventRequest) -> DeliveryResponse {
        match self.try_send_state(&request).await {
            Ok(event_id) => {
                info!(
                    room_id = %request.message.room_id,
                    state_key = %request.state_key,
                    event_id = %event_id,
                    "State event delivered"
                );
                DeliveryResponse::success(event_id)
            }
            Err(e) => {
                self.log_failure(&request.message.room_id, &e);
                DeliveryResponse::failure()
            }
        }
    }

    async fn try_send(&self, request: &SendMessageRequest) -> Result<String, DispatchError> {
        let intent = self
            .resolver
            .resolve(request.sender_identity.as_deref())
            .await
            .map_err(DispatchError::Identity)?;

        if self.encryption.enabled {
            self.bootstrapper
                .bootstrap(intent.as_ref(), &request.room_id)
                .await
                .map_err(DispatchError::Identity)?;
        } else {
            self.resolver
                .prepare(intent.as_ref(), &request.room_id)
                .await
                .map_err(DispatchError::Identity)?;
        }

        let subtype = message_subtype(&request.content);
        let path = choose_path(subtype, &self.encryption);
        debug!(identity = intent.user_id(), subtype = subtype, path = ?path, "Sending message");

        let sent = match path {
            SendPath::Encrypted => {
                intent
                    .send_event(&request.room_id, &request.event_type, &request.content)
                    .await
            }
            SendPath::Raw => {
                intent
                    .send_raw_event(&request.room_id, &request.event_type, &request.content)
                    .await
            }
        };
        sent.map_err(DispatchError::Delivery)
    }

    async fn try_send_state(&self, request: &SendStateEventRequest) -> Result<String, DispatchError> {
        let message = &request.message;
        let intent = self
            .resolver
            .resolve(message.sender_identity.as_deref())
            .await
            .map_err(DispatchError::Identity)?;
        self.resolver
            .prepare(intent.as_ref(), &message.room_id)
            .await
            .map_err(DispatchError::Identity)?;

        intent
            .send_state_event(
                &message.room_id,
                &message.event_type,
                &request.state_key,
                &message.content,
            )
            .await
            .map_err(DispatchError::Delivery)
    }

    /// Handle one request envelope and publish exactly one response
    async fn process(&self, envelope: Envelope) {
        let response = match envelope.topic.as_str() {
            topics::MESSAGE_SEND => match envelope.decode::<SendMessageRequest>() {
                Ok(request) => self.handle_send(request).await,
                Err(e) => self.reject(&e),
            },
            topics::STATE_EVENT_SEND => match envelope.decode::<SendStateEventRequest>() {
                Ok(request) => self.handle_send_state(request).await,
                Err(e) => self.reject(&e),
            },
            other => self.reject(&format!("unexpected topic {}", other)),
        };

        let reply = Envelope::reply(&envelope, self.component_name.as_str(), &response);
        if let Err(e) = self.bus.publish(reply).await {
            error!(error = %e, "Failed to publish response");
        }
    }

    /// Answer a request that cannot be decoded
    fn reject(&self, reason: &dyn std::fmt::Display) -> DeliveryResponse {
        warn!(error = %reason, "Rejecting malformed request");
        DeliveryResponse::failure()
    }

    fn log_failure(&self, room_id: &str, e: &DispatchError) {
        match e {
            DispatchError::Identity(_) => {
                warn!(room_id = room_id, error = %e, "Could not prepare sender identity")
            }
            DispatchError::Delivery(_) => error!(room_id = room_id, error = %e, "Delivery failed"),
        }
    }
}

/// Running dispatcher. Dropping the handle also stops the subscription loop.
pub struct DispatchHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl DispatchHandle {
    /// Stop taking new envelopes and wait for the loop to exit. Handlers
    /// already spawned run to completion.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            error!(error = %e, "Dispatch loop ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

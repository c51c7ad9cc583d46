//! Producer-side request client

use roomcast_core::bus::{
    topics, BusPtr, DeliveryResponse, Envelope, Requester, SendMessageRequest,
    SendStateEventRequest,
};
use roomcast_core::config::Config;
use roomcast_core::{Error, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info_span, warn, Instrument, Span};

/// Event type used for timeline messages built by [`RequestClient::send_text`]
pub const ROOM_MESSAGE: &str = "m.room.message";

/// Arguments of a state event send
#[derive(Debug, Clone, Default)]
pub struct StateEventParams {
    pub room_id: String,
    pub event_type: String,
    pub content: Value,
    /// Empty by default; the empty string is a valid state key
    pub state_key: String,
    pub sender_identity: Option<String>,
}

impl StateEventParams {
    pub fn new(room_id: impl Into<String>, event_type: impl Into<String>, content: Value) -> Self {
        Self {
            room_id: room_id.into(),
            event_type: event_type.into(),
            content,
            ..Default::default()
        }
    }

    pub fn with_state_key(mut self, state_key: impl Into<String>) -> Self {
        self.state_key = state_key.into();
        self
    }

    pub fn with_sender(mut self, identity: Option<String>) -> Self {
        self.sender_identity = identity;
        self
    }
}

/// Sends delivery requests over the bus and waits for their outcome.
///
/// Any number of calls may be in flight at once; each one is matched to its
/// own response by correlation id. Nothing is retried.
pub struct RequestClient {
    requester: Requester,
    component_name: String,
    timeout: Option<Duration>,
    span: Span,
}

impl RequestClient {
    /// Start listening for responses on `bus`
    pub async fn new(bus: BusPtr, config: &Config) -> Result<Self> {
        let requester = Requester::start(bus, topics::MESSAGE_RESPONSE).await?;
        Ok(Self {
            requester,
            component_name: config.bus.component_name.clone(),
            timeout: config.bus.request_timeout(),
            span: Span::current(),
        })
    }

    /// Parent span for every per-request span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Override the response deadline; `None` waits forever
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Requests still waiting for a response
    pub fn in_flight(&self) -> usize {
        self.requester.pending().len()
    }

    /// Send a timeline event and return its event id
    pub async fn send_message(
        &self,
        room_id: &str,
        content: Value,
        event_type: &str,
        sender_identity: Option<&str>,
    ) -> Result<String> {
        let request = SendMessageRequest::new(room_id, event_type, content)
            .with_sender(sender_identity.map(str::to_string));
        self.call("send_message", topics::MESSAGE_SEND, &request)
            .await
    }

    /// Set a state event and return its event id
    pub async fn send_state_event(&self, params: StateEventParams) -> Result<String> {
        let message = SendMessageRequest::new(params.room_id, params.event_type, params.content)
            .with_sender(params.sender_identity);
        let request = SendStateEventRequest::new(message, params.state_key);
        self.call("send_state_event", topics::STATE_EVENT_SEND, &request)
            .await
    }

    /// Send a plain text message of the given subtype (`text`, `notice`,
    /// `emote`...). Bare subtypes get the `m.` namespace.
    pub async fn send_text(
        &self,
        room_id: &str,
        text: &str,
        subtype: &str,
        sender_identity: Option<&str>,
    ) -> Result<String> {
        let content = text_content(text, subtype);
        self.send_message(room_id, content, ROOM_MESSAGE, sender_identity)
            .await
    }

    async fn call<T: Serialize>(&self, operation: &str, topic: &str, payload: &T) -> Result<String> {
        let envelope = Envelope::with_payload(topic, self.component_name.as_str(), payload)?;
        let span = info_span!(
            parent: &self.span,
            "request",
            operation = operation,
            correlation_id = envelope.correlation_id.as_deref().unwrap_or_default()
        );

        async move {
            let response = self.requester.request(envelope, self.timeout).await?;
            match DeliveryResponse::from_value(&response.data)? {
                DeliveryResponse::Success { event_id } => {
                    debug!(event_id = %event_id, "Request succeeded");
                    Ok(event_id)
                }
                DeliveryResponse::Failure { .. } => {
                    warn!("Request answered with failure");
                    Err(Error::Delivery(operation.to_string()))
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Content object of a text message
pub fn text_content(text: &str, subtype: &str) -> Value {
    let msgtype = if subtype.contains('.') {
        subtype.to_string()
    } else {
        format!("m.{}", subtype)
    };
    json!({ "msgtype": msgtype, "body": text })
}

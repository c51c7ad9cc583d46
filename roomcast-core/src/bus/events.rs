//! Wire types carried over the bus

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known bus topics
pub mod topics {
    /// Timeline message send requests
    pub const MESSAGE_SEND: &str = "message.send";
    /// State event send requests
    pub const STATE_EVENT_SEND: &str = "state_event.send";
    /// Responses to both request topics
    pub const MESSAGE_RESPONSE: &str = "message.response";
}

/// Generate a fresh correlation id
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A message on the bus
///
/// `sender` names the producing component, not the delivery identity. The
/// delivery identity, when there is one, lives inside `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Topic the envelope is published on
    pub topic: String,
    /// Producing component name
    pub sender: String,
    /// Topic-specific payload
    #[serde(default)]
    pub data: Value,
    /// Links a request to its response. Producers normally set it; a consumer
    /// assigns one on receipt when it is missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Envelope {
    /// Create a new envelope with a fresh correlation id
    pub fn new(topic: impl Into<String>, sender: impl Into<String>, data: Value) -> Self {
        Self {
            topic: topic.into(),
            sender: sender.into(),
            data,
            correlation_id: Some(new_correlation_id()),
        }
    }

    /// Create an envelope whose payload is the JSON form of `payload`
    pub fn with_payload<T: Serialize>(
        topic: impl Into<String>,
        sender: impl Into<String>,
        payload: &T,
    ) -> crate::Result<Self> {
        Ok(Self::new(topic, sender, serde_json::to_value(payload)?))
    }

    /// Build the response to `request`, carrying the same correlation id
    pub fn reply(request: &Envelope, sender: impl Into<String>, response: &DeliveryResponse) -> Self {
        Self {
            topic: topics::MESSAGE_RESPONSE.to_string(),
            sender: sender.into(),
            data: response.to_value(),
            correlation_id: request.correlation_id.clone(),
        }
    }

    /// Replace the correlation id
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Return the correlation id, assigning a fresh one if it is missing or empty
    pub fn ensure_correlation_id(&mut self) -> &str {
        let missing = self
            .correlation_id
            .as_deref()
            .map_or(true, |id| id.trim().is_empty());
        if missing {
            self.correlation_id = Some(new_correlation_id());
        }
        self.correlation_id.as_deref().unwrap_or_default()
    }

    /// Decode the payload into a typed request or response
    pub fn decode<T: DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Request to send a timeline event into a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub room_id: String,
    pub event_type: String,
    pub content: Value,
    /// Account to send as; the default system identity when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_identity: Option<String>,
}

impl SendMessageRequest {
    /// Create a new message request sent as the default identity
    pub fn new(room_id: impl Into<String>, event_type: impl Into<String>, content: Value) -> Self {
        Self {
            room_id: room_id.into(),
            event_type: event_type.into(),
            content,
            sender_identity: None,
        }
    }

    /// Send as the given identity instead of the default one
    pub fn with_sender(mut self, identity: Option<String>) -> Self {
        self.sender_identity = identity;
        self
    }
}

/// Request to set a state event in a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendStateEventRequest {
    #[serde(flatten)]
    pub message: SendMessageRequest,
    /// Required on the wire; the empty string is a valid key
    pub state_key: String,
}

impl SendStateEventRequest {
    pub fn new(message: SendMessageRequest, state_key: impl Into<String>) -> Self {
        Self {
            message,
            state_key: state_key.into(),
        }
    }
}

/// Outcome of a send request, published on [`topics::MESSAGE_RESPONSE`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeliveryResponse {
    /// The remote endpoint accepted the event
    Success {
        #[serde(rename = "eventId")]
        event_id: String,
    },
    /// Any failure; the details stay in the dispatcher's logs
    Failure { failed: bool },
}

impl DeliveryResponse {
    pub fn success(event_id: impl Into<String>) -> Self {
        DeliveryResponse::Success {
            event_id: event_id.into(),
        }
    }

    pub fn failure() -> Self {
        DeliveryResponse::Failure { failed: true }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryResponse::Success { .. })
    }

    /// JSON form used as envelope payload
    pub fn to_value(&self) -> Value {
        match self {
            DeliveryResponse::Success { event_id } => serde_json::json!({ "eventId": event_id }),
            DeliveryResponse::Failure { .. } => serde_json::json!({ "failed": true }),
        }
    }

    /// Recognize one of the two response shapes.
    ///
    /// A string `eventId` is a success, `failed: true` is a failure. Anything
    /// else (including `failed: false`) is a correlation error.
    pub fn from_value(value: &Value) -> crate::Result<Self> {
        if let Some(event_id) = value.get("eventId").and_then(Value::as_str) {
            return Ok(DeliveryResponse::success(event_id));
        }
        if value.get("failed").and_then(Value::as_bool) == Some(true) {
            return Ok(DeliveryResponse::failure());
        }
        Err(crate::Error::Correlation(format!(
            "unrecognized response shape: {}",
            value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_wire_shape() {
        let env = Envelope::new(topics::MESSAGE_SEND, "bridge", json!({"a": 1}))
            .with_correlation_id("c-1");
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({
                "topic": "message.send",
                "sender": "bridge",
                "data": {"a": 1},
                "correlationId": "c-1"
            })
        );
    }

    #[test]
    fn test_envelope_missing_correlation_id_is_assigned() {
        let mut env: Envelope =
            serde_json::from_value(json!({"topic": "message.send", "sender": "x", "data": {}}))
                .unwrap();
        assert!(env.correlation_id.is_none());

        let assigned = env.ensure_correlation_id().to_string();
        assert!(!assigned.is_empty());
        // A second call keeps the same id
        assert_eq!(env.ensure_correlation_id(), assigned);
    }

    #[test]
    fn test_envelope_empty_correlation_id_is_replaced() {
        let mut env = Envelope::new("t", "s", Value::Null).with_correlation_id("  ");
        let id = env.ensure_correlation_id().to_string();
        assert!(!id.trim().is_empty());
    }

    #[test]
    fn test_fresh_correlation_ids_are_distinct() {
        let a = Envelope::new("t", "s", Value::Null);
        let b = Envelope::new("t", "s", Value::Null);
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[test]
    fn test_reply_keeps_correlation_id() {
        let req = Envelope::new(topics::STATE_EVENT_SEND, "bridge", Value::Null)
            .with_correlation_id("abc");
        let reply = Envelope::reply(&req, "dispatcher", &DeliveryResponse::success("$e"));
        assert_eq!(reply.topic, topics::MESSAGE_RESPONSE);
        assert_eq!(reply.correlation_id.as_deref(), Some("abc"));
        assert_eq!(reply.data, json!({"eventId": "$e"}));
    }

    #[test]
    fn test_send_message_request_camel_case() {
        let req = SendMessageRequest::new("!room:hs", "m.room.message", json!({"body": "hi"}))
            .with_sender(Some("@alice:hs".into()));
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["roomId"], "!room:hs");
        assert_eq!(value["eventType"], "m.room.message");
        assert_eq!(value["senderIdentity"], "@alice:hs");
    }

    #[test]
    fn test_sender_identity_omitted_when_default() {
        let req = SendMessageRequest::new("!r:hs", "m.room.message", json!({}));
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("senderIdentity").is_none());
    }

    #[test]
    fn test_state_request_keeps_empty_state_key() {
        let req = SendStateEventRequest::new(
            SendMessageRequest::new("!r:hs", "m.room.name", json!({"name": "Lobby"})),
            "",
        );
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["stateKey"], "");
        assert_eq!(value["roomId"], "!r:hs");

        let back: SendStateEventRequest = serde_json::from_value(value).unwrap();
        assert_eq!(back.state_key, "");
    }

    #[test]
    fn test_state_request_requires_state_key() {
        let result = serde_json::from_value::<SendStateEventRequest>(json!({
            "roomId": "!r:hs",
            "eventType": "m.room.topic",
            "content": {}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_response_shapes() {
        assert_eq!(
            DeliveryResponse::from_value(&json!({"eventId": "$abc"})).unwrap(),
            DeliveryResponse::success("$abc")
        );
        assert_eq!(
            DeliveryResponse::from_value(&json!({"failed": true})).unwrap(),
            DeliveryResponse::failure()
        );
        assert!(DeliveryResponse::from_value(&json!({"failed": false})).is_err());
        assert!(DeliveryResponse::from_value(&json!({"ok": 1})).is_err());
        assert!(DeliveryResponse::from_value(&json!({"eventId": 7})).is_err());
    }

    #[test]
    fn test_response_serialization_matches_to_value() {
        let success = DeliveryResponse::success("$x");
        assert_eq!(serde_json::to_value(&success).unwrap(), success.to_value());
        let failure = DeliveryResponse::failure();
        assert_eq!(serde_json::to_value(&failure).unwrap(), failure.to_value());
    }
}

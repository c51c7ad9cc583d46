use roomcast_client::{RequestClient, StateEventParams, ROOM_MESSAGE};
use roomcast_core::bus::InMemoryBus;
use roomcast_core::config::{Config, EncryptionConfig};
use roomcast_dispatch::{DispatchHandle, DispatchService, IntentCall, LoopbackProvider};
use serde_json::json;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

async fn setup(encryption: EncryptionConfig) -> (RequestClient, LoopbackProvider, DispatchHandle) {
    let bus = Arc::new(InMemoryBus::new());
    let provider = LoopbackProvider::new();
    let mut config = Config::default();
    config.identity.default_identity = "@bot:hs".to_string();
    config.bus.request_timeout_secs = 5;
    config.encryption = encryption;

    let service = Arc::new(DispatchService::new(
        bus.clone(),
        Arc::new(provider.clone()),
        &config,
    ));
    let handle = service.start().await.expect("start dispatcher");
    let client = RequestClient::new(bus, &config)
        .await
        .expect("start client");
    (client, provider, handle)
}

#[tokio::test]
async fn send_text_resolves_to_event_id() {
    let (client, provider, handle) = setup(EncryptionConfig::default()).await;

    let event_id = timeout(
        Duration::from_secs(5),
        client.send_text("!r:hs", "hello", "text", None),
    )
    .await
    .expect("answered in time")
    .expect("delivered");
    assert!(event_id.starts_with('$'));

    let sends = provider.sends();
    assert_eq!(sends.len(), 1);
    match &sends[0] {
        IntentCall::SendRawEvent {
            room_id, content, ..
        } => {
            assert_eq!(room_id, "!r:hs");
            assert_eq!(content["msgtype"], "m.text");
            assert_eq!(content["body"], "hello");
        }
        other => panic!("unexpected call {:?}", other),
    }

    handle.shutdown().await;
}

#[tokio::test]
async fn rejected_sender_fails_instead_of_hanging() {
    let (client, provider, handle) = setup(EncryptionConfig::enabled()).await;
    provider.reject_identity("@mallory:hs");

    let err = timeout(
        Duration::from_secs(5),
        client.send_message("!r:hs", json!({"body": "x"}), ROOM_MESSAGE, Some("@mallory:hs")),
    )
    .await
    .expect("answered in time")
    .unwrap_err();
    assert!(err.is_delivery());

    handle.shutdown().await;
}

#[tokio::test]
async fn concurrent_senders_get_their_own_results() {
    let (client, provider, handle) = setup(EncryptionConfig::enabled()).await;
    provider.fail_sends_in("!broken:hs");

    let (ok, failed, notice) = tokio::join!(
        client.send_text("!r:hs", "fine", "text", Some("@alice:hs")),
        client.send_text("!broken:hs", "nope", "text", Some("@bob:hs")),
        client.send_text("!r:hs", "fyi", "notice", None),
    );
    assert!(ok.expect("alice delivered").starts_with('$'));
    assert!(failed.unwrap_err().is_delivery());
    assert!(notice.expect("notice delivered").starts_with('$'));
    assert_eq!(client.in_flight(), 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn state_event_round_trip() {
    let (client, provider, handle) = setup(EncryptionConfig::default()).await;

    let params = StateEventParams::new("!r:hs", "m.room.topic", json!({"topic": "Weekly sync"}))
        .with_sender(Some("@alice:hs".to_string()));
    let event_id = client.send_state_event(params).await.expect("delivered");
    assert!(event_id.starts_with('$'));

    let calls = provider.calls_for("@alice:hs", "!r:hs");
    assert!(calls.iter().any(|c| matches!(
        c,
        IntentCall::SendStateEvent { state_key, event_type, .. }
            if state_key.is_empty() && event_type == "m.room.topic"
    )));

    handle.shutdown().await;
}

use serde_json::json;

use direct_chat::events::{ClientEvent, EventKind, PresenceStatus, ServerEvent};

#[test]
fn client_events_use_tagged_camel_case_wire_shape() {
    let event = ClientEvent::SendMessage {
        receiver_id: "u2".to_string(),
        content: "hello".to_string(),
    };
    let value = serde_json::to_value(&event).expect("serialize");
    assert_eq!(
        value,
        json!({"type": "send-message", "receiverId": "u2", "content": "hello"})
    );

    let value = serde_json::to_value(&ClientEvent::Logout).expect("serialize");
    assert_eq!(value, json!({"type": "logout"}));

    let value = serde_json::to_value(&ClientEvent::TypingStart {
        receiver_id: "u2".to_string(),
    })
    .expect("serialize");
    assert_eq!(value, json!({"type": "typing-start", "receiverId": "u2"}));
}

#[test]
fn online_snapshot_deserializes() {
    let raw = r#"{
        "type": "online-snapshot",
        "users": [
            {"id": "u2", "username": "bob"},
            {"id": "u3", "username": "carol"}
        ]
    }"#;
    let event: ServerEvent = serde_json::from_str(raw).expect("deserialize");
    match event {
        ServerEvent::OnlineSnapshot { users } => {
            assert_eq!(users.len(), 2);
            assert_eq!(users[0].username, "bob");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn status_delta_deserializes_uppercase_status() {
    let raw = r#"{"type": "status-delta", "userId": "u2", "username": "bob", "status": "ONLINE"}"#;
    let event: ServerEvent = serde_json::from_str(raw).expect("deserialize");
    assert_eq!(
        event,
        ServerEvent::StatusDelta {
            user_id: "u2".to_string(),
            username: "bob".to_string(),
            status: PresenceStatus::Online,
        }
    );

    let raw = r#"{"type": "status-delta", "userId": "u2", "username": "bob", "status": "OFFLINE"}"#;
    let event: ServerEvent = serde_json::from_str(raw).expect("deserialize");
    assert!(matches!(
        event,
        ServerEvent::StatusDelta {
            status: PresenceStatus::Offline,
            ..
        }
    ));
}

#[test]
fn message_events_tolerate_missing_username_labels() {
    // The receive side carries labels, the history/ack side may not; both
    // must parse and default the labels to empty strings.
    let raw = r#"{
        "type": "message-sent-ack",
        "id": "m1",
        "content": "hi",
        "senderId": "u1",
        "receiverId": "u2",
        "createdAt": "2026-08-30T12:00:00Z"
    }"#;
    let event: ServerEvent = serde_json::from_str(raw).expect("deserialize");
    match event {
        ServerEvent::MessageSentAck(message) => {
            assert_eq!(message.id, "m1");
            assert_eq!(message.sender_username, "");
            assert_eq!(message.receiver_username, "");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn event_kinds_map_one_to_one() {
    let raw = r#"{"type": "typing-start", "userId": "u2", "username": "bob"}"#;
    let event: ServerEvent = serde_json::from_str(raw).expect("deserialize");
    assert_eq!(event.kind(), EventKind::TypingStart);
    assert_eq!(ServerEvent::PresenceResync.kind(), EventKind::PresenceResync);
}

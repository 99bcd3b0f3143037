use serde::{Deserialize, Serialize};

use crate::models::{Message, OnlineUser};

/// Events emitted by this client over the websocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "send-message", rename_all = "camelCase")]
    SendMessage { receiver_id: String, content: String },
    #[serde(rename = "request-online")]
    RequestOnline,
    #[serde(rename = "typing-start", rename_all = "camelCase")]
    TypingStart { receiver_id: String },
    #[serde(rename = "typing-stop", rename_all = "camelCase")]
    TypingStop { receiver_id: String },
    #[serde(rename = "logout")]
    Logout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Events delivered by the server. `PresenceResync` is synthetic: the
/// connection manager dispatches it after a mid-session reconnect so
/// presence owners know to request a fresh snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "message-received")]
    MessageReceived(Message),
    #[serde(rename = "message-sent-ack")]
    MessageSentAck(Message),
    #[serde(rename = "online-snapshot")]
    OnlineSnapshot { users: Vec<OnlineUser> },
    #[serde(rename = "status-delta", rename_all = "camelCase")]
    StatusDelta {
        user_id: String,
        username: String,
        status: PresenceStatus,
    },
    #[serde(rename = "typing-start", rename_all = "camelCase")]
    TypingStart { user_id: String, username: String },
    #[serde(rename = "typing-stop", rename_all = "camelCase")]
    TypingStop { user_id: String, username: String },
    #[serde(rename = "presence-resync")]
    PresenceResync,
}

/// Subscription key: one per server event variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageReceived,
    MessageSentAck,
    OnlineSnapshot,
    StatusDelta,
    TypingStart,
    TypingStop,
    PresenceResync,
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::MessageReceived(_) => EventKind::MessageReceived,
            ServerEvent::MessageSentAck(_) => EventKind::MessageSentAck,
            ServerEvent::OnlineSnapshot { .. } => EventKind::OnlineSnapshot,
            ServerEvent::StatusDelta { .. } => EventKind::StatusDelta,
            ServerEvent::TypingStart { .. } => EventKind::TypingStart,
            ServerEvent::TypingStop { .. } => EventKind::TypingStop,
            ServerEvent::PresenceResync => EventKind::PresenceResync,
        }
    }
}

use serde::{Deserialize, Serialize};

/// Authenticated identity for one connection lifetime. Supplied by the
/// identity service, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub self_id: String,
    pub self_username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub id: String,
    pub username: String,
}

/// One chat message. The history service and the receive side of the wire
/// carry bare ids; `sender_username`/`receiver_username` are resolved from
/// the session and the selected peer when a message enters the view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub content: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub created_at: String,
    #[serde(default)]
    pub sender_username: String,
    #[serde(default)]
    pub receiver_username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentConversation {
    pub id: String,
    pub partner_id: String,
    pub partner_username: String,
    pub last_message: String,
    pub last_message_at: String,
    pub unread_count: u32,
}

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    #[serde(skip_serializing, default)]
    pub password_hash: Vec<u8>,
    #[serde(skip_serializing, default)]
    pub password_salt: Vec<u8>,
    pub is_online: bool,
    pub last_seen: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub token: String,
    pub expires_at: i64,
    pub created_at: i64,
}

/// A direct message between two users. Immutable once stored, except
/// for the one-way `is_read` transition applied by the receiver.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub sender_name: String,
    pub timestamp: i64,
    pub is_read: bool,
}

/// Per-viewer summary of one conversation: the latest message snapshot
/// and how many messages addressed to the viewer are still unread.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub peer_id: String,
    pub peer_name: String,
    pub last_message: String,
    pub last_message_time: i64,
    pub last_message_sender: String,
    pub unread_count: i64,
}

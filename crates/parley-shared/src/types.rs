use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::{flexible, flexible_option};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }
    };
}

id_type!(
    /// Server-assigned user identifier.
    UserId
);
id_type!(
    /// Identifier of a two-party conversation.
    ChatId
);
id_type!(MessageId);
id_type!(FileId);

/// Public identity of a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub full_name: String,
}

/// A two-party conversation as returned by `GET /chats/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: ChatId,
    /// The participant who is not the current user.
    pub other_user: User,
    #[serde(default)]
    pub last_message: Option<Message>,
    #[serde(with = "flexible_option", default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(with = "flexible_option", default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A chat message. `content` is plain text and must be escaped before render.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    #[serde(default)]
    pub chat_id: Option<ChatId>,
    pub sender_id: UserId,
    pub content: String,
    #[serde(with = "flexible")]
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(with = "flexible_option", default)]
    pub read_at: Option<DateTime<Utc>>,
}

/// Metadata of a file shared in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileAttachment {
    pub id: FileId,
    #[serde(default)]
    pub chat_id: Option<ChatId>,
    pub filename: String,
    pub file_size: u64,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub uploaded_by: Option<UserId>,
    #[serde(with = "flexible_option", default)]
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub download_url: String,
}

/// Body of `POST /auth/register`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Registration {
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Successful login exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnreadCount {
    pub unread_count: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadUpdate {
    pub updated_count: u64,
}

/// Lifecycle state of the push channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    /// Waiting for a backoff timer after an unclean close.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

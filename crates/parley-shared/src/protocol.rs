use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::time::flexible_option;
use crate::types::{ChatId, FileAttachment, FileId, Message, MessageId, UserId};

/// Frames delivered by the server on the push channel.
///
/// Tags the client does not know decode to [`InboundEvent::Unknown`] so that
/// newer servers can add event types without breaking older clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A message was posted to a conversation the user has joined.
    NewMessage { message: Message, chat_id: ChatId },

    /// The other participant read a message.
    MessageRead {
        message_id: MessageId,
        reader_id: UserId,
        chat_id: ChatId,
        #[serde(with = "flexible_option", default)]
        read_at: Option<DateTime<Utc>>,
    },

    /// Typing started or stopped.
    Typing {
        user_id: UserId,
        chat_id: ChatId,
        is_typing: bool,
    },

    FileUploaded { file: FileAttachment, chat_id: ChatId },

    FileDeleted { file_id: FileId, chat_id: ChatId },

    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    /// Conversation the event concerns, if any.
    pub fn chat_id(&self) -> Option<ChatId> {
        match self {
            InboundEvent::NewMessage { chat_id, .. }
            | InboundEvent::MessageRead { chat_id, .. }
            | InboundEvent::Typing { chat_id, .. }
            | InboundEvent::FileUploaded { chat_id, .. }
            | InboundEvent::FileDeleted { chat_id, .. } => Some(*chat_id),
            InboundEvent::Unknown => None,
        }
    }

    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Frames the client sends on the push channel. Delivery is best effort.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundIntent {
    JoinChat { chat_id: ChatId },
    Typing { chat_id: ChatId, is_typing: bool },
    MessageRead { message_id: MessageId, chat_id: ChatId },
}

impl OutboundIntent {
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

//! Presentation Layer: typed UI notifications.
//!
//! Components never draw anything themselves. They emit [`UiEvent`]s on a
//! broadcast channel and every front end subscribes to it.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use parley_shared::types::{ChatId, ConnectionState, FileId, MessageId, User, UserId};

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastLevel {
    Success,
    Error,
    Warning,
    Info,
}

/// One row of the conversation sidebar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatListEntry {
    pub chat_id: ChatId,
    pub partner: String,
    /// Last message content, or a placeholder when there is none.
    pub preview: String,
    pub time: Option<String>,
    pub active: bool,
    pub unread: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatHeader {
    pub chat_id: ChatId,
    pub partner_name: String,
    pub partner_username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub outgoing: bool,
    /// Raw content as sent.
    pub content: String,
    /// HTML-escaped content, safe to embed in markup.
    pub html: String,
    pub time: String,
    /// Delivery mark, only shown on outgoing messages.
    pub read: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub id: FileId,
    pub filename: String,
    pub size: String,
    pub download_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum UiEvent {
    Toast {
        id: Uuid,
        level: ToastLevel,
        text: String,
    },
    ToastDismissed {
        id: Uuid,
    },
    Loading(bool),
    ConnectionChanged(ConnectionState),
    ShowLogin,
    ShowChatApp {
        user: User,
    },
    ProfileUpdated(User),
    ChatListRendered(Vec<ChatListEntry>),
    ActiveChatChanged(ChatHeader),
    TranscriptRendered(Vec<RenderedMessage>),
    MessageAppended(RenderedMessage),
    MessageUpdated(RenderedMessage),
    /// `Some(label)` shows the indicator, `None` hides it.
    TypingIndicator(Option<String>),
    FilesRendered(Vec<FileEntry>),
    SearchResults(Vec<User>),
    ComposerChanged(String),
}

/// Cloneable emitter shared by every component.
#[derive(Clone)]
pub struct Presenter {
    tx: broadcast::Sender<UiEvent>,
    toast_ttl: Duration,
}

impl Presenter {
    pub fn new(toast_ttl: Duration) -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx, toast_ttl }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            debug!("UI event dropped: no subscribers");
        }
    }

    /// Show a toast and schedule its dismissal after the configured TTL.
    pub fn toast(&self, level: ToastLevel, text: impl Into<String>) -> Uuid {
        let id = Uuid::new_v4();
        self.emit(UiEvent::Toast {
            id,
            level,
            text: text.into(),
        });

        let tx = self.tx.clone();
        let ttl = self.toast_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let _ = tx.send(UiEvent::ToastDismissed { id });
        });
        id
    }

    pub fn success(&self, text: impl Into<String>) {
        self.toast(ToastLevel::Success, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.toast(ToastLevel::Error, text);
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.toast(ToastLevel::Warning, text);
    }

    pub fn info(&self, text: impl Into<String>) {
        self.toast(ToastLevel::Info, text);
    }

    pub fn loading(&self, on: bool) {
        self.emit(UiEvent::Loading(on));
    }
}

//! Conversation Manager.
//!
//! Owns the in-memory view of conversations, the active selection and its
//! transcript, files and typing state. Pull requests run as spawned tasks
//! and report back as [`Completion`]s, which the event loop feeds into
//! [`ConversationManager::handle_completion`]. All state changes therefore
//! happen on one logical thread.
//!
//! Every selection bumps an epoch. Completions tagged with an older epoch
//! belong to a conversation that is no longer active and are discarded.
//! Logging out bumps the session generation, which retires every pull
//! issued before it.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use parley_net::PushOutbox;
use parley_shared::format::{escape_html, format_file_size, format_relative_time};
use parley_shared::protocol::InboundEvent;
use parley_shared::types::{
    ChatId, Conversation, FileAttachment, FileId, Message, MessageId, ReadUpdate, UnreadCount,
    User, UserId,
};
use parley_shared::validation::validate_chat_handle;
use parley_shared::ValidationError;

use crate::api::{ChatApi, FileUpload};
use crate::error::{ApiErrorKind, ClientError, Result};
use crate::presenter::{
    ChatHeader, ChatListEntry, FileEntry, Presenter, RenderedMessage, UiEvent,
};

const NO_MESSAGES: &str = "No messages yet";

/// Result of a spawned pull, folded in by [`ConversationManager::handle_completion`].
#[derive(Debug)]
pub enum Completion {
    Chats {
        session: u64,
        result: Result<Vec<Conversation>>,
    },
    Messages {
        chat_id: ChatId,
        epoch: u64,
        result: Result<Vec<Message>>,
    },
    Files {
        chat_id: ChatId,
        epoch: u64,
        result: Result<Vec<FileAttachment>>,
    },
    MessageSent {
        session: u64,
        chat_id: ChatId,
        epoch: u64,
        /// Composer text at the time of sending, restored on failure.
        original: String,
        result: Result<Message>,
    },
    ChatStarted {
        session: u64,
        username: String,
        result: Result<Conversation>,
    },
    Search {
        session: u64,
        query: String,
        result: Result<Vec<User>>,
    },
    FileUploaded {
        session: u64,
        chat_id: ChatId,
        result: Result<FileAttachment>,
    },
    FileDeleted {
        session: u64,
        file_id: FileId,
        result: Result<()>,
    },
    ReadMarked {
        session: u64,
        result: Result<ReadUpdate>,
    },
    Unread {
        session: u64,
        result: Result<UnreadCount>,
    },
}

impl Completion {
    /// Session generation the pull was issued in. History and file pulls
    /// carry an epoch instead, which [`ConversationManager::reset`] also bumps.
    fn session(&self) -> Option<u64> {
        match self {
            Completion::Messages { .. } | Completion::Files { .. } => None,
            Completion::Chats { session, .. }
            | Completion::MessageSent { session, .. }
            | Completion::ChatStarted { session, .. }
            | Completion::Search { session, .. }
            | Completion::FileUploaded { session, .. }
            | Completion::FileDeleted { session, .. }
            | Completion::ReadMarked { session, .. }
            | Completion::Unread { session, .. } => Some(*session),
        }
    }
}

/// What the front end currently shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatView {
    pub chat_list: Vec<ChatListEntry>,
    pub header: Option<ChatHeader>,
    pub transcript: Vec<RenderedMessage>,
    pub files: Vec<FileEntry>,
    pub typing_label: Option<String>,
    pub composer: String,
    /// `Some` while the sidebar shows user search results.
    pub search_results: Option<Vec<User>>,
}

pub struct ConversationManager {
    api: Arc<dyn ChatApi>,
    push: Arc<dyn PushOutbox>,
    presenter: Presenter,
    completions: mpsc::UnboundedSender<Completion>,
    typing_idle: Duration,

    current_user: Option<User>,
    chats: Vec<Conversation>,
    active: Option<Conversation>,
    epoch: u64,
    session: u64,
    files: Vec<FileAttachment>,
    typing_users: HashSet<UserId>,
    unread: HashMap<ChatId, u32>,
    typing_deadline: Option<Instant>,
    search_query: Option<String>,
    view: ChatView,
}

impl ConversationManager {
    pub fn new(
        api: Arc<dyn ChatApi>,
        push: Arc<dyn PushOutbox>,
        presenter: Presenter,
        completions: mpsc::UnboundedSender<Completion>,
        typing_idle: Duration,
    ) -> Self {
        Self {
            api,
            push,
            presenter,
            completions,
            typing_idle,
            current_user: None,
            chats: Vec::new(),
            active: None,
            epoch: 0,
            session: 0,
            files: Vec::new(),
            typing_users: HashSet::new(),
            unread: HashMap::new(),
            typing_deadline: None,
            search_query: None,
            view: ChatView::default(),
        }
    }

    // -- Accessors ----------------------------------------------------------

    pub fn view(&self) -> &ChatView {
        &self.view
    }

    pub fn chats(&self) -> &[Conversation] {
        &self.chats
    }

    pub fn active_chat(&self) -> Option<&Conversation> {
        self.active.as_ref()
    }

    pub fn active_chat_id(&self) -> Option<ChatId> {
        self.active.as_ref().map(|c| c.id)
    }

    pub fn current_user(&self) -> Option<&User> {
        self.current_user.as_ref()
    }

    pub fn unread_for(&self, chat_id: ChatId) -> u32 {
        self.unread.get(&chat_id).copied().unwrap_or(0)
    }

    pub fn is_typing(&self, user_id: UserId) -> bool {
        self.typing_users.contains(&user_id)
    }

    /// When the local "stopped typing" announcement is due.
    pub fn typing_deadline(&self) -> Option<Instant> {
        self.typing_deadline
    }

    // -- Session wiring -----------------------------------------------------

    pub fn set_current_user(&mut self, user: User) {
        self.current_user = Some(user);
    }

    /// Forget everything. In-flight completions become stale.
    pub fn reset(&mut self) {
        self.epoch += 1;
        self.session += 1;
        self.current_user = None;
        self.chats.clear();
        self.active = None;
        self.files.clear();
        self.typing_users.clear();
        self.unread.clear();
        self.typing_deadline = None;
        self.search_query = None;
        self.view = ChatView::default();
    }

    // -- Conversation list --------------------------------------------------

    /// Pull the full conversation list. The result replaces the rendered
    /// list wholesale.
    pub fn load_chats(&self) {
        let api = self.api.clone();
        let session = self.session;
        self.spawn(async move {
            Completion::Chats {
                session,
                result: api.list_chats().await,
            }
        });
    }

    pub fn render_chat_list(&mut self) {
        let active = self.active_chat_id();
        let now = Utc::now();
        let entries: Vec<ChatListEntry> = self
            .chats
            .iter()
            .map(|chat| ChatListEntry {
                chat_id: chat.id,
                partner: chat.other_user.full_name.clone(),
                preview: chat
                    .last_message
                    .as_ref()
                    .map(|m| m.content.clone())
                    .unwrap_or_else(|| NO_MESSAGES.to_string()),
                time: chat.last_message_at.map(|t| format_relative_time(t, now)),
                active: Some(chat.id) == active,
                unread: self.unread_for(chat.id),
            })
            .collect();

        self.view.chat_list = entries.clone();
        self.presenter.emit(UiEvent::ChatListRendered(entries));
    }

    // -- Selection ----------------------------------------------------------

    /// Select a conversation from the loaded list. Returns false when the id
    /// is unknown.
    pub fn select_chat(&mut self, chat_id: ChatId) -> bool {
        match self.chats.iter().find(|c| c.id == chat_id).cloned() {
            Some(chat) => {
                self.select_conversation(chat);
                true
            }
            None => {
                debug!(chat = %chat_id, "select ignored: unknown conversation");
                false
            }
        }
    }

    /// Make `chat` active: join it on the push channel, then pull its
    /// history followed by its files.
    ///
    /// No leave frame is sent for the previously active conversation.
    pub fn select_conversation(&mut self, chat: Conversation) {
        self.epoch += 1;
        let chat_id = chat.id;
        let epoch = self.epoch;
        info!(chat = %chat_id, epoch, "conversation selected");

        let header = ChatHeader {
            chat_id,
            partner_name: chat.other_user.full_name.clone(),
            partner_username: chat.other_user.username.clone(),
        };
        self.active = Some(chat);
        self.unread.remove(&chat_id);
        self.files.clear();
        self.view.header = Some(header.clone());
        self.presenter.emit(UiEvent::ActiveChatChanged(header));

        self.typing_users.clear();
        self.set_typing_label(None);

        self.push.join_chat(chat_id);

        let api = self.api.clone();
        let tx = self.completions.clone();
        tokio::spawn(async move {
            let result = api.chat_messages(chat_id).await;
            if tx
                .send(Completion::Messages {
                    chat_id,
                    epoch,
                    result,
                })
                .is_err()
            {
                return;
            }
            let result = api.chat_files(chat_id).await;
            let _ = tx.send(Completion::Files {
                chat_id,
                epoch,
                result,
            });
        });

        self.close_search();
    }

    /// Re-pull the active conversation's history.
    pub fn load_messages(&self) {
        let Some(chat_id) = self.active_chat_id() else {
            return;
        };
        let epoch = self.epoch;
        let api = self.api.clone();
        self.spawn(async move {
            Completion::Messages {
                chat_id,
                epoch,
                result: api.chat_messages(chat_id).await,
            }
        });
    }

    fn is_current(&self, chat_id: ChatId, epoch: u64) -> bool {
        epoch == self.epoch && self.active_chat_id() == Some(chat_id)
    }

    fn render_message(&self, message: &Message) -> RenderedMessage {
        let outgoing = self
            .current_user
            .as_ref()
            .is_some_and(|u| u.id == message.sender_id);
        RenderedMessage {
            id: message.id,
            sender_id: message.sender_id,
            outgoing,
            content: message.content.clone(),
            html: escape_html(&message.content),
            time: format_relative_time(message.sent_at, Utc::now()),
            read: outgoing.then_some(message.is_read),
        }
    }

    fn render_transcript(&mut self, messages: &[Message]) {
        let rendered: Vec<RenderedMessage> =
            messages.iter().map(|m| self.render_message(m)).collect();
        self.view.transcript = rendered.clone();
        self.presenter.emit(UiEvent::TranscriptRendered(rendered));
    }

    fn append_message(&mut self, message: &Message) {
        let rendered = self.render_message(message);
        self.view.transcript.push(rendered.clone());
        self.presenter.emit(UiEvent::MessageAppended(rendered));
    }

    // -- Composer -----------------------------------------------------------

    /// Input changed. Announces "typing" and restarts the idle timer.
    pub fn set_input(&mut self, text: impl Into<String>) {
        self.view.composer = text.into();
        let Some(chat_id) = self.active_chat_id() else {
            return;
        };
        self.push.send_typing(chat_id, true);
        self.typing_deadline = Some(Instant::now() + self.typing_idle);
    }

    /// The idle timer fired.
    pub fn typing_idle(&mut self) {
        self.typing_deadline = None;
        self.stop_typing();
    }

    pub fn stop_typing(&mut self) {
        let Some(chat_id) = self.active_chat_id() else {
            return;
        };
        self.typing_deadline = None;
        self.push.send_typing(chat_id, false);
    }

    /// Send the composer contents. The composer is cleared immediately; the
    /// message is only shown once the server confirms it.
    pub fn send_message(&mut self) {
        let content = self.view.composer.trim().to_string();
        let Some(chat_id) = self.active_chat_id() else {
            return;
        };
        if content.is_empty() {
            return;
        }

        let original = std::mem::take(&mut self.view.composer);
        self.presenter.emit(UiEvent::ComposerChanged(String::new()));

        let (session, epoch) = (self.session, self.epoch);
        let api = self.api.clone();
        self.spawn(async move {
            Completion::MessageSent {
                session,
                chat_id,
                epoch,
                original,
                result: api.send_message(chat_id, &content).await,
            }
        });
    }

    // -- Push events --------------------------------------------------------

    pub fn handle_push(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::NewMessage { message, chat_id } => {
                self.handle_new_message(message, chat_id)
            }
            InboundEvent::MessageRead {
                message_id,
                chat_id,
                ..
            } => self.handle_message_read(message_id, chat_id),
            InboundEvent::Typing {
                user_id,
                chat_id,
                is_typing,
            } => self.handle_typing_indicator(user_id, chat_id, is_typing),
            InboundEvent::FileUploaded { file, chat_id } => {
                self.handle_file_uploaded(file, chat_id)
            }
            InboundEvent::FileDeleted { file_id, chat_id } => {
                self.handle_file_deleted(file_id, chat_id)
            }
            InboundEvent::Unknown => {}
        }
    }

    /// Append to the active transcript and acknowledge that one message;
    /// otherwise bump the local unread counter. The list is always re-pulled.
    pub fn handle_new_message(&mut self, message: Message, chat_id: ChatId) {
        if self.active_chat_id() == Some(chat_id) {
            let message_id = message.id;
            self.append_message(&message);
            self.push.send_read_receipt(message_id, chat_id);
        } else {
            *self.unread.entry(chat_id).or_insert(0) += 1;
        }
        self.load_chats();
    }

    pub fn handle_message_read(&mut self, message_id: MessageId, chat_id: ChatId) {
        if self.active_chat_id() != Some(chat_id) {
            return;
        }
        let Some(entry) = self
            .view
            .transcript
            .iter_mut()
            .find(|m| m.id == message_id)
        else {
            return;
        };
        if entry.outgoing && entry.read != Some(true) {
            entry.read = Some(true);
            let updated = entry.clone();
            self.presenter.emit(UiEvent::MessageUpdated(updated));
        }
    }

    /// One shared label; the last writer wins.
    pub fn handle_typing_indicator(&mut self, user_id: UserId, chat_id: ChatId, is_typing: bool) {
        let Some(active) = &self.active else {
            return;
        };
        if active.id != chat_id {
            return;
        }

        if is_typing {
            let label = format!("{} is typing...", active.other_user.full_name);
            self.typing_users.insert(user_id);
            self.set_typing_label(Some(label));
        } else if self.typing_users.remove(&user_id) && self.typing_users.is_empty() {
            self.set_typing_label(None);
        }
    }

    fn set_typing_label(&mut self, label: Option<String>) {
        if self.view.typing_label == label {
            return;
        }
        self.view.typing_label = label.clone();
        self.presenter.emit(UiEvent::TypingIndicator(label));
    }

    pub fn handle_file_uploaded(&mut self, file: FileAttachment, chat_id: ChatId) {
        if self.active_chat_id() != Some(chat_id) {
            return;
        }
        self.load_files(chat_id);
        self.presenter.success(format!("New file: {}", file.filename));
    }

    pub fn handle_file_deleted(&mut self, file_id: FileId, chat_id: ChatId) {
        if self.active_chat_id() != Some(chat_id) {
            return;
        }
        self.remove_file(file_id);
    }

    // -- Starting conversations ---------------------------------------------

    pub fn start_chat(&mut self, username: &str) {
        let handle = match validate_chat_handle(username) {
            Ok(handle) => handle,
            Err(e) => {
                self.presenter.error(e.to_string());
                return;
            }
        };

        if self
            .current_user
            .as_ref()
            .is_some_and(|u| u.username == handle)
        {
            self.presenter.warning(ValidationError::SelfChat.to_string());
            return;
        }

        self.presenter.loading(true);
        let session = self.session;
        let api = self.api.clone();
        self.spawn(async move {
            let result = api.create_or_get_chat(&handle).await;
            Completion::ChatStarted {
                session,
                username: handle,
                result,
            }
        });
    }

    fn on_chat_started(&mut self, username: String, result: Result<Conversation>) {
        self.presenter.loading(false);
        match result {
            Ok(chat) => {
                self.select_conversation(chat);
                self.load_chats();
                self.presenter
                    .success(format!("Chat started with {username}"));
            }
            Err(ClientError::AuthenticationRequired) => {
                debug!("start chat skipped: not authenticated");
            }
            Err(e) => {
                warn!(username = %username, error = %e, "start chat failed");
                match e.api_kind() {
                    Some(ApiErrorKind::NotFound) => self.presenter.error("User not found"),
                    Some(ApiErrorKind::BadRequest) => self
                        .presenter
                        .warning(ValidationError::SelfChat.to_string()),
                    Some(ApiErrorKind::Conflict) => {
                        self.load_chats();
                        self.presenter.info("Chat already exists");
                    }
                    _ => self.presenter.error(e.to_string()),
                }
            }
        }
    }

    // -- User search --------------------------------------------------------

    /// An empty query restores the conversation list.
    pub fn search_users(&mut self, query: &str) {
        let query = query.trim().to_string();
        if query.is_empty() {
            self.close_search();
            return;
        }

        self.search_query = Some(query.clone());
        let session = self.session;
        let api = self.api.clone();
        self.spawn(async move {
            let result = api.search_users(&query).await;
            Completion::Search {
                session,
                query,
                result,
            }
        });
    }

    pub fn close_search(&mut self) {
        self.search_query = None;
        if self.view.search_results.take().is_some() {
            debug!("search closed");
        }
        self.render_chat_list();
    }

    fn on_search(&mut self, query: String, result: Result<Vec<User>>) {
        if self.search_query.as_deref() != Some(query.as_str()) {
            debug!(query = %query, "discarding superseded search results");
            return;
        }
        match result {
            Ok(users) => {
                let me = self.current_user.as_ref().map(|u| u.id);
                let users: Vec<User> =
                    users.into_iter().filter(|u| Some(u.id) != me).collect();
                self.view.search_results = Some(users.clone());
                self.presenter.emit(UiEvent::SearchResults(users));
            }
            Err(e) => warn!(query = %query, error = %e, "search failed"),
        }
    }

    // -- Files --------------------------------------------------------------

    pub fn load_files(&self, chat_id: ChatId) {
        let epoch = self.epoch;
        let api = self.api.clone();
        self.spawn(async move {
            Completion::Files {
                chat_id,
                epoch,
                result: api.chat_files(chat_id).await,
            }
        });
    }

    pub fn render_files(&mut self, files: Vec<FileAttachment>) {
        self.files = files;
        self.emit_files();
    }

    fn emit_files(&mut self) {
        let entries: Vec<FileEntry> = self
            .files
            .iter()
            .map(|f| FileEntry {
                id: f.id,
                filename: f.filename.clone(),
                size: format_file_size(f.file_size),
                download_url: f.download_url.clone(),
            })
            .collect();
        self.view.files = entries.clone();
        self.presenter.emit(UiEvent::FilesRendered(entries));
    }

    fn remove_file(&mut self, file_id: FileId) {
        let before = self.files.len();
        self.files.retain(|f| f.id != file_id);
        if self.files.len() != before {
            self.emit_files();
        }
    }

    /// Upload a file into the active conversation.
    pub fn upload_file(&mut self, path: PathBuf) {
        let Some(chat_id) = self.active_chat_id() else {
            self.presenter
                .warning(ValidationError::NoActiveChat.to_string());
            return;
        };

        let session = self.session;
        let api = self.api.clone();
        self.spawn(async move {
            let result = match FileUpload::from_path(&path).await {
                Ok(upload) => api.upload_file(chat_id, upload).await,
                Err(e) => Err(e),
            };
            Completion::FileUploaded {
                session,
                chat_id,
                result,
            }
        });
    }

    pub fn delete_file(&mut self, file_id: FileId) {
        let session = self.session;
        let api = self.api.clone();
        self.spawn(async move {
            Completion::FileDeleted {
                session,
                file_id,
                result: api.delete_file(file_id).await,
            }
        });
    }

    // -- Read state ---------------------------------------------------------

    /// Mark messages of the active conversation as read on the server.
    /// Only runs when explicitly asked for; new messages are acknowledged
    /// one by one over the push channel instead.
    pub fn mark_messages_as_read(&mut self, message_ids: Vec<MessageId>) {
        if self.active.is_none() || message_ids.is_empty() {
            return;
        }
        let session = self.session;
        let api = self.api.clone();
        self.spawn(async move {
            Completion::ReadMarked {
                session,
                result: api.mark_messages_read(&message_ids).await,
            }
        });
    }

    pub fn load_unread_count(&self) {
        let session = self.session;
        let api = self.api.clone();
        self.spawn(async move {
            Completion::Unread {
                session,
                result: api.unread_count().await,
            }
        });
    }

    // -- Completions --------------------------------------------------------

    pub fn handle_completion(&mut self, completion: Completion) {
        if let Some(session) = completion.session().filter(|s| *s != self.session) {
            debug!(
                session,
                current = self.session,
                "discarding result from an earlier session"
            );
            return;
        }

        match completion {
            Completion::Chats { result, .. } => match result {
                Ok(chats) => {
                    debug!(count = chats.len(), "conversation list loaded");
                    self.chats = chats;
                    if let Some(id) = self.active_chat_id() {
                        if let Some(fresh) = self.chats.iter().find(|c| c.id == id).cloned() {
                            self.active = Some(fresh);
                        }
                    }
                    if self.search_query.is_none() {
                        self.render_chat_list();
                    }
                }
                Err(e) => self.report_pull_error(e, "Failed to load chats"),
            },

            Completion::Messages {
                chat_id,
                epoch,
                result,
            } => {
                if !self.is_current(chat_id, epoch) {
                    debug!(chat = %chat_id, epoch, "discarding stale history");
                    return;
                }
                match result {
                    Ok(messages) => self.render_transcript(&messages),
                    Err(e) => self.report_pull_error(e, "Failed to load messages"),
                }
            }

            Completion::Files {
                chat_id,
                epoch,
                result,
            } => {
                if !self.is_current(chat_id, epoch) {
                    debug!(chat = %chat_id, epoch, "discarding stale file list");
                    return;
                }
                match result {
                    Ok(files) => self.render_files(files),
                    Err(e) => warn!(chat = %chat_id, error = %e, "failed to load files"),
                }
            }

            Completion::MessageSent {
                chat_id,
                epoch,
                original,
                result,
                ..
            } => match result {
                Ok(message) => {
                    if self.is_current(chat_id, epoch) {
                        self.append_message(&message);
                        self.stop_typing();
                    }
                    self.load_chats();
                }
                Err(e) => {
                    self.view.composer = original.clone();
                    self.presenter.emit(UiEvent::ComposerChanged(original));
                    self.report_pull_error(e, "Failed to send message");
                }
            },

            Completion::ChatStarted {
                username, result, ..
            } => self.on_chat_started(username, result),

            Completion::Search { query, result, .. } => self.on_search(query, result),

            Completion::FileUploaded { chat_id, result, .. } => match result {
                Ok(file) => {
                    info!(chat = %chat_id, file = %file.id, "file uploaded");
                    self.presenter.success("File uploaded successfully");
                    if self.active_chat_id() == Some(chat_id) {
                        self.load_files(chat_id);
                    }
                }
                Err(ClientError::Validation(e)) => self.presenter.error(e.to_string()),
                Err(e) => self.report_pull_error(e, "File upload failed"),
            },

            Completion::FileDeleted { file_id, result, .. } => match result {
                Ok(()) => {
                    self.remove_file(file_id);
                    self.presenter.success("File deleted");
                }
                Err(e) => {
                    let text = e.to_string();
                    self.report_pull_error(e, &text);
                }
            },

            Completion::ReadMarked { result, .. } => match result {
                Ok(update) => debug!(updated = update.updated_count, "messages marked read"),
                Err(e) => warn!(error = %e, "failed to mark messages read"),
            },

            Completion::Unread { result, .. } => match result {
                Ok(count) => self
                    .presenter
                    .info(format!("{} unread messages", count.unread_count)),
                Err(e) => self.report_pull_error(e, "Failed to load unread count"),
            },
        }
    }

    /// Toast a failed request, except the pre-login fast-fail, which stays
    /// in the debug log.
    fn report_pull_error(&self, error: ClientError, text: &str) {
        match error {
            ClientError::AuthenticationRequired => {
                debug!(context = text, "request skipped: not authenticated");
            }
            e => {
                warn!(context = text, error = %e, "request failed");
                self.presenter.error(text);
            }
        }
    }

    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let tx = self.completions.clone();
        tokio::spawn(async move {
            if tx.send(fut.await).is_err() {
                debug!("completion dropped: event loop gone");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{conversation, message, user, FakeApi, FakePush, Log};

    struct Harness {
        mgr: ConversationManager,
        rx: mpsc::UnboundedReceiver<Completion>,
        api: Arc<FakeApi>,
        log: Log,
        ui: tokio::sync::broadcast::Receiver<UiEvent>,
    }

    fn harness() -> Harness {
        let log = Log::default();
        let api = Arc::new(FakeApi::new(log.clone()));
        let push = Arc::new(FakePush::new(log.clone()));
        let presenter = Presenter::new(Duration::from_secs(5));
        let ui = presenter.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut mgr = ConversationManager::new(
            api.clone(),
            push,
            presenter,
            tx,
            Duration::from_millis(1000),
        );
        mgr.set_current_user(user(1, "alice", "Alice A"));
        Harness {
            mgr,
            rx,
            api,
            log,
            ui,
        }
    }

    impl Harness {
        /// Feed `n` completions back into the manager.
        async fn pump(&mut self, n: usize) {
            for _ in 0..n {
                let c = tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
                    .await
                    .expect("completion timed out")
                    .expect("completion channel closed");
                self.mgr.handle_completion(c);
            }
        }

        fn toasts(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(ev) = self.ui.try_recv() {
                if let UiEvent::Toast { text, .. } = ev {
                    out.push(text);
                }
            }
            out
        }

        async fn open(&mut self, chat_id: i64) {
            assert!(self.mgr.select_chat(ChatId(chat_id)));
            self.pump(2).await;
            self.log.clear();
        }
    }

    fn with_chats(h: &mut Harness) {
        h.api.set_chats(vec![
            conversation(42, user(2, "bob", "Bob B")),
            conversation(7, user(3, "carol", "Carol C")),
        ]);
    }

    #[tokio::test]
    async fn test_select_joins_then_pulls_history_then_files() {
        let mut h = harness();
        with_chats(&mut h);
        h.mgr.load_chats();
        h.pump(1).await;
        h.log.clear();

        assert!(h.mgr.select_chat(ChatId(42)));
        h.pump(2).await;

        assert_eq!(
            h.log.entries(),
            vec!["push:join 42", "api:messages 42", "api:files 42"]
        );
        assert_eq!(h.mgr.active_chat_id(), Some(ChatId(42)));
        assert!(h.mgr.view().chat_list.iter().any(|e| e.chat_id == ChatId(42) && e.active));
    }

    #[tokio::test]
    async fn test_send_clears_input_then_appends_and_stops_typing() {
        let mut h = harness();
        h.api.set_chats(vec![conversation(7, user(3, "carol", "Carol C"))]);
        h.mgr.load_chats();
        h.pump(1).await;
        h.open(7).await;

        h.mgr.set_input("hello");
        h.mgr.send_message();
        assert_eq!(h.mgr.view().composer, "");

        // send completion, then the list refresh it triggers
        h.pump(2).await;

        let last = h.mgr.view().transcript.last().unwrap();
        assert_eq!(last.content, "hello");
        assert_eq!(last.sender_id, UserId(1));
        assert!(last.outgoing);
        assert_eq!(
            h.log.entries(),
            vec![
                "push:typing 7 true",
                "api:send 7 hello",
                "push:typing 7 false",
                "api:chats"
            ]
        );
        assert!(h.mgr.typing_deadline().is_none());
    }

    #[tokio::test]
    async fn test_send_failure_restores_original_input() {
        let mut h = harness();
        h.api.set_chats(vec![conversation(7, user(3, "carol", "Carol C"))]);
        h.mgr.load_chats();
        h.pump(1).await;
        h.open(7).await;
        let before = h.mgr.view().transcript.len();
        h.toasts();

        h.api.fail_sends(true);
        h.mgr.set_input("  hello there ");
        h.mgr.send_message();
        assert_eq!(h.mgr.view().composer, "");
        h.pump(1).await;

        assert_eq!(h.mgr.view().composer, "  hello there ");
        assert_eq!(h.mgr.view().transcript.len(), before);
        assert_eq!(h.toasts(), vec!["Failed to send message"]);
    }

    #[tokio::test]
    async fn test_send_requires_content_and_selection() {
        let mut h = harness();
        h.mgr.set_input("orphan");
        h.mgr.send_message();
        assert_eq!(h.mgr.view().composer, "orphan");

        h.api.set_chats(vec![conversation(7, user(3, "carol", "Carol C"))]);
        h.mgr.load_chats();
        h.pump(1).await;
        h.open(7).await;
        h.mgr.set_input("   ");
        h.mgr.send_message();
        assert!(!h.log.entries().iter().any(|e| e.starts_with("api:send")));
    }

    #[tokio::test]
    async fn test_stale_history_is_discarded() {
        let mut h = harness();
        with_chats(&mut h);
        h.mgr.load_chats();
        h.pump(1).await;

        h.mgr.select_chat(ChatId(42));
        let stale_epoch = h.mgr.epoch;
        h.mgr.select_chat(ChatId(7));

        h.mgr.handle_completion(Completion::Messages {
            chat_id: ChatId(42),
            epoch: stale_epoch,
            result: Ok(vec![message(99, 42, 2, "old news")]),
        });
        assert!(h.mgr.view().transcript.is_empty());

        // drain the real pulls for both selections
        h.pump(4).await;
        assert!(h
            .mgr
            .view()
            .transcript
            .iter()
            .all(|m| m.content != "old news"));
        assert_eq!(h.mgr.active_chat_id(), Some(ChatId(7)));
    }

    #[tokio::test]
    async fn test_render_chat_list_is_idempotent() {
        let mut h = harness();
        with_chats(&mut h);
        h.mgr.load_chats();
        h.pump(1).await;

        h.mgr.render_chat_list();
        let first = h.mgr.view().chat_list.clone();
        h.mgr.render_chat_list();
        assert_eq!(h.mgr.view().chat_list, first);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].preview, NO_MESSAGES);
    }

    #[tokio::test]
    async fn test_new_message_in_active_chat_is_acknowledged() {
        let mut h = harness();
        with_chats(&mut h);
        h.mgr.load_chats();
        h.pump(1).await;
        h.open(42).await;

        h.mgr.handle_push(InboundEvent::NewMessage {
            message: message(500, 42, 2, "<b>hi</b>"),
            chat_id: ChatId(42),
        });
        h.pump(1).await;

        assert_eq!(h.log.entries(), vec!["push:read 500 42", "api:chats"]);
        let last = h.mgr.view().transcript.last().unwrap();
        assert_eq!(last.html, "&lt;b&gt;hi&lt;/b&gt;");
        assert!(!last.outgoing);
        assert_eq!(last.read, None);
    }

    #[tokio::test]
    async fn test_new_message_elsewhere_counts_unread() {
        let mut h = harness();
        with_chats(&mut h);
        h.mgr.load_chats();
        h.pump(1).await;
        h.open(42).await;

        h.mgr.handle_push(InboundEvent::NewMessage {
            message: message(501, 7, 3, "psst"),
            chat_id: ChatId(7),
        });
        h.pump(1).await;

        assert_eq!(h.log.entries(), vec!["api:chats"]);
        assert_eq!(h.mgr.unread_for(ChatId(7)), 1);
        let entry = h
            .mgr
            .view()
            .chat_list
            .iter()
            .find(|e| e.chat_id == ChatId(7))
            .unwrap();
        assert_eq!(entry.unread, 1);

        h.mgr.select_chat(ChatId(7));
        assert_eq!(h.mgr.unread_for(ChatId(7)), 0);
    }

    #[tokio::test]
    async fn test_typing_indicator_rules() {
        let mut h = harness();
        with_chats(&mut h);
        h.mgr.load_chats();
        h.pump(1).await;
        h.open(42).await;
        while h.ui.try_recv().is_ok() {}

        // stop for someone never marked typing: nothing changes
        h.mgr.handle_typing_indicator(UserId(2), ChatId(42), false);
        assert!(h.ui.try_recv().is_err());

        // other conversation: ignored
        h.mgr.handle_typing_indicator(UserId(3), ChatId(7), true);
        assert_eq!(h.mgr.view().typing_label, None);

        h.mgr.handle_typing_indicator(UserId(2), ChatId(42), true);
        assert_eq!(
            h.mgr.view().typing_label.as_deref(),
            Some("Bob B is typing...")
        );

        h.mgr.handle_typing_indicator(UserId(2), ChatId(42), false);
        assert_eq!(h.mgr.view().typing_label, None);
        h.mgr.handle_typing_indicator(UserId(2), ChatId(42), false);
        assert!(!h.mgr.is_typing(UserId(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_intent_restarts_idle_timer() {
        let mut h = harness();
        with_chats(&mut h);
        h.mgr.load_chats();
        h.pump(1).await;
        h.open(42).await;

        h.mgr.set_input("h");
        let first = h.mgr.typing_deadline().unwrap();
        tokio::time::advance(Duration::from_millis(600)).await;
        h.mgr.set_input("he");
        let second = h.mgr.typing_deadline().unwrap();
        assert_eq!(second - first, Duration::from_millis(600));

        h.mgr.typing_idle();
        assert!(h.mgr.typing_deadline().is_none());
        assert_eq!(
            h.log.entries(),
            vec![
                "push:typing 42 true",
                "push:typing 42 true",
                "push:typing 42 false"
            ]
        );
    }

    #[tokio::test]
    async fn test_start_chat_validation_and_self_guard() {
        let mut h = harness();
        h.mgr.start_chat("ab");
        h.mgr.start_chat("  alice ");
        assert!(h.log.entries().is_empty());
        assert_eq!(
            h.toasts(),
            vec![
                "Username must be at least 3 characters",
                "Cannot start chat with yourself"
            ]
        );
    }

    #[tokio::test]
    async fn test_start_chat_selects_and_refreshes() {
        let mut h = harness();
        h.api.set_chats(vec![conversation(9, user(4, "dave", "Dave D"))]);
        h.mgr.start_chat(" dave ");
        // create, then messages + files + chats in some order
        h.pump(4).await;

        assert_eq!(h.mgr.active_chat_id(), Some(ChatId(9)));
        let entries = h.log.entries();
        assert_eq!(entries[0], "api:create dave");
        assert_eq!(entries[1], "push:join 9");
        assert!(h.toasts().contains(&"Chat started with dave".to_string()));
    }

    #[tokio::test]
    async fn test_start_chat_errors_are_classified_by_status() {
        let mut h = harness();

        h.api.fail_create(404, "User not found");
        h.mgr.start_chat("nobody");
        h.pump(1).await;

        h.api.fail_create(400, "Cannot create chat with yourself");
        h.mgr.start_chat("mirror");
        h.pump(1).await;

        h.api.fail_create(409, "Chat already exists");
        h.mgr.start_chat("bobby");
        h.pump(2).await;

        h.api.fail_create(500, "boom");
        h.mgr.start_chat("crash");
        h.pump(1).await;

        assert_eq!(
            h.toasts(),
            vec![
                "User not found",
                "Cannot start chat with yourself",
                "Chat already exists",
                "boom"
            ]
        );
        assert!(h.mgr.active_chat_id().is_none());
    }

    #[tokio::test]
    async fn test_search_excludes_self_and_empty_query_restores_list() {
        let mut h = harness();
        with_chats(&mut h);
        h.mgr.load_chats();
        h.pump(1).await;
        h.api.set_search(vec![user(1, "alice", "Alice A"), user(5, "alfred", "Alfred")]);

        h.mgr.search_users("al");
        h.pump(1).await;
        let results = h.mgr.view().search_results.clone().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].username, "alfred");

        h.mgr.search_users("   ");
        assert!(h.mgr.view().search_results.is_none());
        assert_eq!(h.mgr.view().chat_list.len(), 2);
    }

    #[tokio::test]
    async fn test_file_events_only_touch_active_chat() {
        let mut h = harness();
        with_chats(&mut h);
        h.api.set_files(42, vec![crate::testing::file(1, "a.txt"), crate::testing::file(2, "b.png")]);
        h.mgr.load_chats();
        h.pump(1).await;
        h.open(42).await;
        assert_eq!(h.mgr.view().files.len(), 2);

        h.mgr.handle_push(InboundEvent::FileDeleted {
            file_id: FileId(1),
            chat_id: ChatId(7),
        });
        assert_eq!(h.mgr.view().files.len(), 2);

        h.mgr.handle_push(InboundEvent::FileDeleted {
            file_id: FileId(1),
            chat_id: ChatId(42),
        });
        assert_eq!(h.mgr.view().files.len(), 1);
        assert_eq!(h.mgr.view().files[0].filename, "b.png");

        h.mgr.handle_push(InboundEvent::FileUploaded {
            file: crate::testing::file(3, "c.pdf"),
            chat_id: ChatId(7),
        });
        assert!(h.log.entries().is_empty());

        h.mgr.handle_push(InboundEvent::FileUploaded {
            file: crate::testing::file(3, "c.pdf"),
            chat_id: ChatId(42),
        });
        h.pump(1).await;
        assert_eq!(h.log.entries(), vec!["api:files 42"]);
        assert!(h.toasts().contains(&"New file: c.pdf".to_string()));
    }

    #[tokio::test]
    async fn test_message_read_updates_in_place() {
        let mut h = harness();
        with_chats(&mut h);
        h.api
            .set_messages(42, vec![message(10, 42, 1, "mine"), message(11, 42, 2, "theirs")]);
        h.mgr.load_chats();
        h.pump(1).await;
        h.open(42).await;
        assert_eq!(h.mgr.view().transcript[0].read, Some(false));

        h.mgr.handle_push(InboundEvent::MessageRead {
            message_id: MessageId(10),
            reader_id: UserId(2),
            chat_id: ChatId(42),
            read_at: None,
        });
        assert_eq!(h.mgr.view().transcript[0].read, Some(true));
        assert_eq!(h.mgr.view().transcript.len(), 2);
    }

    #[tokio::test]
    async fn test_upload_requires_active_chat() {
        let mut h = harness();
        h.mgr.upload_file(PathBuf::from("/nonexistent"));
        assert_eq!(h.toasts(), vec!["Please select a chat first"]);
        assert!(h.log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_mark_read_uses_bulk_endpoint_only_when_asked() {
        let mut h = harness();
        with_chats(&mut h);
        h.mgr.load_chats();
        h.pump(1).await;
        h.open(42).await;

        h.mgr.mark_messages_as_read(vec![]);
        h.mgr.mark_messages_as_read(vec![MessageId(1), MessageId(2)]);
        h.pump(1).await;
        assert_eq!(h.log.entries(), vec!["api:read 1,2"]);
    }

    #[tokio::test]
    async fn test_unauthenticated_pulls_are_not_toasted() {
        let mut h = harness();
        h.api.require_auth(true);
        h.mgr.load_chats();
        h.pump(1).await;
        assert!(h.toasts().is_empty());
    }

    #[tokio::test]
    async fn test_reset_makes_inflight_results_stale() {
        let mut h = harness();
        with_chats(&mut h);
        h.mgr.load_chats();
        h.pump(1).await;
        h.mgr.select_chat(ChatId(42));
        h.mgr.reset();
        h.pump(2).await;

        assert!(h.mgr.active_chat_id().is_none());
        assert!(h.mgr.view().transcript.is_empty());
        assert!(h.mgr.current_user().is_none());

        h.mgr.load_chats();
        h.mgr.reset();
        h.pump(1).await;
        assert!(h.mgr.chats().is_empty());
        assert!(h.mgr.view().chat_list.is_empty());

        h.log.clear();
        h.mgr.start_chat("dave");
        h.mgr.reset();
        h.pump(1).await;
        assert!(h.mgr.active_chat_id().is_none());
        assert!(h.mgr.view().header.is_none());
        assert_eq!(h.log.entries(), vec!["api:create dave"]);
    }

    #[tokio::test]
    async fn test_results_from_before_logout_are_not_toasted() {
        let mut h = harness();
        with_chats(&mut h);
        h.mgr.load_unread_count();
        h.mgr.search_users("car");
        h.mgr.delete_file(FileId(5));
        h.mgr.reset();
        h.pump(3).await;

        assert!(h.toasts().is_empty());
        assert!(h.mgr.view().search_results.is_none());

        h.mgr.load_unread_count();
        h.pump(1).await;
        assert_eq!(h.toasts(), vec!["3 unread messages"]);
    }
}

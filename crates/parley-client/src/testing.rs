//! In-process fakes for the API and push seams. Both write to one ordered
//! log so tests can assert the interleaving of pulls and push intents.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use parley_net::PushOutbox;
use parley_shared::types::{
    AccessToken, ChatId, Conversation, FileAttachment, FileId, LoginRequest, Message, MessageId,
    ReadUpdate, Registration, UnreadCount, User, UserId,
};

use crate::api::{ChatApi, FileUpload};
use crate::error::{ClientError, Result};
use crate::lifecycle::PushControl;

#[derive(Clone, Default)]
pub(crate) struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

pub(crate) fn user(id: i64, username: &str, full_name: &str) -> User {
    User {
        id: UserId(id),
        username: username.into(),
        full_name: full_name.into(),
    }
}

pub(crate) fn conversation(id: i64, other: User) -> Conversation {
    Conversation {
        id: ChatId(id),
        other_user: other,
        last_message: None,
        last_message_at: None,
        created_at: None,
    }
}

pub(crate) fn message(id: i64, chat: i64, sender: i64, content: &str) -> Message {
    Message {
        id: MessageId(id),
        chat_id: Some(ChatId(chat)),
        sender_id: UserId(sender),
        content: content.into(),
        sent_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        is_read: false,
        read_at: None,
    }
}

pub(crate) fn file(id: i64, name: &str) -> FileAttachment {
    FileAttachment {
        id: FileId(id),
        chat_id: None,
        filename: name.into(),
        file_size: 2048,
        mime_type: None,
        uploaded_by: None,
        uploaded_at: None,
        download_url: format!("/files/{name}"),
    }
}

#[derive(Default)]
struct FakeState {
    me: Option<User>,
    chats: Vec<Conversation>,
    messages: HashMap<ChatId, Vec<Message>>,
    files: HashMap<ChatId, Vec<FileAttachment>>,
    search: Vec<User>,
    fail_sends: bool,
    create_error: Option<(u16, String)>,
    require_auth: bool,
    login_error: Option<(u16, String)>,
    me_error: Option<u16>,
    next_id: i64,
}

pub(crate) struct FakeApi {
    log: Log,
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub fn new(log: Log) -> Self {
        Self {
            log,
            state: Mutex::new(FakeState {
                me: Some(user(1, "alice", "Alice A")),
                next_id: 1000,
                ..FakeState::default()
            }),
        }
    }

    pub fn set_chats(&self, chats: Vec<Conversation>) {
        self.state.lock().unwrap().chats = chats;
    }

    pub fn set_messages(&self, chat: i64, messages: Vec<Message>) {
        self.state.lock().unwrap().messages.insert(ChatId(chat), messages);
    }

    pub fn set_files(&self, chat: i64, files: Vec<FileAttachment>) {
        self.state.lock().unwrap().files.insert(ChatId(chat), files);
    }

    pub fn set_search(&self, users: Vec<User>) {
        self.state.lock().unwrap().search = users;
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    pub fn fail_create(&self, status: u16, message: &str) {
        self.state.lock().unwrap().create_error = Some((status, message.into()));
    }

    pub fn fail_login(&self, status: u16, message: &str) {
        self.state.lock().unwrap().login_error = Some((status, message.into()));
    }

    pub fn fail_current_user(&self, status: u16) {
        self.state.lock().unwrap().me_error = Some(status);
    }

    pub fn require_auth(&self, on: bool) {
        self.state.lock().unwrap().require_auth = on;
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, FakeState>> {
        let state = self.state.lock().unwrap();
        if state.require_auth {
            return Err(ClientError::AuthenticationRequired);
        }
        Ok(state)
    }
}

fn api_error(status: u16, message: &str) -> ClientError {
    ClientError::Api {
        status,
        message: message.into(),
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn register(&self, form: &Registration) -> Result<User> {
        self.log.push(format!("api:register {}", form.username));
        Ok(user(77, &form.username, &form.full_name))
    }

    async fn login(&self, credentials: &LoginRequest) -> Result<AccessToken> {
        self.log.push(format!("api:login {}", credentials.username));
        if let Some((status, msg)) = &self.state.lock().unwrap().login_error {
            return Err(api_error(*status, msg));
        }
        Ok(AccessToken {
            access_token: format!("token-{}", credentials.username),
            token_type: "bearer".into(),
        })
    }

    async fn current_user(&self) -> Result<User> {
        self.log.push("api:me");
        let state = self.guard()?;
        if let Some(status) = state.me_error {
            return Err(api_error(status, "Failed to load user data"));
        }
        state
            .me
            .clone()
            .ok_or(ClientError::Unauthorized)
    }

    async fn update_profile(&self, full_name: &str) -> Result<User> {
        self.log.push(format!("api:profile {full_name}"));
        let mut state = self.guard()?;
        let me = state.me.as_mut().ok_or(ClientError::Unauthorized)?;
        me.full_name = full_name.into();
        Ok(me.clone())
    }

    async fn search_users(&self, query: &str) -> Result<Vec<User>> {
        self.log.push(format!("api:search {query}"));
        Ok(self.guard()?.search.clone())
    }

    async fn list_chats(&self) -> Result<Vec<Conversation>> {
        self.log.push("api:chats");
        Ok(self.guard()?.chats.clone())
    }

    async fn create_or_get_chat(&self, recipient_username: &str) -> Result<Conversation> {
        self.log.push(format!("api:create {recipient_username}"));
        let mut state = self.guard()?;
        if let Some((status, msg)) = &state.create_error {
            return Err(api_error(*status, msg));
        }
        if let Some(chat) = state
            .chats
            .iter()
            .find(|c| c.other_user.username == recipient_username)
        {
            return Ok(chat.clone());
        }
        state.next_id += 1;
        let chat = conversation(state.next_id, user(state.next_id, recipient_username, recipient_username));
        state.chats.push(chat.clone());
        Ok(chat)
    }

    async fn chat_messages(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        self.log.push(format!("api:messages {chat_id}"));
        Ok(self
            .guard()?
            .messages
            .get(&chat_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(&self, chat_id: ChatId, content: &str) -> Result<Message> {
        self.log.push(format!("api:send {chat_id} {content}"));
        let mut state = self.guard()?;
        if state.fail_sends {
            return Err(api_error(500, "Internal Server Error"));
        }
        state.next_id += 1;
        let sender = state.me.as_ref().map(|u| u.id.0).unwrap_or(0);
        Ok(message(state.next_id, chat_id.0, sender, content))
    }

    async fn mark_messages_read(&self, message_ids: &[MessageId]) -> Result<ReadUpdate> {
        let ids: Vec<String> = message_ids.iter().map(|id| id.to_string()).collect();
        self.log.push(format!("api:read {}", ids.join(",")));
        self.guard()?;
        Ok(ReadUpdate {
            updated_count: message_ids.len() as u64,
        })
    }

    async fn unread_count(&self) -> Result<UnreadCount> {
        self.log.push("api:unread");
        self.guard()?;
        Ok(UnreadCount { unread_count: 3 })
    }

    async fn upload_file(&self, chat_id: ChatId, upload: FileUpload) -> Result<FileAttachment> {
        self.log.push(format!("api:upload {chat_id} {}", upload.filename));
        let mut state = self.guard()?;
        state.next_id += 1;
        Ok(file(state.next_id, &upload.filename))
    }

    async fn chat_files(&self, chat_id: ChatId) -> Result<Vec<FileAttachment>> {
        self.log.push(format!("api:files {chat_id}"));
        Ok(self
            .guard()?
            .files
            .get(&chat_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_file(&self, file_id: FileId) -> Result<()> {
        self.log.push(format!("api:delete {file_id}"));
        self.guard()?;
        Ok(())
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("http://fake/files/{file_path}")
    }
}

pub(crate) struct FakePush {
    log: Log,
}

impl FakePush {
    pub fn new(log: Log) -> Self {
        Self { log }
    }
}

impl PushOutbox for FakePush {
    fn join_chat(&self, chat_id: ChatId) {
        self.log.push(format!("push:join {chat_id}"));
    }

    fn send_typing(&self, chat_id: ChatId, is_typing: bool) {
        self.log.push(format!("push:typing {chat_id} {is_typing}"));
    }

    fn send_read_receipt(&self, message_id: MessageId, chat_id: ChatId) {
        self.log.push(format!("push:read {message_id} {chat_id}"));
    }
}

impl PushControl for FakePush {
    fn connect(&self, user_id: UserId) {
        self.log.push(format!("push:connect {user_id}"));
    }

    fn disconnect(&self) {
        self.log.push("push:disconnect");
    }
}

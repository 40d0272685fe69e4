//! API Client: request wrapper over the chat HTTP API.
//!
//! Every endpoint outside `/auth/` fails with
//! [`ClientError::AuthenticationRequired`] when no credential is held, before
//! a request is built. A 401 response clears the credential through
//! [`SessionStore::expire`] and surfaces [`ClientError::Unauthorized`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, error, warn};
use url::Url;

use parley_shared::constants::AUTH_PATH_PREFIX;
use parley_shared::types::{
    AccessToken, ChatId, Conversation, FileAttachment, FileId, LoginRequest, Message, MessageId,
    ReadUpdate, Registration, UnreadCount, User,
};
use parley_shared::validation::validate_upload_size;

use crate::error::{ClientError, Result};
use crate::session::SessionStore;

/// Successful reply: a JSON body, or an empty (204) one.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    Json(T),
    Empty,
}

impl<T> Reply<T> {
    pub fn into_json(self) -> Result<T> {
        match self {
            Reply::Json(value) => Ok(value),
            Reply::Empty => Err(ClientError::Decode("expected a JSON body".into())),
        }
    }
}

/// File contents staged for a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    /// Read a file from disk. The size limit is checked against the file
    /// metadata before its contents are read.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let meta = tokio::fs::metadata(path).await?;
        validate_upload_size(meta.len())?;
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self { filename, bytes })
    }

    pub fn mime_type(&self) -> String {
        mime_guess::from_path(&self.filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }
}

/// Every chat API endpoint the client uses.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn register(&self, form: &Registration) -> Result<User>;
    async fn login(&self, credentials: &LoginRequest) -> Result<AccessToken>;

    async fn current_user(&self) -> Result<User>;
    async fn update_profile(&self, full_name: &str) -> Result<User>;
    async fn search_users(&self, query: &str) -> Result<Vec<User>>;

    async fn list_chats(&self) -> Result<Vec<Conversation>>;
    /// Create the conversation with `recipient_username`, or return the
    /// existing one.
    async fn create_or_get_chat(&self, recipient_username: &str) -> Result<Conversation>;
    async fn chat_messages(&self, chat_id: ChatId) -> Result<Vec<Message>>;
    async fn send_message(&self, chat_id: ChatId, content: &str) -> Result<Message>;
    async fn mark_messages_read(&self, message_ids: &[MessageId]) -> Result<ReadUpdate>;
    async fn unread_count(&self) -> Result<UnreadCount>;

    async fn upload_file(&self, chat_id: ChatId, upload: FileUpload) -> Result<FileAttachment>;
    async fn chat_files(&self, chat_id: ChatId) -> Result<Vec<FileAttachment>>;
    async fn delete_file(&self, file_id: FileId) -> Result<()>;

    /// Download address for a stored file path.
    fn file_url(&self, file_path: &str) -> String;
}

/// [`ChatApi`] over `reqwest`.
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    session: Arc<SessionStore>,
}

impl ApiClient {
    pub fn new(base: &Url, session: Arc<SessionStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base: base.as_str().trim_end_matches('/').to_string(),
            session,
        })
    }

    fn url(&self, endpoint: &str) -> Result<Url> {
        Ok(Url::parse(&format!("{}{}", self.base, endpoint))?)
    }

    fn builder(&self, method: Method, endpoint: &str) -> Result<RequestBuilder> {
        Ok(self.http.request(method, self.url(endpoint)?))
    }

    /// Attach the credential, or fail fast when an authenticated endpoint is
    /// called without one.
    fn authorize(&self, endpoint: &str, builder: RequestBuilder) -> Result<RequestBuilder> {
        match self.session.credential() {
            Some(token) => Ok(builder.bearer_auth(token)),
            None if endpoint.starts_with(AUTH_PATH_PREFIX) => Ok(builder),
            None => {
                debug!(endpoint, "skipping API call: no authentication token");
                Err(ClientError::AuthenticationRequired)
            }
        }
    }

    async fn execute(&self, endpoint: &str, builder: RequestBuilder) -> Result<Response> {
        let builder = self.authorize(endpoint, builder)?;

        let response = builder.send().await.map_err(|e| {
            error!(endpoint, error = %e, "API request failed");
            ClientError::Transport(e)
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!(endpoint, "credential rejected");
            self.session.expire();
            return Err(ClientError::Unauthorized);
        }

        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let message = error_message(status.as_u16(), &body);
            debug!(endpoint, status = status.as_u16(), message = %message, "API error");
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        builder: RequestBuilder,
    ) -> Result<Reply<T>> {
        let response = self.execute(endpoint, builder).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Reply::Empty);
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map(Reply::Json)
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn json<T: DeserializeOwned>(&self, endpoint: &str, builder: RequestBuilder) -> Result<T> {
        self.request(endpoint, builder).await?.into_json()
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let builder = self.builder(Method::GET, endpoint)?;
        self.json(endpoint, builder).await
    }
}

#[async_trait]
impl ChatApi for ApiClient {
    async fn register(&self, form: &Registration) -> Result<User> {
        let endpoint = "/auth/register";
        let builder = self.builder(Method::POST, endpoint)?.json(form);
        self.json(endpoint, builder).await
    }

    async fn login(&self, credentials: &LoginRequest) -> Result<AccessToken> {
        let endpoint = "/auth/login";
        let builder = self.builder(Method::POST, endpoint)?.json(credentials);
        self.json(endpoint, builder).await
    }

    async fn current_user(&self) -> Result<User> {
        self.get("/users/me").await
    }

    async fn update_profile(&self, full_name: &str) -> Result<User> {
        let endpoint = "/users/me";
        let builder = self
            .builder(Method::PUT, endpoint)?
            .query(&[("full_name", full_name)]);
        self.json(endpoint, builder).await
    }

    async fn search_users(&self, query: &str) -> Result<Vec<User>> {
        let endpoint = "/users/search";
        let builder = self.builder(Method::GET, endpoint)?.query(&[("q", query)]);
        self.json(endpoint, builder).await
    }

    async fn list_chats(&self) -> Result<Vec<Conversation>> {
        self.get("/chats/").await
    }

    async fn create_or_get_chat(&self, recipient_username: &str) -> Result<Conversation> {
        let endpoint = "/chats/";
        let primary = self
            .builder(Method::POST, endpoint)?
            .query(&[("recipient_username", recipient_username)]);

        match self.json(endpoint, primary).await {
            Err(ClientError::Api { status: 422, .. }) => {
                debug!("create-or-get rejected as query; retrying with JSON body");
                let fallback = self
                    .builder(Method::POST, endpoint)?
                    .json(&json!({ "recipient_username": recipient_username }));
                self.json(endpoint, fallback).await
            }
            other => other,
        }
    }

    async fn chat_messages(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        self.get(&format!("/chats/{chat_id}/messages")).await
    }

    async fn send_message(&self, chat_id: ChatId, content: &str) -> Result<Message> {
        let endpoint = format!("/chats/{chat_id}/messages");
        let builder = self
            .builder(Method::POST, &endpoint)?
            .json(&json!({ "content": content }));
        self.json(&endpoint, builder).await
    }

    async fn mark_messages_read(&self, message_ids: &[MessageId]) -> Result<ReadUpdate> {
        let endpoint = "/chats/messages/read";
        let builder = self
            .builder(Method::PUT, endpoint)?
            .json(&json!({ "message_ids": message_ids }));
        self.json(endpoint, builder).await
    }

    async fn unread_count(&self) -> Result<UnreadCount> {
        self.get("/chats/unread-count").await
    }

    async fn upload_file(&self, chat_id: ChatId, upload: FileUpload) -> Result<FileAttachment> {
        let endpoint = format!("/chats/{chat_id}/files");
        let mime = upload.mime_type();
        let part = Part::bytes(upload.bytes)
            .file_name(upload.filename)
            .mime_str(&mime)?;
        let builder = self
            .builder(Method::POST, &endpoint)?
            .multipart(Form::new().part("file", part));
        self.json(&endpoint, builder).await
    }

    async fn chat_files(&self, chat_id: ChatId) -> Result<Vec<FileAttachment>> {
        self.get(&format!("/chats/{chat_id}/files")).await
    }

    async fn delete_file(&self, file_id: FileId) -> Result<()> {
        let endpoint = format!("/files/{file_id}");
        let builder = self.builder(Method::DELETE, &endpoint)?;
        match self.request::<Value>(&endpoint, builder).await? {
            Reply::Json(body) => debug!(file = %file_id, body = %body, "file deleted"),
            Reply::Empty => debug!(file = %file_id, "file deleted"),
        }
        Ok(())
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/files/{}", self.base, file_path.trim_start_matches('/'))
    }
}

/// Human-readable message for a failed response: the body's `detail` when
/// present, else a generic status message.
///
/// `detail` is either a string or a list of validation errors carrying `msg`.
pub fn error_message(status: u16, body: &[u8]) -> String {
    let detail = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("detail").cloned());

    match detail {
        Some(Value::String(s)) if !s.is_empty() => s,
        Some(Value::Array(items)) => items
            .iter()
            .find_map(|item| item.get("msg").and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| generic_message(status)),
        _ => generic_message(status),
    }
}

fn generic_message(status: u16) -> String {
    format!("HTTP error! status: {status}")
}

//! Application context and the single event loop.
//!
//! [`App::new`] builds exactly one instance of every component and passes
//! dependencies explicitly. [`App::run`] then multiplexes user commands, push
//! notifications, pull completions, session signals and the typing idle
//! timer onto one task.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use parley_net::{spawn_push_channel, Connector, PushConfig, PushHandle, PushNotification};
use parley_shared::types::{ChatId, ConnectionState, FileId, MessageId, Registration};
use parley_store::CredentialStore;

use crate::api::{ApiClient, ChatApi};
use crate::chats::{Completion, ConversationManager};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::lifecycle::SessionLifecycle;
use crate::presenter::{Presenter, UiEvent};
use crate::session::{SessionSignal, SessionStore};

/// User intents accepted by the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { username: String, password: String },
    Register(Registration),
    Logout,
    RefreshChats,
    OpenChat(ChatId),
    StartChat(String),
    Search(String),
    CloseSearch,
    /// Composer text changed.
    Input(String),
    Send,
    /// Type `text` into the composer and send it.
    Say(String),
    ListFiles,
    Upload(PathBuf),
    DeleteFile(FileId),
    MarkRead(Vec<MessageId>),
    UpdateProfile(String),
    UnreadCount,
    Quit,
}

/// One instance of each component.
pub struct AppContext {
    pub config: ClientConfig,
    pub session: Arc<SessionStore>,
    pub api: Arc<dyn ChatApi>,
    pub push: PushHandle,
    pub presenter: Presenter,
    pub manager: ConversationManager,
    pub lifecycle: SessionLifecycle,
}

pub struct App {
    ctx: AppContext,
    push_rx: mpsc::Receiver<PushNotification>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    session_rx: broadcast::Receiver<SessionSignal>,
}

impl App {
    /// Wire the components together. Must be called inside a tokio runtime;
    /// the push channel task is spawned here but stays idle until login.
    pub fn new(
        config: ClientConfig,
        credentials: Arc<dyn CredentialStore>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let session = Arc::new(SessionStore::load(credentials)?);
        let session_rx = session.subscribe();
        let api: Arc<dyn ChatApi> = Arc::new(ApiClient::new(&config.api_url, session.clone())?);
        Ok(Self::with_api(config, session, session_rx, api, connector))
    }

    /// Same as [`App::new`] with a caller-supplied API implementation.
    pub fn with_api(
        config: ClientConfig,
        session: Arc<SessionStore>,
        session_rx: broadcast::Receiver<SessionSignal>,
        api: Arc<dyn ChatApi>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let presenter = Presenter::new(config.toast_ttl);

        let (push, push_rx) = spawn_push_channel(
            connector,
            PushConfig {
                api_base: config.api_url.clone(),
                policy: config.reconnect,
            },
        );

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let manager = ConversationManager::new(
            api.clone(),
            Arc::new(push.clone()),
            presenter.clone(),
            completion_tx,
            config.typing_idle,
        );
        let lifecycle = SessionLifecycle::new(
            session.clone(),
            api.clone(),
            Arc::new(push.clone()),
            presenter.clone(),
        );

        Self {
            ctx: AppContext {
                config,
                session,
                api,
                push,
                presenter,
                manager,
                lifecycle,
            },
            push_rx,
            completion_rx,
            session_rx,
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Subscribe before [`run`](Self::run) to see the first render.
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.ctx.presenter.subscribe()
    }

    /// Restore any persisted session, then process events until `Quit` or
    /// until the command sender is dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Result<()> {
        info!(api = %self.ctx.config.api_url, "client started");
        self.ctx.lifecycle.restore(&mut self.ctx.manager).await;

        loop {
            let deadline = self.ctx.manager.typing_deadline();

            tokio::select! {
                cmd = commands.recv() => match cmd {
                    None | Some(Command::Quit) => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },

                Some(notification) = self.push_rx.recv() => {
                    self.handle_push(notification);
                }

                Some(completion) = self.completion_rx.recv() => {
                    self.ctx.manager.handle_completion(completion);
                }

                signal = self.session_rx.recv() => match signal {
                    Ok(SessionSignal::Expired) => {
                        self.ctx.lifecycle.handle_session_expired(&mut self.ctx.manager);
                    }
                    Ok(other) => debug!(signal = ?other, "session signal"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "session signals lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },

                _ = wait_until(deadline) => {
                    self.ctx.manager.typing_idle();
                }
            }
        }

        self.ctx.push.disconnect();
        self.ctx.push.shutdown();
        info!("client stopped");
        Ok(())
    }

    async fn handle_command(&mut self, cmd: Command) {
        let AppContext {
            manager,
            lifecycle,
            presenter,
            ..
        } = &mut self.ctx;

        match cmd {
            Command::Login { username, password } => {
                let _ = lifecycle.login(manager, &username, &password).await;
            }
            Command::Register(form) => {
                let _ = lifecycle.register(&form).await;
            }
            Command::Logout => lifecycle.logout(manager),
            Command::RefreshChats => manager.load_chats(),
            Command::OpenChat(chat_id) => {
                if !manager.select_chat(chat_id) {
                    presenter.warning(format!("No chat with id {chat_id}"));
                }
            }
            Command::StartChat(username) => manager.start_chat(&username),
            Command::Search(query) => manager.search_users(&query),
            Command::CloseSearch => manager.close_search(),
            Command::Input(text) => manager.set_input(text),
            Command::Send => manager.send_message(),
            Command::Say(text) => {
                manager.set_input(text);
                manager.send_message();
            }
            Command::ListFiles => match manager.active_chat_id() {
                Some(chat_id) => manager.load_files(chat_id),
                None => presenter.warning("Please select a chat first"),
            },
            Command::Upload(path) => manager.upload_file(path),
            Command::DeleteFile(file_id) => manager.delete_file(file_id),
            Command::MarkRead(ids) => manager.mark_messages_as_read(ids),
            Command::UpdateProfile(name) => {
                let _ = lifecycle.update_profile(manager, &name).await;
            }
            Command::UnreadCount => manager.load_unread_count(),
            Command::Quit => {}
        }
    }

    fn handle_push(&mut self, notification: PushNotification) {
        match notification {
            PushNotification::Opened => {
                self.ctx
                    .presenter
                    .emit(UiEvent::ConnectionChanged(ConnectionState::Open));
                self.ctx.presenter.success("Connected");
            }
            PushNotification::Closed { clean } => {
                debug!(clean, "push channel closed");
                self.ctx
                    .presenter
                    .emit(UiEvent::ConnectionChanged(ConnectionState::Disconnected));
            }
            PushNotification::ReconnectScheduled { attempt, delay } => {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                self.ctx
                    .presenter
                    .emit(UiEvent::ConnectionChanged(ConnectionState::Reconnecting));
            }
            PushNotification::ReconnectExhausted => {
                warn!("push channel gave up reconnecting");
            }
            PushNotification::Event(event) => self.ctx.manager.handle_push(event),
        }
    }
}

async fn wait_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

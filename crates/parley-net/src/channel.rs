//! Push channel state machine with tokio mpsc command/notification pattern.
//!
//! The channel runs in a dedicated tokio task that owns the connection.
//! Callers talk to it through a cloneable [`PushHandle`] and receive
//! [`PushNotification`]s on the paired receiver.
//!
//! States: `Disconnected → Connecting → Open → Disconnected`, with
//! `Reconnecting` entered only after an unclean close while retry budget
//! remains.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};
use url::Url;

use parley_shared::protocol::{InboundEvent, OutboundIntent};
use parley_shared::types::{ChatId, ConnectionState, MessageId, UserId};

use crate::backoff::{Backoff, ReconnectPolicy};
use crate::error::NetError;
use crate::transport::{push_url, Connection, Connector, TransportEvent};

const CHANNEL_BUFFER: usize = 256;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the push task.
#[derive(Debug)]
pub enum PushCommand {
    /// Open a connection for this user unless one exists or is in progress.
    Connect { user_id: UserId },
    /// Best-effort outbound frame; dropped unless the channel is open.
    Send(OutboundIntent),
    /// Intentional close. Never followed by a reconnect.
    Disconnect,
    /// Stop the task.
    Shutdown,
}

/// Notifications sent *from* the push task to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum PushNotification {
    Opened,
    Closed { clean: bool },
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Retry budget spent; stays disconnected until the next `connect`.
    ReconnectExhausted,
    Event(InboundEvent),
}

/// Snapshot published on every state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushStatus {
    pub state: ConnectionState,
    /// Last conversation announced with `join_chat`.
    pub joined_chat: Option<ChatId>,
}

impl Default for PushStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            joined_chat: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Base address of the chat API; the push address is derived from it.
    pub api_base: Url,
    pub policy: ReconnectPolicy,
}

/// Outbound intents the conversation layer emits.
pub trait PushOutbox: Send + Sync {
    fn join_chat(&self, chat_id: ChatId);
    fn send_typing(&self, chat_id: ChatId, is_typing: bool);
    fn send_read_receipt(&self, message_id: MessageId, chat_id: ChatId);
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PushHandle {
    cmd_tx: mpsc::Sender<PushCommand>,
    status_rx: watch::Receiver<PushStatus>,
}

impl PushHandle {
    pub fn connect(&self, user_id: UserId) {
        self.command(PushCommand::Connect { user_id });
    }

    pub fn disconnect(&self) {
        self.command(PushCommand::Disconnect);
    }

    pub fn shutdown(&self) {
        self.command(PushCommand::Shutdown);
    }

    pub fn status(&self) -> PushStatus {
        *self.status_rx.borrow()
    }

    fn command(&self, cmd: PushCommand) {
        if let Err(e) = self.cmd_tx.try_send(cmd) {
            warn!(error = %e, "push command dropped");
        }
    }
}

impl PushOutbox for PushHandle {
    fn join_chat(&self, chat_id: ChatId) {
        self.command(PushCommand::Send(OutboundIntent::JoinChat { chat_id }));
    }

    fn send_typing(&self, chat_id: ChatId, is_typing: bool) {
        self.command(PushCommand::Send(OutboundIntent::Typing { chat_id, is_typing }));
    }

    fn send_read_receipt(&self, message_id: MessageId, chat_id: ChatId) {
        self.command(PushCommand::Send(OutboundIntent::MessageRead {
            message_id,
            chat_id,
        }));
    }
}

/// Spawn the push channel task.
///
/// Returns the command handle and the notification receiver. The task stays
/// idle (disconnected) until [`PushHandle::connect`] is called.
pub fn spawn_push_channel(
    connector: Arc<dyn Connector>,
    config: PushConfig,
) -> (PushHandle, mpsc::Receiver<PushNotification>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_BUFFER);
    let (notif_tx, notif_rx) = mpsc::channel(CHANNEL_BUFFER);
    let (status_tx, status_rx) = watch::channel(PushStatus::default());

    let actor = PushActor {
        backoff: Backoff::new(config.policy),
        connector,
        config,
        cmd_rx,
        notif_tx,
        status_tx,
        state: ConnectionState::Disconnected,
        user: None,
        joined_chat: None,
        conn: None,
        pending: None,
        retry: None,
    };
    tokio::spawn(actor.run());

    (PushHandle { cmd_tx, status_rx }, notif_rx)
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

type PendingConnect = BoxFuture<'static, Result<Connection, NetError>>;

struct PushActor {
    connector: Arc<dyn Connector>,
    config: PushConfig,
    cmd_rx: mpsc::Receiver<PushCommand>,
    notif_tx: mpsc::Sender<PushNotification>,
    status_tx: watch::Sender<PushStatus>,
    state: ConnectionState,
    user: Option<UserId>,
    joined_chat: Option<ChatId>,
    conn: Option<Connection>,
    pending: Option<PendingConnect>,
    retry: Option<Pin<Box<Sleep>>>,
    backoff: Backoff,
}

impl PushActor {
    async fn run(mut self) {
        info!("push channel task started");

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(PushCommand::Shutdown) | None => break,
                    Some(cmd) => self.on_command(cmd).await,
                },

                result = poll_pending(&mut self.pending) => {
                    self.pending = None;
                    self.on_connect_result(result).await;
                }

                event = recv_event(&mut self.conn) => {
                    self.on_transport(event).await;
                }

                _ = wait_retry(&mut self.retry) => {
                    self.retry = None;
                    self.on_retry();
                }
            }
        }

        info!("push channel task terminated");
    }

    async fn on_command(&mut self, cmd: PushCommand) {
        match cmd {
            PushCommand::Connect { user_id } => {
                if self.conn.is_some() || self.pending.is_some() {
                    debug!(user = %user_id, "connect ignored: connection already exists");
                    return;
                }
                self.user = Some(user_id);
                self.retry = None;
                self.start_connect();
            }

            PushCommand::Send(intent) => {
                if let OutboundIntent::JoinChat { chat_id } = intent {
                    self.joined_chat = Some(chat_id);
                    self.publish();
                }
                self.send_intent(&intent);
            }

            PushCommand::Disconnect => {
                self.retry = None;
                self.pending = None;
                self.user = None;
                self.joined_chat = None;
                self.backoff.reset();
                let had_conn = self.conn.take().is_some();
                self.set_state(ConnectionState::Disconnected);
                if had_conn {
                    info!("push channel closed by client");
                    self.notify(PushNotification::Closed { clean: true }).await;
                }
            }

            PushCommand::Shutdown => {}
        }
    }

    fn start_connect(&mut self) {
        let Some(user_id) = self.user else {
            debug!("connect skipped: no authenticated user");
            return;
        };
        let url = match push_url(&self.config.api_base, user_id) {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "cannot derive push address");
                return;
            }
        };

        debug!(url = %url, "opening push channel");
        self.set_state(ConnectionState::Connecting);
        let connector = self.connector.clone();
        self.pending = Some(Box::pin(async move { connector.connect(&url).await }));
    }

    async fn on_connect_result(&mut self, result: Result<Connection, NetError>) {
        match result {
            Ok(conn) => {
                self.conn = Some(conn);
                self.backoff.reset();
                self.set_state(ConnectionState::Open);
                info!("push channel connected");
                self.notify(PushNotification::Opened).await;
            }
            Err(e) => {
                warn!(error = %e, "push channel connection failed");
                self.set_state(ConnectionState::Disconnected);
                self.notify(PushNotification::Closed { clean: false }).await;
                self.schedule_reconnect().await;
            }
        }
    }

    async fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(text) => match InboundEvent::from_text(&text) {
                Ok(InboundEvent::Unknown) => {
                    debug!(frame = %text, "ignoring push frame of unknown type");
                }
                Ok(event) => self.notify(PushNotification::Event(event)).await,
                Err(e) => warn!(error = %e, "malformed push frame"),
            },

            TransportEvent::Closed { clean } => {
                self.conn = None;
                self.set_state(ConnectionState::Disconnected);
                info!(clean, "push channel disconnected");
                self.notify(PushNotification::Closed { clean }).await;
                if !clean {
                    self.schedule_reconnect().await;
                }
            }
        }
    }

    fn on_retry(&mut self) {
        if self.conn.is_none() && self.pending.is_none() {
            self.start_connect();
        }
    }

    async fn schedule_reconnect(&mut self) {
        match self.backoff.next_attempt() {
            Some((attempt, delay)) => {
                info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling push reconnect"
                );
                self.set_state(ConnectionState::Reconnecting);
                self.retry = Some(Box::pin(tokio::time::sleep(delay)));
                self.notify(PushNotification::ReconnectScheduled { attempt, delay })
                    .await;
            }
            None => {
                warn!(
                    attempts = self.backoff.attempts(),
                    "push reconnect budget exhausted"
                );
                self.notify(PushNotification::ReconnectExhausted).await;
            }
        }
    }

    fn send_intent(&self, intent: &OutboundIntent) {
        let conn = match (&self.conn, self.state) {
            (Some(conn), ConnectionState::Open) => conn,
            _ => {
                debug!(intent = ?intent, "push channel not open; dropping intent");
                return;
            }
        };

        match intent.to_text() {
            Ok(text) => {
                if !conn.try_send(text) {
                    warn!(intent = ?intent, "push outbound buffer full; dropping intent");
                }
            }
            Err(e) => error!(error = %e, "failed to encode push intent"),
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(PushStatus {
            state: self.state,
            joined_chat: self.joined_chat,
        });
    }

    async fn notify(&mut self, notification: PushNotification) {
        if self.notif_tx.send(notification).await.is_err() {
            debug!("push notification receiver dropped");
        }
    }
}

async fn poll_pending(pending: &mut Option<PendingConnect>) -> Result<Connection, NetError> {
    match pending {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn recv_event(conn: &mut Option<Connection>) -> TransportEvent {
    match conn {
        Some(conn) => conn.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

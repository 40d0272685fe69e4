//! Transport seam for the push channel.
//!
//! A [`Connection`] is a pair of channels: outbound text frames and inbound
//! [`TransportEvent`]s. [`WsConnector`] backs it with a real WebSocket; tests
//! plug in their own [`Connector`] and drive the peer side directly.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use url::Url;

use parley_shared::constants::PUSH_PATH_PREFIX;
use parley_shared::types::UserId;

use crate::error::NetError;

const FRAME_BUFFER: usize = 256;

/// What the transport reports to the channel actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame from the server.
    Frame(String),
    /// The connection ended. `clean` is true when a close handshake was
    /// received; errors and abrupt EOF are unclean.
    Closed { clean: bool },
}

/// One open duplex connection. Dropping it closes the connection cleanly.
pub struct Connection {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<TransportEvent>,
}

/// The far side of a [`Connection`] created with [`Connection::channel`].
pub struct ConnectionPeer {
    /// Frames the client sent.
    pub sent: mpsc::Receiver<String>,
    /// Inject frames or a close.
    pub events: mpsc::Sender<TransportEvent>,
}

impl Connection {
    pub fn new(
        outbound: mpsc::Sender<String>,
        inbound: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }

    /// In-memory connection with direct access to the peer end.
    pub fn channel() -> (Self, ConnectionPeer) {
        let (out_tx, out_rx) = mpsc::channel(FRAME_BUFFER);
        let (in_tx, in_rx) = mpsc::channel(FRAME_BUFFER);
        (
            Self::new(out_tx, in_rx),
            ConnectionPeer {
                sent: out_rx,
                events: in_tx,
            },
        )
    }

    /// Queue a frame without waiting. Returns false when it was dropped.
    pub fn try_send(&self, text: String) -> bool {
        self.outbound.try_send(text).is_ok()
    }

    /// Next transport event. A vanished transport counts as an unclean close.
    pub async fn recv(&mut self) -> TransportEvent {
        self.inbound
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed { clean: false })
    }
}

/// Opens push connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<Connection, NetError>;
}

/// [`Connector`] over `tokio-tungstenite`.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Connection, NetError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(FRAME_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<TransportEvent>(FRAME_BUFFER);

        // Writer: forwards frames until the Connection is dropped, then closes.
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                    debug!(error = %e, "push write failed");
                    return;
                }
            }
            if let Err(e) = sink.close().await {
                debug!(error = %e, "push close failed");
            }
        });

        // Reader
        tokio::spawn(async move {
            let clean = loop {
                match stream.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        if in_tx.send(TransportEvent::Frame(text)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        debug!(frame = ?frame, "push close frame received");
                        break true;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "push read failed");
                        break false;
                    }
                    None => break false,
                }
            };
            let _ = in_tx.send(TransportEvent::Closed { clean }).await;
        });

        Ok(Connection::new(out_tx, in_rx))
    }
}

/// Push address for a user: same host as the API, `ws` for `http` and `wss`
/// for `https`, path `/ws/{user_id}`.
pub fn push_url(api_base: &Url, user_id: UserId) -> Result<Url, NetError> {
    let mut url = api_base.clone();
    let scheme = match api_base.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(NetError::InvalidUrl(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| NetError::InvalidUrl(api_base.to_string()))?;
    url.set_path(&format!("{PUSH_PATH_PREFIX}/{user_id}"));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

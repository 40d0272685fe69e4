//! Push channel client: one long-lived WebSocket per authenticated session,
//! reconnected with exponential backoff after unclean closes.

pub mod backoff;
pub mod channel;
pub mod error;
pub mod transport;

pub use backoff::{Backoff, ReconnectPolicy};
pub use channel::{
    spawn_push_channel, PushCommand, PushConfig, PushHandle, PushNotification, PushOutbox,
    PushStatus,
};
pub use error::NetError;
pub use transport::{push_url, Connection, Connector, TransportEvent, WsConnector};

//! # parley-shared
//!
//! Types shared by every Parley crate: the domain model returned by the chat
//! API, the push-channel wire frames, input validation and the small display
//! helpers used when rendering conversations.

pub mod constants;
pub mod error;
pub mod format;
pub mod protocol;
pub mod time;
pub mod types;
pub mod validation;

pub use error::{ProtocolError, ValidationError};
pub use protocol::{InboundEvent, OutboundIntent};
pub use types::*;

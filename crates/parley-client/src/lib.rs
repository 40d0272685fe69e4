//! # parley-client
//!
//! Headless chat client. Pulls state from the chat API, folds push-channel
//! events into the same render model and reports everything to front ends
//! through [`presenter::UiEvent`]s.

pub mod api;
pub mod app;
pub mod chats;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod presenter;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ChatApi, FileUpload, Reply};
pub use app::{App, AppContext, Command};
pub use chats::{ChatView, Completion, ConversationManager};
pub use config::ClientConfig;
pub use error::{ApiErrorKind, ClientError, Result};
pub use lifecycle::{PushControl, SessionLifecycle};
pub use presenter::{Presenter, ToastLevel, UiEvent};
pub use session::{SessionSignal, SessionStore};

use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_FILTER: &str =
    "parley_cli=info,parley_client=debug,parley_net=debug,parley_store=info,warn";

/// Install the global tracing subscriber on stderr. `RUST_LOG` wins over
/// the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

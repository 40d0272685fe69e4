use thiserror::Error;

use parley_shared::ValidationError;
use parley_store::StoreError;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    /// No credential is held; raised before any request is built.
    #[error("Authentication required")]
    AuthenticationRequired,

    /// The server rejected the credential. It has already been cleared.
    #[error("Session expired, please log in again")]
    Unauthorized,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Coarse classification of API rejections by HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    BadRequest,
    Forbidden,
    NotFound,
    Conflict,
    Unprocessable,
    Server,
    Other,
}

impl ApiErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            422 => Self::Unprocessable,
            500..=599 => Self::Server,
            _ => Self::Other,
        }
    }
}

impl ClientError {
    /// HTTP status of a server rejection.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Unauthorized => Some(401),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            Self::Api { status, .. } => Some(ApiErrorKind::from_status(*status)),
            _ => None,
        }
    }

    /// True for both the local fast-fail and a server-side 401.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthenticationRequired | Self::Unauthorized)
    }
}

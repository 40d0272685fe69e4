use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Invalid push address: {0}")]
    InvalidUrl(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connection refused: {0}")]
    Refused(String),
}

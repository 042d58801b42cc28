use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session configuration error: {0}")]
    Config(String),

    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Session closed")]
    Closed,
}

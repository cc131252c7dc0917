//! Error types for the relay service.

use thiserror::Error;

use dglink_protocol::ProtocolError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("relay io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("json encode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid relay config: {0}")]
    Config(#[from] toml::de::Error),
}

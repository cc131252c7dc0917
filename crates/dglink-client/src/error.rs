use thiserror::Error;

use dglink_protocol::ProtocolError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The relay answered a request with an `error` message.
    #[error("relay rejected request (code {code:?}): {message}")]
    Rejected { code: Option<u16>, message: String },

    /// A `bind` came back with a failure reason such as `notFound`.
    #[error("bind rejected: {0}")]
    BindRejected(String),

    #[error("unexpected reply to {request}: {reply}")]
    UnexpectedReply {
        request: &'static str,
        reply: &'static str,
    },

    #[error("no controller bound within {0:?}")]
    BindTimeout(std::time::Duration),

    #[error("device error: {0}")]
    Device(String),

    #[error("connection closed")]
    Closed,
}

impl ClientError {
    /// Numeric relay code, when the failure came from the relay.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Protocol(e) => Some(e.code().as_u16()),
            Self::Rejected { code, .. } => *code,
            _ => None,
        }
    }
}

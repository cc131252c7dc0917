//! Protocol error taxonomy and the numeric codes carried on the wire.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A decodable message that only the relay may send.
    #[error("unexpected message type from client: {0}")]
    UnexpectedMessage(&'static str),

    #[error("session is not bound to a peer")]
    NotBound,

    #[error("session is already bound")]
    AlreadyBound,

    #[error("target client not found: {0}")]
    NotFound(String),

    #[error("invalid frame length: expected {expected} hex characters, got {actual}")]
    InvalidFrameLength { expected: usize, actual: usize },

    #[error("invalid frame encoding: {0}")]
    InvalidFrameEncoding(String),

    #[error("delivery timed out")]
    DeliveryTimeout,

    #[error("identifier space exhausted after {attempts} attempts")]
    RegistryExhausted { attempts: u32 },

    #[error("client id does not belong to this session: {0}")]
    InvalidClientId(String),

    #[error("a session cannot bind to itself")]
    SelfBind,

    #[error("pulse batch of {len} frames exceeds limit of {limit}")]
    MessageTooLong { len: usize, limit: usize },

    #[error("peer disconnected")]
    PeerDisconnected,

    #[error("relay is shutting down")]
    ShuttingDown,
}

impl ProtocolError {
    /// Numeric code sent alongside this error in `error` messages.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MalformedMessage(_)
            | Self::UnexpectedMessage(_)
            | Self::InvalidFrameLength { .. }
            | Self::InvalidFrameEncoding(_) => ErrorCode::MalformedMessage,
            Self::NotBound | Self::SelfBind => ErrorCode::NotBound,
            Self::AlreadyBound => ErrorCode::AlreadyBound,
            Self::NotFound(_) => ErrorCode::TargetNotFound,
            Self::DeliveryTimeout => ErrorCode::DeliveryTimeout,
            Self::RegistryExhausted { .. } | Self::ShuttingDown => ErrorCode::Internal,
            Self::InvalidClientId(_) => ErrorCode::InvalidClientId,
            Self::MessageTooLong { .. } => ErrorCode::MessageTooLong,
            Self::PeerDisconnected => ErrorCode::PeerDisconnected,
        }
    }

    /// Short camelCase token used as the `message` of a failed `bind` result.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedMessage(_) => "malformedMessage",
            Self::UnexpectedMessage(_) => "unexpectedMessage",
            Self::NotBound => "notBound",
            Self::AlreadyBound => "alreadyBound",
            Self::NotFound(_) => "notFound",
            Self::InvalidFrameLength { .. } => "invalidFrameLength",
            Self::InvalidFrameEncoding(_) => "invalidFrameEncoding",
            Self::DeliveryTimeout => "deliveryTimeout",
            Self::RegistryExhausted { .. } => "registryExhausted",
            Self::InvalidClientId(_) => "invalidClientId",
            Self::SelfBind => "selfBind",
            Self::MessageTooLong { .. } => "messageTooLong",
            Self::PeerDisconnected => "peerDisconnected",
            Self::ShuttingDown => "shuttingDown",
        }
    }
}

/// Return codes, numbered after the DG-LAB socket protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Success,
    PeerDisconnected,
    InvalidClientId,
    DeliveryTimeout,
    AlreadyBound,
    TargetNotFound,
    NotBound,
    MalformedMessage,
    RecipientNotFound,
    MessageTooLong,
    Internal,
    Unknown(u16),
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Success => 200,
            Self::PeerDisconnected => 209,
            Self::InvalidClientId => 210,
            Self::DeliveryTimeout => 211,
            Self::AlreadyBound => 400,
            Self::TargetNotFound => 401,
            Self::NotBound => 402,
            Self::MalformedMessage => 403,
            Self::RecipientNotFound => 404,
            Self::MessageTooLong => 405,
            Self::Internal => 500,
            Self::Unknown(code) => code,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PeerDisconnected => "peer disconnected",
            Self::InvalidClientId => "invalid client id",
            Self::DeliveryTimeout => "delivery timed out",
            Self::AlreadyBound => "id already bound",
            Self::TargetNotFound => "target client not found",
            Self::NotBound => "sender and recipient are not bound",
            Self::MalformedMessage => "malformed message",
            Self::RecipientNotFound => "recipient not found",
            Self::MessageTooLong => "message too long",
            Self::Internal => "internal server error",
            Self::Unknown(_) => "unknown error",
        }
    }
}

impl From<u16> for ErrorCode {
    fn from(code: u16) -> Self {
        match code {
            200 => Self::Success,
            209 => Self::PeerDisconnected,
            210 => Self::InvalidClientId,
            211 => Self::DeliveryTimeout,
            400 => Self::AlreadyBound,
            401 => Self::TargetNotFound,
            402 => Self::NotBound,
            403 => Self::MalformedMessage,
            404 => Self::RecipientNotFound,
            405 => Self::MessageTooLong,
            500 => Self::Internal,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_u16(), self.description())
    }
}

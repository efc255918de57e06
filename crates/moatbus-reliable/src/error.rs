/// Why a `send()` did not complete.
///
/// Cloned into every affected caller when a channel-wide failure resolves
/// all pending sends at once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReliableError {
    /// The channel was closed locally.
    #[error("channel closed")]
    Closed,

    /// The peer sent a terminal reset.
    #[error("channel closed by peer: {}", .0.as_deref().unwrap_or("no reason given"))]
    PeerClosed(Option<String>),

    /// The session was reset while the message was in flight.
    #[error("channel reset: {0}")]
    Reset(String),

    /// The link below failed.
    #[error("link failed: {0}")]
    Transport(String),

    /// Invalid channel parameters.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Errors of a [`Link`](crate::Link) implementation.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The link is gone.
    #[error("link closed")]
    Closed,

    /// A wire message could not be encoded.
    #[error("wire encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// The serial line failed.
    #[error("serial error: {0}")]
    Serial(#[from] moatbus_frame::SerialError),

    /// The carrying bus message could not be built.
    #[error("bus message error: {0}")]
    Message(#[from] moatbus_message::MessageError),
}

pub type Result<T> = std::result::Result<T, ReliableError>;

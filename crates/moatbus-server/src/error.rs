use crate::obj::Serial;

/// Errors of the bus server and its controllers.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Every client id in 1..=126 is taken.
    #[error("no free client id")]
    NoFreeId,

    /// The device was required to be known already.
    #[error("unknown serial {0}")]
    UnknownSerial(Serial),

    /// The device was required to be new.
    #[error("serial {0} already known")]
    SerialExists(Serial),

    /// A control payload ended early.
    #[error("control message too short")]
    ShortMessage,

    /// A control payload carried trailing bytes.
    #[error("control message has {0} trailing bytes")]
    LongMessage(usize),

    /// Serial numbers are 1 to 16 bytes long.
    #[error("serial length {0} outside 1..=16")]
    SerialLength(usize),

    /// Client ids 0 and 127 are never assigned.
    #[error("client id {0} is reserved")]
    ReservedId(u8),

    /// Server ids are 1..=3.
    #[error("server id {0} outside 1..=3")]
    InvalidServerId(u8),

    /// A bus message could not be built.
    #[error("message error: {0}")]
    Message(#[from] moatbus_message::MessageError),

    /// The bus below failed.
    #[error("bus error: {0}")]
    Bus(String),
}

impl From<moatbus_frame::SerialError> for ServerError {
    fn from(err: moatbus_frame::SerialError) -> Self {
        ServerError::Bus(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

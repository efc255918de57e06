use moatbus_message::MessageError;

/// Recoverable framing errors, reported through
/// [`FrameSink::report_error`](crate::FrameSink::report_error).
///
/// The framer always recovers by discarding the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// A byte arrived while a completed frame was still unconsumed.
    #[error("frame overflow (previous frame not consumed)")]
    Overflow,

    /// The line went idle in the middle of a frame.
    #[error("frame lost (line idle mid-frame)")]
    Lost,

    /// A frame with an impossible length.
    #[error("spurious frame")]
    Spurious,

    /// Checksum mismatch.
    #[error("CRC mismatch")]
    Crc,

    /// Checksum matched but the header could not be decoded.
    #[error("malformed message header")]
    Malformed,
}

impl FrameError {
    /// Numeric code used in bus diagnostics.
    pub fn code(self) -> u8 {
        match self {
            FrameError::Overflow => 1,
            FrameError::Lost => 2,
            FrameError::Spurious => 3,
            FrameError::Crc => 4,
            FrameError::Malformed => 5,
        }
    }
}

/// Errors from the serial drivers.
#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    /// An I/O error occurred on the line.
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The underlying endpoint failed.
    #[error("transport error: {0}")]
    Transport(#[from] moatbus_transport::TransportError),

    /// The line was closed.
    #[error("serial line closed")]
    ConnectionClosed,

    /// The message does not fit a frame's 15-bit length field.
    #[error("frame too long ({size} bytes, max {max})")]
    TooLong { size: usize, max: usize },

    /// The message could not be built.
    #[error("message error: {0}")]
    Message(#[from] MessageError),
}

pub type Result<T> = std::result::Result<T, SerialError>;

/// Errors produced while building or reassembling bus messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// Address outside `-4..=127`.
    #[error("bus address {0} out of range (-4..=127)")]
    AddressOutOfRange(i16),

    /// The command code does not fit the bits left over by the address forms.
    #[error("code {code} does not fit in {bits} header bits")]
    CodeOutOfRange { code: u16, bits: u8 },

    /// Priority outside `0..=3`.
    #[error("priority {0} out of range (0..=3)")]
    InvalidPriority(u8),

    /// Reassembly ended before a complete header was seen.
    #[error("header incomplete ({bits} bits received)")]
    HeaderIncomplete { bits: usize },

    /// Chunk width unusable for the physical layer.
    #[error("invalid chunk width {0} bits")]
    ChunkWidth(u32),
}

pub type Result<T> = std::result::Result<T, MessageError>;

//! The MoatBus message model.
//!
//! A [`BusMessage`] carries a destination, a source, a small command code and
//! a byte payload. The three header fields are bit-packed into one, two or
//! three bytes depending on whether each address is a short server/broadcast
//! slot or a long client id. Physical layers with odd symbol widths move
//! messages as a stream of fixed-width chunks; [`Chunks`] produces them and
//! [`MessageAssembler`] puts them back together.

pub mod address;
pub mod bits;
pub mod chunk;
pub mod error;
pub mod header;
pub mod message;
pub mod minifloat;

pub use address::Address;
pub use bits::BitBuf;
pub use chunk::{Chunks, MessageAssembler, CONTINUATION_BITS};
pub use error::{MessageError, Result};
pub use header::{Header, HeaderDecoder, HeaderLayout};
pub use message::{BusMessage, ControlCommand, MessageKind, MAX_PRIO};

//! Serial line framing for MoatBus.
//!
//! One UART carries both binary frames and the human-readable console output
//! of the node on the other end:
//! - a priority marker byte (`0x01`, `0x02`, `0x81`, `0x82`) starts a frame
//! - a one or two byte length, header + payload, and a big-endian CRC-16 follow
//! - `0x06` acknowledges a frame; any other byte is console text
//!
//! [`SerialFramer`] is the Sans-IO state machine. [`SerialPort`] drives it on
//! a blocking stream, [`SerialBus`] (feature `async`) on a tokio task.

pub mod codec;
pub mod crc;
pub mod error;
pub mod event;
pub mod port;
pub mod serial;

#[cfg(feature = "async")]
pub mod async_codec;
#[cfg(feature = "async")]
pub mod bus;

pub use codec::{encode_frame, marker_prio, FramerConfig, ACK, MAX_FRAME_LEN, PRIO_MARKERS};
pub use crc::Crc16;
pub use error::{FrameError, Result, SerialError};
pub use event::{EventQueue, SerialEvent};
pub use port::SerialPort;
pub use serial::{is_heartbeat, FrameSink, FramerStats, SerialFramer};

#[cfg(feature = "async")]
pub use async_codec::{Outgoing, SerialCodec};
#[cfg(feature = "async")]
pub use bus::{BusSender, SerialBus};

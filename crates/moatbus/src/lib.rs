//! MoatBus: a small-message bus for microcontrollers and their hosts.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte-stream endpoints (Unix sockets, TCP bridges)
//! - [`message`]: addresses, bit-packed headers, payloads and chunking
//! - [`frame`]: CRC-checked serial frames interleaved with console text
//! - [`reliable`]: windowed ARQ channel (behind `async` feature)
//! - [`server`]: address assignment and polling (behind `async` feature)

/// Re-export transport types.
pub mod transport {
    pub use moatbus_transport::*;
}

/// Re-export message types.
pub mod message {
    pub use moatbus_message::*;
}

/// Re-export frame types.
pub mod frame {
    pub use moatbus_frame::*;
}

/// Re-export reliable channel types (requires `async` feature).
#[cfg(feature = "async")]
pub mod reliable {
    pub use moatbus_reliable::*;
}

/// Re-export server types (requires `async` feature).
#[cfg(feature = "async")]
pub mod server {
    pub use moatbus_server::*;
}

pub use moatbus_message::{Address, BusMessage};

//! Byte-stream endpoints for a MoatBus serial line.
//!
//! The serial framer only needs a duplex byte stream. On real hardware that is
//! a UART; in development it is usually a Unix domain socket simulating a
//! shared bus, or a TCP connection to a serial bridge. This crate provides
//! both behind one [`BusStream`] type, plus [`Endpoint`] parsing so tools can
//! accept either form on the command line.

pub mod endpoint;
pub mod error;
pub mod stream;

#[cfg(feature = "async")]
pub mod async_stream;

#[cfg(unix)]
pub mod uds;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use stream::BusStream;

#[cfg(feature = "async")]
pub use async_stream::AsyncBusStream;

#[cfg(unix)]
pub use uds::BusSocket;

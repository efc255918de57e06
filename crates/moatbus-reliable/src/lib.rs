//! Reliable, ordered message delivery over a lossy MoatBus link.
//!
//! A [`Session`] implements sliding-window ARQ with cumulative and
//! selective acknowledgements and a three-level reset handshake, without
//! doing any I/O itself. [`ReliableChannel`] runs a session on a tokio task
//! over any [`Link`]: an in-process [`MemoryLink`] pair, or a [`BusLink`]
//! on a serial bus.
//!
//! ```no_run
//! use moatbus_reliable::{MemoryLink, ReliableChannel, ReliableConfig};
//!
//! # async fn demo() -> moatbus_reliable::Result<()> {
//! let (a, b) = MemoryLink::pair();
//! let a = ReliableChannel::open(a, ReliableConfig::default())?;
//! let b = ReliableChannel::open(b, ReliableConfig::default())?;
//! a.send(&b"ping"[..]).await?;
//! assert_eq!(b.recv().await.as_deref(), Some(&b"ping"[..]));
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod link;
pub mod session;
mod timer;
pub mod wire;

pub use channel::{ChannelState, ReliableChannel};
pub use config::{ReliableConfig, MIN_TIMEOUT, MIN_WINDOW};
pub use error::{LinkError, ReliableError, Result};
pub use link::{BusLink, Link, MemoryLink};
pub use session::{Session, SessionEvent, SessionStats, Ticket};
pub use wire::{Action, ResetParams, WireMessage};

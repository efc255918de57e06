//! Address assignment and liveness polling for MoatBus servers.
//!
//! A [`Server`] sits on the bus at one of the three server slots. Devices
//! broadcast address requests carrying their serial number; the
//! [`AddressController`] registers them in the [`ClientStore`] and answers
//! with the assigned client id. The [`PollController`] periodically asks
//! sleeping devices to report in.

pub mod aa;
pub mod addr;
pub mod error;
pub mod obj;
pub mod output;
pub mod poll;
pub mod server;
pub mod store;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use aa::{AaRecord, PollReply};
pub use addr::AddressController;
pub use error::{Result, ServerError};
pub use obj::{BusObject, Serial, MAX_SERIAL_LEN};
pub use output::{BusOutput, ChannelOutput};
pub use poll::PollController;
pub use server::{Server, ServerConfig, REPLY_CODE};
pub use store::{ClientInfo, ClientStore, Lookup, StoreEvent};

/// Lock the registry; a panic elsewhere does not make it unusable.
pub(crate) fn lock(store: &Mutex<ClientStore>) -> MutexGuard<'_, ClientStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

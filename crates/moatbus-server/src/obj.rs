use std::fmt;
use std::time::{Duration, Instant};

use crate::error::{Result, ServerError};

/// Longest device serial number, in bytes.
pub const MAX_SERIAL_LEN: usize = 16;

/// A device's immutable identity bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Serial(Box<[u8]>);

impl Serial {
    pub fn new(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() || bytes.len() > MAX_SERIAL_LEN {
            return Err(ServerError::SerialLength(bytes.len()));
        }
        Ok(Self(bytes.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Serial({self})")
    }
}

/// One device seen on the bus.
///
/// Owned by the [`ClientStore`](crate::ClientStore); survives
/// deregistration so a returning device keeps its flags.
#[derive(Debug, Clone)]
pub struct BusObject {
    serial: Serial,
    client_id: Option<u8>,
    /// The device announced that it sleeps between polls.
    pub polled: bool,
    working_until: Option<Instant>,
    attached: bool,
}

impl BusObject {
    pub fn new(serial: Serial) -> Self {
        Self {
            serial,
            client_id: None,
            polled: false,
            working_until: None,
            attached: false,
        }
    }

    pub fn serial(&self) -> &Serial {
        &self.serial
    }

    /// Assigned bus address, if registered.
    pub fn client_id(&self) -> Option<u8> {
        self.client_id
    }

    pub(crate) fn set_client_id(&mut self, id: Option<u8>) {
        self.client_id = id;
        self.attached = id.is_some();
    }

    /// Whether the device is on the bus this server controls.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn detach(&mut self) {
        self.attached = false;
    }

    /// The device said it stays awake for `live` from `now`.
    pub fn set_working(&mut self, now: Instant, live: Duration) {
        self.working_until = Some(now + live);
    }

    pub fn working_until(&self) -> Option<Instant> {
        self.working_until
    }

    pub fn is_working(&self, now: Instant) -> bool {
        self.working_until.is_some_and(|until| now < until)
    }
}

impl fmt::Display for BusObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.client_id {
            Some(id) => write!(f, "<{}@{id}>", self.serial),
            None => write!(f, "<{}>", self.serial),
        }
    }
}

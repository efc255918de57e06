use std::fmt;

use crate::error::{MessageError, Result};

/// A logical bus address.
///
/// On the wire an address is a signed number: `-4` is broadcast, `-3..=-1`
/// are servers 1..3 and `0..=127` are clients. Negative addresses use the
/// short three-bit header form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Address {
    Broadcast,
    /// Server slot 1..=3.
    Server(u8),
    /// Client id 0..=127.
    Client(u8),
}

impl Address {
    /// Highest client id.
    pub const MAX_CLIENT: u8 = 127;
    /// Number of server slots.
    pub const SERVERS: u8 = 3;

    pub fn from_raw(raw: i8) -> Result<Self> {
        match raw {
            -4 => Ok(Address::Broadcast),
            -3..=-1 => Ok(Address::Server((raw + 4) as u8)),
            0..=127 => Ok(Address::Client(raw as u8)),
            _ => Err(MessageError::AddressOutOfRange(raw.into())),
        }
    }

    pub fn server(id: u8) -> Result<Self> {
        if (1..=Self::SERVERS).contains(&id) {
            Ok(Address::Server(id))
        } else {
            Err(MessageError::AddressOutOfRange(i16::from(id) - 4))
        }
    }

    pub fn client(id: u8) -> Result<Self> {
        if id <= Self::MAX_CLIENT {
            Ok(Address::Client(id))
        } else {
            Err(MessageError::AddressOutOfRange(id.into()))
        }
    }

    /// Signed wire value.
    pub fn raw(self) -> i8 {
        match self {
            Address::Broadcast => -4,
            Address::Server(n) => n as i8 - 4,
            Address::Client(n) => n as i8,
        }
    }

    /// Whether this address uses the three-bit header form.
    pub fn is_short(self) -> bool {
        !matches!(self, Address::Client(_))
    }

    pub(crate) fn field_bits(self) -> usize {
        if self.is_short() {
            3
        } else {
            8
        }
    }

    /// Header field value including the leading tag bit.
    pub(crate) fn field_value(self) -> u32 {
        match self {
            Address::Client(n) => u32::from(n),
            short => 0b100 | (short.raw() + 4) as u32,
        }
    }
}

impl TryFrom<i8> for Address {
    type Error = MessageError;

    fn try_from(raw: i8) -> Result<Self> {
        Address::from_raw(raw)
    }
}

impl From<Address> for i8 {
    fn from(addr: Address) -> i8 {
        addr.raw()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Broadcast => f.write_str("B"),
            Address::Server(n) => write!(f, "S{n}"),
            Address::Client(n) => write!(f, "{n}"),
        }
    }
}

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::address::Address;
use crate::bits::BitBuf;
use crate::chunk::Chunks;
use crate::error::{MessageError, Result};
use crate::header::Header;

/// Highest transmission priority.
pub const MAX_PRIO: u8 = 3;

/// Subcommand of a code-0 control message, taken from the low three bits of
/// the first payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    AddressAssign,
    Poll,
    Console,
    Firmware,
    BusTest,
    Reset,
    Reserved(u8),
    /// Control message without payload.
    Empty,
}

impl ControlCommand {
    pub fn from_byte(b: u8) -> Self {
        match b & 0x07 {
            0 => ControlCommand::AddressAssign,
            1 => ControlCommand::Poll,
            2 => ControlCommand::Console,
            5 => ControlCommand::Firmware,
            6 => ControlCommand::BusTest,
            7 => ControlCommand::Reset,
            other => ControlCommand::Reserved(other),
        }
    }
}

/// Message class derived from the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Control(ControlCommand),
    Directory,
    Read,
    /// Write request, or a reply to one of the above.
    Write,
    Other(u8),
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Control(ControlCommand::AddressAssign) => f.write_str("address"),
            MessageKind::Control(ControlCommand::Poll) => f.write_str("poll"),
            MessageKind::Control(ControlCommand::Console) => f.write_str("console"),
            MessageKind::Control(ControlCommand::Firmware) => f.write_str("firmware"),
            MessageKind::Control(ControlCommand::BusTest) => f.write_str("bus-test"),
            MessageKind::Control(ControlCommand::Reset) => f.write_str("reset"),
            MessageKind::Control(ControlCommand::Reserved(n)) => write!(f, "control?{n}"),
            MessageKind::Control(ControlCommand::Empty) => f.write_str("control"),
            MessageKind::Directory => f.write_str("dir"),
            MessageKind::Read => f.write_str("read"),
            MessageKind::Write => f.write_str("write"),
            MessageKind::Other(code) => write!(f, "code?{code}"),
        }
    }
}

/// An addressed bus message.
///
/// `prio` travels out of band (the framer's marker byte), so it is not part
/// of the header and does not take part in equality.
#[derive(Clone)]
pub struct BusMessage {
    header: Header,
    prio: u8,
    data: BitBuf,
}

impl BusMessage {
    /// Create an empty message; fails when `code` does not fit the header
    /// layout selected by the two address forms.
    pub fn new(src: Address, dst: Address, code: u8) -> Result<Self> {
        Ok(Self::from_header(Header::new(dst, src, code)?, BitBuf::new()))
    }

    pub fn with_data(src: Address, dst: Address, code: u8, data: &[u8]) -> Result<Self> {
        let mut msg = Self::new(src, dst, code)?;
        msg.add_data(data);
        Ok(msg)
    }

    /// Create from signed wire addresses.
    pub fn from_raw(src: i8, dst: i8, code: u8) -> Result<Self> {
        Self::new(Address::from_raw(src)?, Address::from_raw(dst)?, code)
    }

    pub(crate) fn from_header(header: Header, data: BitBuf) -> Self {
        Self {
            header,
            prio: 0,
            data,
        }
    }

    pub fn src(&self) -> Address {
        self.header.src
    }

    pub fn dst(&self) -> Address {
        self.header.dst
    }

    pub fn code(&self) -> u8 {
        self.header.code
    }

    pub fn prio(&self) -> u8 {
        self.prio
    }

    pub fn set_prio(&mut self, prio: u8) -> Result<()> {
        if prio > MAX_PRIO {
            return Err(MessageError::InvalidPriority(prio));
        }
        self.prio = prio;
        Ok(())
    }

    pub fn with_prio(mut self, prio: u8) -> Result<Self> {
        self.set_prio(prio)?;
        Ok(self)
    }

    pub fn header_fields(&self) -> &Header {
        &self.header
    }

    /// Encoded header bits: dst, src, then the code padded to a byte boundary.
    pub fn header(&self) -> BitBuf {
        self.header.encode()
    }

    /// 1 if both addresses are short, 3 if both are long, else 2.
    pub fn header_len(&self) -> usize {
        self.header.len()
    }

    /// Append payload bytes, zero-padding a partial trailing byte first.
    pub fn add_data(&mut self, data: &[u8]) {
        self.data.extend_bytes(data);
    }

    /// Append raw bits to the payload.
    pub fn push_bits(&mut self, value: u32, n: usize) {
        self.data.push_bits(value, n);
    }

    /// Payload as bytes (a partial last byte is zero-padded).
    pub fn data(&self) -> &[u8] {
        self.data.as_bytes()
    }

    pub fn data_bits(&self) -> &BitBuf {
        &self.data
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Header followed by payload.
    pub fn to_bits(&self) -> BitBuf {
        let mut bits = self.header();
        bits.extend_bits(&self.data);
        bits
    }

    /// Header and payload as bytes, as sent by a byte-wide framer.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_bits().into_bytes()
    }

    /// The first `n` bits of header + payload.
    pub fn first_bits(&self, n: usize) -> BitBuf {
        self.to_bits().prefix(n)
    }

    /// Split header + payload into `frame_bits`-wide chunks.
    pub fn chunks(&self, frame_bits: u32) -> Result<Chunks> {
        Chunks::new(self.to_bits(), frame_bits)
    }

    pub fn kind(&self) -> MessageKind {
        match self.code() {
            0 => MessageKind::Control(
                self.data
                    .as_bytes()
                    .first()
                    .map(|b| ControlCommand::from_byte(*b))
                    .unwrap_or(ControlCommand::Empty),
            ),
            1 => MessageKind::Directory,
            2 => MessageKind::Read,
            3 => MessageKind::Write,
            other => MessageKind::Other(other),
        }
    }
}

impl PartialEq for BusMessage {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.data == other.data
    }
}

impl Eq for BusMessage {}

impl Hash for BusMessage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.header.hash(state);
        self.data.hash(state);
    }
}

impl fmt::Debug for BusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusMessage")
            .field("src", &self.src())
            .field("dst", &self.dst())
            .field("code", &self.code())
            .field("prio", &self.prio)
            .field("data", &self.data)
            .finish()
    }
}

impl fmt::Display for BusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{}>{} {} code={}",
            self.src(),
            self.dst(),
            self.kind(),
            self.code()
        )?;
        if !self.data.is_empty() {
            f.write_str(" ")?;
            for b in self.data() {
                write!(f, "{b:02x}")?;
            }
        }
        Ok(())
    }
}

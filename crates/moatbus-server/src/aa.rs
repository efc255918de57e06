//! Payloads of code-0 control messages.
//!
//! Address assignment (subcommand 0):
//!
//! ```text
//! byte 0     LLLL F SSS   L = serial length - 1, F = flags byte follows,
//!                         S = subcommand
//! 1..=L+1    serial number
//! [flags]    0x01 t_continue follows, 0x02 device must be known,
//!            0x04 device is polled, 0x08 t_live and t_sleep follow
//! [timers]   minifloat bytes in the order t_continue, t_live, t_sleep
//! ```
//!
//! Poll (subcommand 1): `0x01 | 0x08` plus one minifloat timer byte.

use std::time::Duration;

use moatbus_message::minifloat;

use crate::error::{Result, ServerError};
use crate::obj::Serial;

pub const SUB_ADDRESS: u8 = 0;
pub const SUB_POLL: u8 = 1;

const SUB_MASK: u8 = 0x07;
const HAS_MORE: u8 = 0x08;

pub const FLAG_CONTINUE: u8 = 0x01;
pub const FLAG_MUST_EXIST: u8 = 0x02;
pub const FLAG_POLLED: u8 = 0x04;
pub const FLAG_TIMERS: u8 = 0x08;

/// Subcommand of a control payload.
pub fn subcommand(data: &[u8]) -> Option<u8> {
    data.first().map(|b| b & SUB_MASK)
}

/// An address-assignment request or reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AaRecord {
    pub serial: Serial,
    pub flags: u8,
    /// Minifloat delay before the server may answer.
    pub t_continue: u8,
    /// Minifloat time the device stays awake.
    pub t_live: u8,
    /// Minifloat time the device then sleeps.
    pub t_sleep: u8,
}

impl AaRecord {
    pub fn new(serial: Serial) -> Self {
        Self {
            serial,
            flags: 0,
            t_continue: 0,
            t_live: 0,
            t_sleep: 0,
        }
    }

    pub fn unpack(data: &[u8]) -> Result<Self> {
        let (&head, rest) = data.split_first().ok_or(ServerError::ShortMessage)?;
        let len = usize::from(head >> 4) + 1;
        let serial = rest.get(..len).ok_or(ServerError::ShortMessage)?;
        let mut record = Self::new(Serial::new(serial)?);
        let mut tail = rest[len..].iter().copied();
        let mut next = || tail.next().ok_or(ServerError::ShortMessage);

        if head & HAS_MORE != 0 {
            record.flags = next()?;
            if record.flags & FLAG_CONTINUE != 0 {
                record.t_continue = next()?;
            }
            if record.flags & FLAG_TIMERS != 0 {
                record.t_live = next()?;
                record.t_sleep = next()?;
            }
        }
        let extra = tail.count();
        if extra > 0 {
            return Err(ServerError::LongMessage(extra));
        }
        Ok(record)
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut flags = self.flags & !(FLAG_CONTINUE | FLAG_TIMERS);
        if self.t_continue != 0 {
            flags |= FLAG_CONTINUE;
        }
        if self.t_live != 0 || self.t_sleep != 0 {
            flags |= FLAG_TIMERS;
        }

        let len = self.serial.len() as u8 - 1;
        let mut head = (len << 4) | SUB_ADDRESS;
        if flags != 0 {
            head |= HAS_MORE;
        }
        let mut out = Vec::with_capacity(self.serial.len() + 5);
        out.push(head);
        out.extend_from_slice(self.serial.as_bytes());
        if flags != 0 {
            out.push(flags);
            if flags & FLAG_CONTINUE != 0 {
                out.push(self.t_continue);
            }
            if flags & FLAG_TIMERS != 0 {
                out.push(self.t_live);
                out.push(self.t_sleep);
            }
        }
        out
    }

    pub fn must_exist(&self) -> bool {
        self.flags & FLAG_MUST_EXIST != 0
    }

    pub fn polled(&self) -> bool {
        self.flags & FLAG_POLLED != 0
    }

    /// How long the device wants the server to wait before accepting.
    pub fn continue_delay(&self) -> Option<Duration> {
        (self.t_continue != 0).then(|| minifloat::decode_duration(self.t_continue))
    }
}

/// Poll request from a server.
pub fn poll_request(reply_timeout: Duration) -> [u8; 2] {
    [SUB_POLL | HAS_MORE, minifloat::encode_duration(reply_timeout)]
}

/// A device's answer to a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollReply {
    /// How long the device stays awake, if it said.
    pub t_live: Option<u8>,
}

impl PollReply {
    pub fn unpack(data: &[u8]) -> Result<Self> {
        let (&head, rest) = data.split_first().ok_or(ServerError::ShortMessage)?;
        let (t_live, rest) = if head & HAS_MORE != 0 {
            let (&t, rest) = rest.split_first().ok_or(ServerError::ShortMessage)?;
            (Some(t), rest)
        } else {
            (None, rest)
        };
        if !rest.is_empty() {
            return Err(ServerError::LongMessage(rest.len()));
        }
        Ok(Self { t_live })
    }

    pub fn pack(&self) -> Vec<u8> {
        match self.t_live {
            Some(t) => vec![SUB_POLL | HAS_MORE, t],
            None => vec![SUB_POLL],
        }
    }

    pub fn live(&self) -> Option<Duration> {
        self.t_live.map(minifloat::decode_duration)
    }
}

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use moatbus_message::BusMessage;
use serde::Deserialize;

use crate::crc::checksum;
use crate::error::{Result, SerialError};

/// Frame start markers, indexed by priority.
pub const PRIO_MARKERS: [u8; 4] = [0x01, 0x02, 0x81, 0x82];

/// A bare acknowledgement byte.
pub const ACK: u8 = 0x06;

/// Largest header + payload a frame can carry (15-bit length).
pub const MAX_FRAME_LEN: usize = 0x7FFF;

/// Lengths from this value up use the two-byte form.
const LONG_LEN: usize = 0x80;

/// Priority encoded by a marker byte, if it is one.
pub fn marker_prio(byte: u8) -> Option<u8> {
    PRIO_MARKERS.iter().position(|m| *m == byte).map(|p| p as u8)
}

/// Encode a message as a serial frame.
///
/// Wire format:
/// ```text
/// ┌──────────┬────────────────┬────────┬──────┬────────────┐
/// │ marker   │ length         │ header │ data │ CRC-16     │
/// │ by prio  │ 1B, or 2B with │ 1-3B   │      │ big-endian │
/// │          │ 0x80 in first  │        │      │            │
/// └──────────┴────────────────┴────────┴──────┴────────────┘
/// ```
/// The length and CRC cover header + data.
pub fn encode_frame(msg: &BusMessage, dst: &mut BytesMut) -> Result<()> {
    let body = msg.to_bytes();
    let n = body.len();
    if n > MAX_FRAME_LEN {
        return Err(SerialError::TooLong {
            size: n,
            max: MAX_FRAME_LEN,
        });
    }
    dst.reserve(n + 5);
    dst.put_u8(PRIO_MARKERS[usize::from(msg.prio())]);
    if n >= LONG_LEN {
        dst.put_u8(0x80 | (n >> 8) as u8);
        dst.put_u8(n as u8);
    } else {
        dst.put_u8(n as u8);
    }
    dst.put_slice(&body);
    dst.put_u16(checksum(&body));
    Ok(())
}

/// Timing of the serial framer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FramerConfig {
    /// Interval at which the framer's `timeout()` is driven while a frame
    /// is in progress. 10ms suits 9600 baud.
    #[serde(with = "millis")]
    pub tick: Duration,
    /// Age after which a console line without newline is flushed.
    #[serde(with = "millis")]
    pub console_flush: Duration,
    /// Consecutive idle ticks tolerated inside a frame before it is lost.
    pub max_idle_ticks: u8,
    /// Capacity of the async driver's inbound and outbound queues.
    pub queue_depth: usize,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(10),
            console_flush: Duration::from_millis(200),
            max_idle_ticks: 3,
            queue_depth: 64,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use moatbus_message::Address;

    use super::*;

    #[test]
    fn short_frame_layout() {
        let msg = BusMessage::with_data(Address::Server(1), Address::Broadcast, 2, &[0xAA])
            .unwrap()
            .with_prio(2)
            .unwrap();
        let mut buf = BytesMut::new();
        encode_frame(&msg, &mut buf).unwrap();

        let crc = checksum(&[0x96, 0xAA]);
        assert_eq!(
            buf.as_ref(),
            &[0x81, 0x02, 0x96, 0xAA, (crc >> 8) as u8, crc as u8]
        );
    }

    #[test]
    fn long_length_uses_two_bytes() {
        let payload = vec![0x55; 200];
        let msg = BusMessage::with_data(Address::Client(3), Address::Server(1), 3, &payload).unwrap();
        let mut buf = BytesMut::new();
        encode_frame(&msg, &mut buf).unwrap();

        let n = 2 + payload.len();
        assert_eq!(buf[0], PRIO_MARKERS[0]);
        assert_eq!(buf[1], 0x80 | (n >> 8) as u8);
        assert_eq!(buf[2], n as u8);
        assert_eq!(buf.len(), 1 + 2 + n + 2);
    }

    #[test]
    fn oversized_message_is_rejected() {
        let payload = vec![0; MAX_FRAME_LEN];
        let msg = BusMessage::with_data(Address::Client(3), Address::Server(1), 3, &payload).unwrap();
        let mut buf = BytesMut::new();
        let err = encode_frame(&msg, &mut buf).unwrap_err();
        assert!(matches!(err, SerialError::TooLong { .. }));
        assert!(buf.is_empty());
    }

    #[test]
    fn marker_lookup() {
        assert_eq!(marker_prio(0x01), Some(0));
        assert_eq!(marker_prio(0x82), Some(3));
        assert_eq!(marker_prio(ACK), None);
    }

    #[test]
    fn config_defaults_and_overrides() {
        let cfg: FramerConfig = serde_json::from_str(r#"{"tick": 5}"#).unwrap();
        assert_eq!(cfg.tick, Duration::from_millis(5));
        assert_eq!(cfg.console_flush, Duration::from_millis(200));
        assert_eq!(cfg.max_idle_ticks, 3);
    }
}

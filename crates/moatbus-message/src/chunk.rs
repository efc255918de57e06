use tracing::trace;

use crate::bits::BitBuf;
use crate::error::{MessageError, Result};
use crate::header::{Header, HeaderDecoder};
use crate::message::BusMessage;

/// Bits by which a flagged final chunk is narrower than a regular one.
pub const CONTINUATION_BITS: u32 = 8;

const MAX_CHUNK_BITS: u32 = 31 - CONTINUATION_BITS;

fn check_width(frame_bits: u32) -> Result<()> {
    if frame_bits == 0 || frame_bits > MAX_CHUNK_BITS {
        return Err(MessageError::ChunkWidth(frame_bits));
    }
    Ok(())
}

/// Fixed-width chunks of a message's header + payload.
///
/// A final chunk that is short by [`CONTINUATION_BITS`] or more is sent
/// `CONTINUATION_BITS` narrower with bit `frame_bits` set; a smaller
/// shortfall is zero-padded on the right.
#[derive(Debug, Clone)]
pub struct Chunks {
    bits: BitBuf,
    offset: usize,
    frame_bits: u32,
}

impl Chunks {
    pub fn new(bits: BitBuf, frame_bits: u32) -> Result<Self> {
        check_width(frame_bits)?;
        Ok(Self {
            bits,
            offset: 0,
            frame_bits,
        })
    }

    pub fn remaining_bits(&self) -> usize {
        self.bits.len().saturating_sub(self.offset)
    }
}

impl Iterator for Chunks {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let width = self.frame_bits as usize;
        let len = self.remaining_bits().min(width);
        if len == 0 {
            return None;
        }
        let mut value = self.bits.read_bits(self.offset, len);
        self.offset += width;

        let short = self.frame_bits - len as u32;
        if short >= CONTINUATION_BITS {
            value = (value << (short - CONTINUATION_BITS)) | (1 << self.frame_bits);
        } else {
            value <<= short;
        }
        Some(value)
    }
}

/// Reassembles a message from chunks or raw bits.
///
/// The header is split off as soon as enough bits have arrived to decode
/// it; after that only payload bits are buffered.
#[derive(Debug, Clone, Default)]
pub struct MessageAssembler {
    bits: BitBuf,
    decoder: HeaderDecoder,
    header: Option<Header>,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one chunk as produced by [`Chunks`].
    pub fn add_chunk(&mut self, value: u32, frame_bits: u32) -> Result<()> {
        check_width(frame_bits)?;
        let mut width = frame_bits;
        let mut value = value;
        if value & (1 << frame_bits) != 0 {
            if frame_bits <= CONTINUATION_BITS {
                return Err(MessageError::ChunkWidth(frame_bits));
            }
            width -= CONTINUATION_BITS;
            value &= (1 << width) - 1;
        }
        self.bits.push_bits(value, width as usize);
        self.gen_header()
    }

    /// Add one byte of a byte-wide stream.
    pub fn add_byte(&mut self, byte: u8) -> Result<()> {
        self.bits.push_bits(byte.into(), 8);
        self.gen_header()
    }

    /// Add bits that were written to (and read back from) the wire.
    pub fn add_written(&mut self, bits: &BitBuf) -> Result<()> {
        self.bits.extend_bits(bits);
        self.gen_header()
    }

    fn gen_header(&mut self) -> Result<()> {
        if self.header.is_some() {
            return Ok(());
        }
        if let Some(header) = self.decoder.feed(&self.bits)? {
            trace!(dst = %header.dst, src = %header.src, code = header.code, "header complete");
            self.bits.drop_front_bytes(header.len());
            self.header = Some(header);
        }
        Ok(())
    }

    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    pub fn is_header_complete(&self) -> bool {
        self.header.is_some()
    }

    /// Bits received so far that are not part of the header.
    pub fn bit_len(&self) -> usize {
        self.bits.len()
    }

    /// Finish reassembly, dropping padding left over by the last chunk.
    pub fn finish(self) -> Result<BusMessage> {
        let Some(header) = self.header else {
            return Err(MessageError::HeaderIncomplete {
                bits: self.bits.len(),
            });
        };
        let mut data = self.bits;
        data.align_down();
        Ok(BusMessage::from_header(header, data))
    }

    /// Discard everything and start over.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::address::Address;

    fn reassemble(msg: &BusMessage, frame_bits: u32) -> BusMessage {
        let mut asm = MessageAssembler::new();
        for chunk in msg.chunks(frame_bits).unwrap() {
            asm.add_chunk(chunk, frame_bits).unwrap();
        }
        asm.finish().unwrap()
    }

    #[test]
    fn short_final_chunk_sets_continuation_flag() {
        // one-byte header + one data byte = 16 bits, 11-bit chunks leave 5
        let msg = BusMessage::with_data(Address::Server(1), Address::Broadcast, 2, &[0xFF]).unwrap();
        let chunks: Vec<u32> = msg.chunks(11).unwrap().collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], 0b1001_0110_111);
        // 5 remaining bits, short by 6: zero-padded
        assert_eq!(chunks[1], 0b11111_000000);

        // 24 bits in 16-bit chunks: last one is short by 8
        let msg = BusMessage::with_data(Address::Server(1), Address::Broadcast, 2, &[0x12, 0x34])
            .unwrap();
        let chunks: Vec<u32> = msg.chunks(16).unwrap().collect();
        assert_eq!(chunks, vec![0x9612, 0x34 | (1 << 16)]);
    }

    #[test]
    fn flagged_chunk_is_narrowed_on_receive() {
        let mut asm = MessageAssembler::new();
        asm.add_chunk(0x9612, 16).unwrap();
        assert!(asm.is_header_complete());
        asm.add_chunk(0x34 | (1 << 16), 16).unwrap();
        let msg = asm.finish().unwrap();
        assert_eq!(msg.data(), &[0x12, 0x34]);
        assert_eq!(msg.code(), 2);
    }

    #[test]
    fn empty_sequence_ends_immediately() {
        let mut chunks = Chunks::new(BitBuf::new(), 8).unwrap();
        assert_eq!(chunks.next(), None);
    }

    #[test]
    fn zero_width_is_rejected() {
        assert!(matches!(
            Chunks::new(BitBuf::new(), 0),
            Err(MessageError::ChunkWidth(0))
        ));
        let mut asm = MessageAssembler::new();
        assert!(asm.add_chunk(1 << 4, 4).is_err());
    }

    #[test]
    fn finish_without_header_fails() {
        let mut asm = MessageAssembler::new();
        asm.add_byte(0x05).unwrap();
        assert!(matches!(
            asm.finish(),
            Err(MessageError::HeaderIncomplete { bits: 8 })
        ));
    }

    #[test]
    fn odd_widths_recover_after_alignment() {
        let msg = BusMessage::with_data(Address::Client(17), Address::Server(2), 9, b"hello").unwrap();
        for width in [3, 5, 7, 11, 13, 14] {
            assert_eq!(reassemble(&msg, width), msg, "width {width}");
        }
    }

    #[test]
    fn add_written_feeds_raw_bits() {
        let msg = BusMessage::with_data(Address::Client(1), Address::Client(2), 3, b"ok").unwrap();
        let mut asm = MessageAssembler::new();
        let bits = msg.to_bits();
        asm.add_written(&bits.prefix(10)).unwrap();
        assert!(!asm.is_header_complete());
        let mut rest = BitBuf::new();
        for i in 10..bits.len() {
            rest.push_bit(bits.bit(i));
        }
        asm.add_written(&rest).unwrap();
        assert_eq!(asm.finish().unwrap(), msg);
    }

    proptest! {
        #[test]
        fn chunk_round_trip(
            src in -4i8..=127,
            dst in -4i8..=127,
            code in 0u8..=3,
            data in proptest::collection::vec(any::<u8>(), 0..40),
            width in prop::sample::select(vec![4u32, 8, 16]),
        ) {
            let msg = BusMessage::with_data(
                Address::from_raw(src).unwrap(),
                Address::from_raw(dst).unwrap(),
                code,
                &data,
            ).unwrap();
            let mut asm = MessageAssembler::new();
            let mut rebuilt = BitBuf::new();
            for chunk in msg.chunks(width).unwrap() {
                asm.add_chunk(chunk, width).unwrap();
                let w = if chunk >> width != 0 { width - CONTINUATION_BITS } else { width };
                rebuilt.push_bits(chunk & ((1 << w) - 1), w as usize);
            }
            prop_assert_eq!(&rebuilt, &msg.to_bits());
            prop_assert_eq!(asm.finish().unwrap(), msg);
        }
    }
}

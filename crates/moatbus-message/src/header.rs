use crate::address::Address;
use crate::bits::BitBuf;
use crate::error::{MessageError, Result};

/// Bit geometry of one header form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLayout {
    /// Bit offset of the source field (and its tag bit).
    pub src_offset: usize,
    /// Bit offset of the code field.
    pub code_offset: usize,
    /// Width of the code field.
    pub code_bits: u8,
    /// Total header length in bytes.
    pub bytes: usize,
}

impl HeaderLayout {
    pub fn bits(&self) -> usize {
        self.bytes * 8
    }

    /// Largest code this layout can carry.
    pub fn max_code(&self) -> u8 {
        ((1u16 << self.code_bits) - 1) as u8
    }
}

/// Header layouts indexed by `(dst_long << 1) | src_long`.
///
/// A short address is a `1` tag bit plus two bits, a long one is a `0` tag
/// bit plus seven bits; the code fills the rest of the last byte.
pub const LAYOUTS: [HeaderLayout; 4] = [
    HeaderLayout {
        src_offset: 3,
        code_offset: 6,
        code_bits: 2,
        bytes: 1,
    },
    HeaderLayout {
        src_offset: 3,
        code_offset: 11,
        code_bits: 5,
        bytes: 2,
    },
    HeaderLayout {
        src_offset: 8,
        code_offset: 11,
        code_bits: 5,
        bytes: 2,
    },
    HeaderLayout {
        src_offset: 8,
        code_offset: 16,
        code_bits: 8,
        bytes: 3,
    },
];

fn layout_index(dst_long: bool, src_long: bool) -> usize {
    (usize::from(dst_long) << 1) | usize::from(src_long)
}

/// Decoded `(dst, src, code)` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    pub dst: Address,
    pub src: Address,
    pub code: u8,
}

impl Header {
    /// Build a header, checking that `code` fits the layout the addresses select.
    pub fn new(dst: Address, src: Address, code: u8) -> Result<Self> {
        let layout = Self::layout_for(dst, src);
        if code > layout.max_code() {
            return Err(MessageError::CodeOutOfRange {
                code: code.into(),
                bits: layout.code_bits,
            });
        }
        Ok(Self { dst, src, code })
    }

    pub fn layout_for(dst: Address, src: Address) -> &'static HeaderLayout {
        &LAYOUTS[layout_index(!dst.is_short(), !src.is_short())]
    }

    pub fn layout(&self) -> &'static HeaderLayout {
        Self::layout_for(self.dst, self.src)
    }

    /// Header length in bytes: 1, 2 or 3.
    pub fn len(&self) -> usize {
        self.layout().bytes
    }

    pub fn encode(&self) -> BitBuf {
        let layout = self.layout();
        let mut buf = BitBuf::new();
        buf.push_bits(self.dst.field_value(), self.dst.field_bits());
        buf.push_bits(self.src.field_value(), self.src.field_bits());
        buf.push_bits(self.code.into(), layout.code_bits.into());
        debug_assert_eq!(buf.len(), layout.bits());
        buf
    }

    fn parse(bits: &BitBuf, layout: &HeaderLayout) -> Result<Self> {
        let dst = parse_address(bits, 0)?;
        let src = parse_address(bits, layout.src_offset)?;
        let code = bits.read_bits(layout.code_offset, layout.code_bits.into()) as u8;
        Ok(Self { dst, src, code })
    }
}

fn parse_address(bits: &BitBuf, offset: usize) -> Result<Address> {
    if bits.bit(offset) {
        Address::from_raw(bits.read_bits(offset + 1, 2) as i8 - 4)
    } else {
        Address::from_raw(bits.read_bits(offset + 1, 7) as i8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Waiting for the destination tag bit.
    DstTag,
    /// Waiting for the source tag bit.
    SrcTag { dst_long: bool },
    /// Layout known, waiting for the remaining header bits.
    Fields(usize),
    Done(Header),
}

/// Incremental header decoder.
///
/// Each call to [`HeaderDecoder::feed`] looks at the bits received so far and
/// advances through the tag bits to a layout from [`LAYOUTS`], then to a
/// complete [`Header`] once that many bits are present.
#[derive(Debug, Clone)]
pub struct HeaderDecoder {
    state: DecodeState,
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::DstTag,
        }
    }

    pub fn feed(&mut self, bits: &BitBuf) -> Result<Option<Header>> {
        loop {
            match self.state {
                DecodeState::DstTag => {
                    if bits.is_empty() {
                        return Ok(None);
                    }
                    self.state = DecodeState::SrcTag {
                        dst_long: !bits.bit(0),
                    };
                }
                DecodeState::SrcTag { dst_long } => {
                    let tag_at = if dst_long { 8 } else { 3 };
                    if bits.len() <= tag_at {
                        return Ok(None);
                    }
                    self.state = DecodeState::Fields(layout_index(dst_long, !bits.bit(tag_at)));
                }
                DecodeState::Fields(index) => {
                    let layout = &LAYOUTS[index];
                    if bits.len() < layout.bits() {
                        return Ok(None);
                    }
                    let header = Header::parse(bits, layout)?;
                    self.state = DecodeState::Done(header);
                }
                DecodeState::Done(header) => return Ok(Some(header)),
            }
        }
    }

    /// Bits required before the next state change.
    pub fn bits_wanted(&self) -> usize {
        match self.state {
            DecodeState::DstTag => 1,
            DecodeState::SrcTag { dst_long: true } => 9,
            DecodeState::SrcTag { dst_long: false } => 4,
            DecodeState::Fields(index) => LAYOUTS[index].bits(),
            DecodeState::Done(header) => header.layout().bits(),
        }
    }

    pub fn reset(&mut self) {
        self.state = DecodeState::DstTag;
    }
}

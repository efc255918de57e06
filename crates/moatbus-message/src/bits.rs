use std::fmt;

/// A growable MSB-first bit string.
///
/// Bits past `len` in the last byte are always zero, so [`BitBuf::as_bytes`]
/// is the zero-padded byte form.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct BitBuf {
    bytes: Vec<u8>,
    len: usize,
}

impl BitBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            bytes: data.to_vec(),
            len: data.len() * 8,
        }
    }

    /// Number of bits.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the length is a whole number of bytes.
    pub fn is_aligned(&self) -> bool {
        self.len % 8 == 0
    }

    pub fn push_bit(&mut self, bit: bool) {
        let shift = 7 - (self.len % 8);
        if shift == 7 {
            self.bytes.push(0);
        }
        if bit {
            if let Some(last) = self.bytes.last_mut() {
                *last |= 1 << shift;
            }
        }
        self.len += 1;
    }

    /// Append the low `n` bits of `value`, most significant first.
    pub fn push_bits(&mut self, value: u32, n: usize) {
        debug_assert!(n <= 32);
        if n == 8 && self.is_aligned() {
            self.bytes.push(value as u8);
            self.len += 8;
            return;
        }
        for i in (0..n).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
    }

    /// Zero-pad to a byte boundary, then append whole bytes.
    pub fn extend_bytes(&mut self, data: &[u8]) {
        self.pad_to_byte();
        self.bytes.extend_from_slice(data);
        self.len += data.len() * 8;
    }

    pub fn extend_bits(&mut self, other: &BitBuf) {
        if self.is_aligned() {
            self.bytes.extend_from_slice(&other.bytes);
            self.len += other.len;
            return;
        }
        for i in 0..other.len {
            self.push_bit(other.bit(i));
        }
    }

    pub fn pad_to_byte(&mut self) {
        self.len = self.bytes.len() * 8;
    }

    /// Drop a trailing partial byte.
    pub fn align_down(&mut self) {
        self.truncate(self.len - self.len % 8);
    }

    pub fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }
        self.len = len;
        self.bytes.truncate(len.div_ceil(8));
        let rem = len % 8;
        if rem != 0 {
            if let Some(last) = self.bytes.last_mut() {
                *last &= 0xFFu8 << (8 - rem);
            }
        }
    }

    /// Remove whole bytes from the front.
    pub fn drop_front_bytes(&mut self, n: usize) {
        let n = n.min(self.bytes.len());
        self.bytes.drain(..n);
        self.len = self.len.saturating_sub(n * 8);
    }

    pub fn bit(&self, index: usize) -> bool {
        debug_assert!(index < self.len);
        (self.bytes[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    /// Read `n` bits starting at `start` as an unsigned integer.
    /// Bits beyond the end are not read; `n` is clamped.
    pub fn read_bits(&self, start: usize, n: usize) -> u32 {
        let end = (start + n).min(self.len);
        (start..end).fold(0u32, |acc, i| (acc << 1) | u32::from(self.bit(i)))
    }

    /// Copy of the first `n` bits.
    pub fn prefix(&self, n: usize) -> BitBuf {
        let mut out = self.clone();
        out.truncate(n);
        out
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl fmt::Debug for BitBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitBuf(")?;
        for i in 0..self.len {
            if i > 0 && i % 8 == 0 {
                f.write_str("_")?;
            }
            f.write_str(if self.bit(i) { "1" } else { "0" })?;
        }
        write!(f, ")")
    }
}

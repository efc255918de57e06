//! Incremental CRC-16 used by the serial framer.
//!
//! Reflected, table-driven, polynomial `0xAC9A`, initial value zero. A
//! receiver XORs the two transmitted check bytes into its running value
//! (high byte first); the result is zero for an intact frame.

/// Generator polynomial (reflected form).
pub const POLY: u16 = 0xAC9A;

const TABLE: [u16; 256] = build_table(POLY);

const fn build_table(poly: u16) -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut n = 0;
    while n < 256 {
        let mut crc = n as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ poly } else { crc >> 1 };
            bit += 1;
        }
        table[n] = crc;
        n += 1;
    }
    table
}

/// Running CRC-16 accumulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crc16 {
    crc: u16,
}

impl Crc16 {
    pub const fn new() -> Self {
        Self { crc: 0 }
    }

    #[inline]
    pub fn update(&mut self, byte: u8) {
        self.crc = TABLE[usize::from((self.crc as u8) ^ byte)] ^ (self.crc >> 8);
    }

    pub fn update_slice(&mut self, data: &[u8]) {
        for b in data {
            self.update(*b);
        }
    }

    pub fn finish(&self) -> u16 {
        self.crc
    }

    pub fn reset(&mut self) {
        self.crc = 0;
    }
}

/// CRC of a complete buffer.
pub fn checksum(data: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update_slice(data);
    crc.finish()
}

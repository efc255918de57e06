//! One-byte duration encoding for timer fields.
//!
//! Values up to 32 quarter-seconds (8s) are stored directly. Above that the
//! high nibble is an exponent and the low nibble the mantissa of an implied
//! `0x10 + m` quarter-second count, reaching about 35 hours at `0xFF`.

use std::time::Duration;

/// Resolution of the encoding, in seconds.
pub const RESOLUTION: f64 = 0.25;

const DENORMAL_MAX: u64 = 0x20;

/// Encode seconds. Negative and NaN inputs encode as zero; values beyond the
/// range saturate to `0xFF`.
pub fn encode(seconds: f64) -> u8 {
    if seconds.is_nan() || seconds <= 0.0 {
        return 0;
    }
    let mut f = (seconds / RESOLUTION + 0.5) as u64;
    if f <= DENORMAL_MAX {
        return f as u8;
    }
    let mut exp = 1u64;
    while f > 0x1F {
        f >>= 1;
        exp += 1;
    }
    if exp > 0x0F {
        return 0xFF;
    }
    ((exp << 4) | (f & 0x0F)) as u8
}

/// Decode to seconds.
pub fn decode(m: u8) -> f64 {
    if u64::from(m) <= DENORMAL_MAX {
        return f64::from(m) * RESOLUTION;
    }
    let exp = (m >> 4) - 1;
    let mant = 0x10 + u32::from(m & 0x0F);
    f64::from(1u32 << exp) * f64::from(mant) * RESOLUTION
}

pub fn encode_duration(d: Duration) -> u8 {
    encode(d.as_secs_f64())
}

pub fn decode_duration(m: u8) -> Duration {
    Duration::from_secs_f64(decode(m))
}

//! Decoding of the 20-bit signed measurement registers.
//!
//! VBUS and CURRENT are 24-bit registers. The value sits in bits [23:4] as a
//! 20-bit two's-complement number; the low nibble is reserved.

use crate::constants::REG24_READ_LEN;

/// Width of the measurement field
pub const SAMPLE_FIELD_BITS: u32 = 20;

const FIELD_MASK: u32 = (1 << SAMPLE_FIELD_BITS) - 1;
const SIGN_BIT: u32 = 1 << (SAMPLE_FIELD_BITS - 1);
const SIGN_EXTENSION: u32 = !FIELD_MASK;

/// Most negative decodable count
pub const SAMPLE_MIN_COUNTS: i32 = -(1 << (SAMPLE_FIELD_BITS - 1));
/// Most positive decodable count
pub const SAMPLE_MAX_COUNTS: i32 = (1 << (SAMPLE_FIELD_BITS - 1)) - 1;

/// 24-bit register payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample(u32);

impl RawSample {
    /// Build from a register read: turnaround byte first, then 3 bytes MSB first.
    pub fn from_read(buf: &[u8; REG24_READ_LEN]) -> Self {
        Self(u32::from_be_bytes([0, buf[1], buf[2], buf[3]]))
    }

    /// Encode a count the way the monitor presents it (low nibble zero).
    pub fn from_counts(counts: i32) -> Self {
        let clamped = counts.clamp(SAMPLE_MIN_COUNTS, SAMPLE_MAX_COUNTS);
        Self(((clamped as u32) & FIELD_MASK) << 4)
    }

    pub fn payload(self) -> u32 {
        self.0
    }

    /// The unsigned 20-bit field
    pub fn field(self) -> u32 {
        self.0 >> 4
    }

    /// The field sign-extended to i32
    pub fn counts(self) -> i32 {
        let field = self.field();
        if field & SIGN_BIT != 0 {
            (field | SIGN_EXTENSION) as i32
        } else {
            field as i32
        }
    }

    /// Physical value for the given LSB weight
    pub fn scaled(self, lsb: f32) -> f32 {
        self.counts() as f32 * lsb
    }

    pub fn to_bytes(self) -> [u8; 3] {
        let [_, b2, b1, b0] = self.0.to_be_bytes();
        [b2, b1, b0]
    }
}

/// Convert a physical value to the report's micro-unit fixed point.
pub fn to_micro(value: f32) -> i32 {
    let micro = (value as f64 * 1_000_000.0).round();
    micro.clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

/// Inverse of [`to_micro`]
pub fn from_micro(value: i32) -> f64 {
    value as f64 / 1_000_000.0
}

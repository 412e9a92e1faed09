//! Proof-of-work arithmetic
//!
//! Compact difficulty encoding, 256-bit targets and the per-block work value
//! that cumulative chain work is summed from.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Not, Shl, Shr, Sub};

use crate::error::{rule_error, ErrorCode, RuleError};
use crate::hash::Hash256;

/// 256-bit unsigned integer for targets and chain work
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct U256([u64; 4]); // Little-endian u64 array

impl U256 {
    pub const ZERO: U256 = U256([0; 4]);
    pub const ONE: U256 = U256([1, 0, 0, 0]);
    pub const MAX: U256 = U256([u64::MAX; 4]);

    pub fn from_u64(value: u64) -> Self {
        U256([value, 0, 0, 0])
    }

    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let mut word_bytes = [0u8; 8];
            word_bytes.copy_from_slice(&bytes[24 - i * 8..32 - i * 8]);
            *word = u64::from_be_bytes(word_bytes);
        }
        U256(words)
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for (i, word) in self.0.iter().enumerate() {
            bytes[24 - i * 8..32 - i * 8].copy_from_slice(&word.to_be_bytes());
        }
        bytes
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    /// Lowest 64 bits
    pub fn low_u64(&self) -> u64 {
        self.0[0]
    }

    /// Number of significant bits
    pub fn bits(&self) -> u32 {
        for i in (0..4).rev() {
            if self.0[i] != 0 {
                return 64 * i as u32 + (64 - self.0[i].leading_zeros());
            }
        }
        0
    }

    fn bit(&self, index: u32) -> bool {
        let word = (index / 64) as usize;
        let offset = index % 64;
        (self.0[word] >> offset) & 1 == 1
    }

    fn set_bit(&mut self, index: u32) {
        let word = (index / 64) as usize;
        self.0[word] |= 1 << (index % 64);
    }

    pub fn checked_add(self, other: U256) -> Option<U256> {
        let mut result = [0u64; 4];
        let mut carry = false;
        for (i, out) in result.iter_mut().enumerate() {
            let (sum, c1) = self.0[i].overflowing_add(other.0[i]);
            let (sum, c2) = sum.overflowing_add(carry as u64);
            *out = sum;
            carry = c1 || c2;
        }
        if carry {
            None
        } else {
            Some(U256(result))
        }
    }

    pub fn saturating_add(self, other: U256) -> U256 {
        self.checked_add(other).unwrap_or(U256::MAX)
    }

    pub fn checked_sub(self, other: U256) -> Option<U256> {
        if self < other {
            return None;
        }
        Some(self.wrapping_sub(other))
    }

    fn wrapping_sub(self, other: U256) -> U256 {
        let mut result = [0u64; 4];
        let mut borrow = false;
        for (i, out) in result.iter_mut().enumerate() {
            let (diff, b1) = self.0[i].overflowing_sub(other.0[i]);
            let (diff, b2) = diff.overflowing_sub(borrow as u64);
            *out = diff;
            borrow = b1 || b2;
        }
        U256(result)
    }

    /// Multiply by a 64-bit factor, `None` on overflow
    pub fn checked_mul_u64(self, factor: u64) -> Option<U256> {
        let mut result = [0u64; 4];
        let mut carry: u128 = 0;
        for (i, out) in result.iter_mut().enumerate() {
            let product = self.0[i] as u128 * factor as u128 + carry;
            *out = product as u64;
            carry = product >> 64;
        }
        if carry != 0 {
            None
        } else {
            Some(U256(result))
        }
    }

    /// Shift-subtract long division, `None` when dividing by zero
    pub fn checked_div_rem(self, divisor: U256) -> Option<(U256, U256)> {
        if divisor.is_zero() {
            return None;
        }
        if self < divisor {
            return Some((U256::ZERO, self));
        }

        let mut quotient = U256::ZERO;
        let mut remainder = U256::ZERO;
        for i in (0..self.bits()).rev() {
            remainder = remainder << 1;
            if self.bit(i) {
                remainder.0[0] |= 1;
            }
            if remainder >= divisor {
                remainder = remainder.wrapping_sub(divisor);
                quotient.set_bit(i);
            }
        }
        Some((quotient, remainder))
    }

    pub fn checked_div(self, divisor: U256) -> Option<U256> {
        self.checked_div_rem(divisor).map(|(q, _)| q)
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> Ordering {
        for i in (0..4).rev() {
            match self.0[i].cmp(&other.0[i]) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Add for U256 {
    type Output = U256;

    /// Saturating; chain work never wraps
    fn add(self, other: U256) -> U256 {
        self.saturating_add(other)
    }
}

impl Sub for U256 {
    type Output = U256;

    /// Saturating at zero
    fn sub(self, other: U256) -> U256 {
        self.checked_sub(other).unwrap_or(U256::ZERO)
    }
}

impl Not for U256 {
    type Output = U256;

    fn not(self) -> U256 {
        U256([!self.0[0], !self.0[1], !self.0[2], !self.0[3]])
    }
}

impl Shl<u32> for U256 {
    type Output = U256;

    fn shl(self, shift: u32) -> U256 {
        if shift >= 256 {
            return U256::ZERO;
        }
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        let mut result = [0u64; 4];
        for i in word_shift..4 {
            result[i] = self.0[i - word_shift] << bit_shift;
            if bit_shift > 0 && i > word_shift {
                result[i] |= self.0[i - word_shift - 1] >> (64 - bit_shift);
            }
        }
        U256(result)
    }
}

impl Shr<u32> for U256 {
    type Output = U256;

    fn shr(self, shift: u32) -> U256 {
        if shift >= 256 {
            return U256::ZERO;
        }
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        let mut result = [0u64; 4];
        for i in 0..(4 - word_shift) {
            result[i] = self.0[i + word_shift] >> bit_shift;
            if bit_shift > 0 && i + word_shift + 1 < 4 {
                result[i] |= self.0[i + word_shift + 1] << (64 - bit_shift);
            }
        }
        U256(result)
    }
}

impl fmt::Debug for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U256(0x{})", self)
    }
}

impl fmt::Display for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = hex::encode(self.to_be_bytes());
        let trimmed = encoded.trim_start_matches('0');
        if trimmed.is_empty() {
            f.write_str("0")
        } else {
            f.write_str(trimmed)
        }
    }
}

impl Serialize for U256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_be_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for U256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        <[u8; 32]>::deserialize(deserializer).map(U256::from_be_bytes)
    }
}

/// Decode compact difficulty bits into a 256-bit target.
///
/// Layout: the high byte is a base-256 exponent, the low 23 bits a mantissa
/// and bit 23 a sign. Negative, zero and overflowing encodings are rejected.
pub fn compact_to_target(bits: u32) -> Result<U256, RuleError> {
    let exponent = bits >> 24;
    let mantissa = bits & 0x007f_ffff;
    let negative = bits & 0x0080_0000 != 0;

    if negative && mantissa != 0 {
        return Err(rule_error(
            ErrorCode::TargetOutOfRange,
            format!("compact target {bits:#010x} is negative"),
        ));
    }

    let target = if exponent <= 3 {
        U256::from_u64((mantissa >> (8 * (3 - exponent))) as u64)
    } else {
        let shift = 8 * (exponent - 3);
        let mantissa_bits = 32 - mantissa.leading_zeros();
        if mantissa != 0 && mantissa_bits + shift > 256 {
            return Err(rule_error(
                ErrorCode::TargetOutOfRange,
                format!("compact target {bits:#010x} overflows 256 bits"),
            ));
        }
        U256::from_u64(mantissa as u64) << shift
    };

    if target.is_zero() {
        return Err(rule_error(
            ErrorCode::TargetOutOfRange,
            format!("compact target {bits:#010x} is zero"),
        ));
    }
    Ok(target)
}

/// Encode a target into compact form, truncating low-order bytes
pub fn target_to_compact(target: U256) -> u32 {
    let mut size = (target.bits() + 7) / 8;
    let mut mantissa = if size <= 3 {
        (target.low_u64() << (8 * (3 - size))) as u32
    } else {
        (target >> (8 * (size - 3))).low_u64() as u32
    };

    // The sign bit must stay clear; move one byte into the exponent instead.
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        size += 1;
    }

    (size << 24) | (mantissa & 0x007f_ffff)
}

/// Work represented by a block at `bits`: 2^256 / (target + 1)
pub fn block_work(bits: u32) -> Result<U256, RuleError> {
    let target = compact_to_target(bits)?;
    Ok(work_for_target(target))
}

/// 2^256 / (target + 1), computed as (!target / (target + 1)) + 1 so the
/// intermediate stays within 256 bits
pub fn work_for_target(target: U256) -> U256 {
    match target.checked_add(U256::ONE) {
        Some(denominator) => {
            let quotient = (!target).checked_div(denominator).unwrap_or(U256::ZERO);
            quotient.saturating_add(U256::ONE)
        }
        None => U256::ONE,
    }
}

/// Whether a block hash, read as a big-endian integer, is within `target`
pub fn hash_meets_target(hash: &Hash256, target: &U256) -> bool {
    U256::from_be_bytes(*hash) <= *target
}

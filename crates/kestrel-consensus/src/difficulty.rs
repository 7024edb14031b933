// Consensus-critical. Changes require a network upgrade + tests.
//! Difficulty target utilities.
//!
//! Headers carry a 256-bit target in "compact" form:
//! `bits = (exponent << 24) | sign | mantissa`
//!
//! - exponent = `bits >> 24`, the length of the target in base-256 digits
//! - sign     = `bits & 0x0080_0000`
//! - mantissa = `bits & 0x007f_ffff`
//!
//! target = mantissa * 256^(exponent - 3), negated when the sign bit is set.
//!
//! [`compact_to_target`] and [`target_to_compact`] are total and reproduce
//! the wire format exactly, signed values included. Consensus code uses
//! [`bits_to_target`], which additionally rejects negative and zero targets.

use crate::error::ConsensusError;
use kestrel_core::Hash32;
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{Signed, ToPrimitive, Zero};

const SIGN_BIT: u32 = 0x0080_0000;
const MANTISSA_MASK: u32 = 0x007f_ffff;

/// Decode compact `bits` into a signed target.
pub fn compact_to_target(bits: u32) -> BigInt {
    let mantissa = bits & MANTISSA_MASK;
    let negative = bits & SIGN_BIT != 0;
    let exponent = bits >> 24;

    let magnitude = if exponent <= 3 {
        BigUint::from(mantissa >> (8 * (3 - exponent)))
    } else {
        BigUint::from(mantissa) << (8 * (exponent - 3)) as usize
    };

    let sign = if magnitude.is_zero() {
        Sign::NoSign
    } else if negative {
        Sign::Minus
    } else {
        Sign::Plus
    };
    BigInt::from_biguint(sign, magnitude)
}

/// Encode a signed target into compact `bits`.
///
/// Only the three most significant bytes of the magnitude survive, so this
/// is lossy for targets with more precision than the wire format carries.
/// A mantissa whose top bit is set is shifted down one byte (and the
/// exponent bumped) so it is not read back as the sign bit.
pub fn target_to_compact(target: &BigInt) -> u32 {
    if target.is_zero() {
        return 0;
    }

    let magnitude = target.magnitude();
    let mut exponent = byte_len(magnitude);

    let mut mantissa = if exponent <= 3 {
        low_u32(magnitude) << (8 * (3 - exponent))
    } else {
        low_u32(&(magnitude >> (8 * (exponent - 3)) as usize))
    };

    if mantissa & SIGN_BIT != 0 {
        mantissa >>= 8;
        exponent += 1;
    }

    // The exponent byte wraps for magnitudes longer than 255 bytes, matching
    // the 8-bit wire field.
    let mut compact = ((exponent & 0xff) << 24) | mantissa;
    if target.is_negative() {
        compact |= SIGN_BIT;
    }
    compact
}

/// Decode compact `bits` to a target usable for consensus.
///
/// Rejects encodings that are negative or represent zero.
pub fn bits_to_target(bits: u32) -> Result<BigUint, ConsensusError> {
    let target = compact_to_target(bits);
    if target.is_negative() {
        return Err(ConsensusError::NegativeTarget(bits));
    }
    if target.is_zero() {
        return Err(ConsensusError::ZeroTarget(bits));
    }
    Ok(target.magnitude().clone())
}

/// Encode a non-negative target into compact `bits`.
pub fn target_to_bits(target: &BigUint) -> u32 {
    target_to_compact(&BigInt::from(target.clone()))
}

/// Interpret a big-endian 32-byte hash as an unsigned integer.
pub fn hash_to_uint(hash: &Hash32) -> BigUint {
    BigUint::from_bytes_be(hash.as_bytes())
}

/// Returns `true` if `hash <= target`.
pub fn hash_meets_target(hash: &Hash32, target: &BigUint) -> bool {
    hash_to_uint(hash) <= *target
}

fn byte_len(n: &BigUint) -> u32 {
    // bits() is at most 8 * u32::MAX for any value we can hold in memory.
    n.bits().div_ceil(8).min(u64::from(u32::MAX)) as u32
}

fn low_u32(n: &BigUint) -> u32 {
    n.iter_u32_digits().next().unwrap_or(0)
}

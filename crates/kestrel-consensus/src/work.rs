// Consensus-critical. Changes require a network upgrade + tests.
//! Proof-of-work accounting for best-chain selection.
//!
//! A block's work is the expected number of hashes needed to meet its
//! target. Chains are compared by the sum of that work from genesis, never by
//! height.

use crate::difficulty::bits_to_target;
use crate::error::ConsensusError;
use kestrel_core::Hash32;
use num_bigint::BigUint;
use num_traits::One;

/// Expected hashes for one block at `bits`: `floor(2^256 / (target + 1))`.
///
/// At least 1 for every valid target, so cumulative work strictly increases
/// along every branch.
pub fn work_from_bits(bits: u32) -> Result<BigUint, ConsensusError> {
    let target = bits_to_target(bits)?;
    Ok((BigUint::one() << 256u32) / (target + 1u32))
}

/// Cumulative work of a child block at `bits` on top of `parent_work`.
/// Returns the child's own work alongside the total.
pub fn chain_work(parent_work: &BigUint, bits: u32) -> Result<(BigUint, BigUint), ConsensusError> {
    let own = work_from_bits(bits)?;
    let total = parent_work + &own;
    Ok((own, total))
}

/// Big-endian bytes, the persisted form of a work total.
pub fn work_to_bytes(work: &BigUint) -> Vec<u8> {
    work.to_bytes_be()
}

/// Inverse of [`work_to_bytes`]. The empty slice reads as zero.
pub fn work_from_bytes(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

/// Deterministic tip order: more work wins, then the lower hash.
///
/// Used only to recover a tip when none was persisted. Live switching
/// requires strictly more work, so the first-seen tip keeps a tie.
pub fn tip_is_better(a_work: &BigUint, a_hash: &Hash32, b_work: &BigUint, b_hash: &Hash32) -> bool {
    match a_work.cmp(b_work) {
        std::cmp::Ordering::Equal => a_hash.as_bytes() < b_hash.as_bytes(),
        ord => ord.is_gt(),
    }
}

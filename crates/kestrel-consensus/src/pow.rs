// Consensus-critical. Changes require a network upgrade + tests.
//! Proof-of-work hashing.
//!
//! Proof of work is the canonical header hash computed by `kestrel-core`
//! (BLAKE3 over a domain-separated Borsh-encoded `BlockHeader`).
//!
//! The PoW condition is:
//!     header_hash_as_u256 <= target(bits) <= target(pow_limit_bits)

use crate::difficulty::{bits_to_target, hash_meets_target};
use crate::error::ConsensusError;
use kestrel_core::{block_header_hash, BlockHeader, Hash32};

/// Compute the canonical PoW hash for a header (32 bytes, big-endian).
pub fn pow_hash(header: &BlockHeader) -> Result<Hash32, ConsensusError> {
    block_header_hash(header).map_err(|_| ConsensusError::InvalidHeader("hashing failed"))
}

/// Validate the declared target and, when `check_hash` is set, the hash
/// against it. Returns the header hash.
///
/// The target range is always enforced; only the hash comparison can be
/// skipped.
pub fn check_proof_of_work(
    header: &BlockHeader,
    pow_limit_bits: u32,
    check_hash: bool,
) -> Result<Hash32, ConsensusError> {
    let target = bits_to_target(header.bits)?;
    let limit = bits_to_target(pow_limit_bits)?;
    if target > limit {
        return Err(ConsensusError::TargetAboveLimit {
            bits: header.bits,
            limit: pow_limit_bits,
        });
    }

    let hash = pow_hash(header)?;
    if check_hash && !hash_meets_target(&hash, &target) {
        return Err(ConsensusError::HighHash(hash));
    }
    Ok(hash)
}

// Consensus-critical. Changes require a network upgrade + tests.
//! Canonical serialization helpers.
//!
//! Rule: all consensus-critical objects are encoded with Borsh.
//! Do not use JSON or non-canonical formats for hashing or identity.

use crate::constants::*;
use crate::types::{Block, BlockHeader, CoreError, Hash32, Transaction};
use borsh::to_vec;

/// Encode a value with canonical Borsh encoding.
pub fn to_bytes<T: borsh::BorshSerialize>(v: &T) -> Result<Vec<u8>, CoreError> {
    to_vec(v).map_err(|_| CoreError::InvalidValue("borsh serialization failed"))
}

/// Decode a value from canonical Borsh bytes.
pub fn from_bytes<T: borsh::BorshDeserialize>(bytes: &[u8]) -> Result<T, CoreError> {
    T::try_from_slice(bytes).map_err(|_| CoreError::InvalidValue("borsh deserialization failed"))
}

/// Hash bytes with blake3 under a domain separator.
pub fn hash32(domain_sep: &[u8], bytes: &[u8]) -> Hash32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain_sep);
    hasher.update(bytes);
    let out = hasher.finalize();
    let mut arr = [0u8; HASH32_LEN];
    arr.copy_from_slice(out.as_bytes());
    Hash32(arr)
}

/// Canonical transaction id = BLAKE3(DS_TX || borsh(tx)).
pub fn txid(tx: &Transaction) -> Result<Hash32, CoreError> {
    let bytes = to_bytes(tx)?;
    if bytes.len() > MAX_TX_BYTES {
        return Err(CoreError::InvalidValue("tx exceeds MAX_TX_BYTES"));
    }
    Ok(hash32(DS_TX, &bytes))
}

/// Canonical block header hash = BLAKE3(DS_BLOCK_HEADER || borsh(header)).
///
/// This is the block's identity and also the value compared against the
/// proof-of-work target.
pub fn block_header_hash(h: &BlockHeader) -> Result<Hash32, CoreError> {
    let bytes = to_bytes(h)?;
    Ok(hash32(DS_BLOCK_HEADER, &bytes))
}

/// Hash of a full block (its header hash).
pub fn block_hash(block: &Block) -> Result<Hash32, CoreError> {
    block_header_hash(&block.header)
}

// Consensus-critical. Changes require a network upgrade + tests.
//! Canonical protocol types.
//!
//! This module defines all consensus-visible data structures and primitive
//! value types used across the protocol.

use crate::constants::*;
use crate::serialization::to_bytes;
use borsh::{BorshDeserialize, BorshSerialize};
use core::fmt;
use core::str::FromStr;
use hashbrown::HashSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Errors related to parsing, validation, or construction of core protocol types.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Hex string had an unexpected byte length.
    #[error("invalid hex length: expected {expected} bytes, got {got} bytes")]
    InvalidHexLength {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes provided.
        got: usize,
    },

    /// Hex decoding failed.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Arithmetic overflow or underflow occurred.
    #[error("amount overflow or underflow")]
    AmountOverflow,

    /// A value violated protocol constraints.
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
}

/// Fixed-size 32-byte hash used throughout the protocol.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize,
)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Hash32(pub [u8; HASH32_LEN]);

impl Hash32 {
    /// Returns an all-zero hash.
    pub const fn zero() -> Self {
        Self([0u8; HASH32_LEN])
    }

    /// Returns the underlying byte array.
    pub const fn as_bytes(&self) -> &[u8; HASH32_LEN] {
        &self.0
    }

    /// True for the all-zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH32_LEN]
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", hex::encode(self.0))
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl From<[u8; HASH32_LEN]> for Hash32 {
    fn from(value: [u8; HASH32_LEN]) -> Self {
        Self(value)
    }
}

impl From<Hash32> for [u8; HASH32_LEN] {
    fn from(value: Hash32) -> Self {
        value.0
    }
}

impl FromStr for Hash32 {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        if bytes.len() != HASH32_LEN {
            return Err(CoreError::InvalidHexLength {
                expected: HASH32_LEN,
                got: bytes.len(),
            });
        }
        let mut arr = [0u8; HASH32_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

/// Block hash type.
pub type BlockHash = Hash32;

/// Transaction identifier type.
pub type TxId = Hash32;

/// Amount expressed in the smallest unit ("atoms").
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Amount(pub u64);

impl Amount {
    /// Returns a zero amount.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Constructs an amount from atoms.
    pub const fn from_atoms(atoms: u64) -> Self {
        Self(atoms)
    }

    /// Returns the underlying atom value.
    pub const fn atoms(self) -> u64 {
        self.0
    }

    /// Checked addition, bounded by [`MAX_MONEY_ATOMS`].
    pub fn checked_add(self, other: Amount) -> Result<Self, CoreError> {
        self.0
            .checked_add(other.0)
            .filter(|sum| *sum <= MAX_MONEY_ATOMS)
            .map(Self)
            .ok_or(CoreError::AmountOverflow)
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({} atoms)", self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} atoms", self.0)
    }
}

/// Reference to an output of an earlier transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OutPoint {
    /// Transaction holding the output.
    pub txid: TxId,
    /// Output position within that transaction.
    pub index: u32,
}

impl OutPoint {
    /// The outpoint spent by a coinbase input.
    pub const fn null() -> Self {
        Self {
            txid: Hash32::zero(),
            index: u32::MAX,
        }
    }

    /// True if this is the coinbase outpoint.
    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.txid.is_zero()
    }
}

/// Transaction input. The unlock payload is opaque to consensus here and is
/// interpreted by the transaction-validity oracle.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TxIn {
    /// Output being spent.
    pub prev_out: OutPoint,
    /// Unlocking data (signature script, witness, or coinbase payload).
    pub unlock: Vec<u8>,
    /// Input sequence number.
    pub sequence: u32,
}

/// Transaction output.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TxOut {
    /// Value carried by the output.
    pub value: Amount,
    /// Locking condition, opaque at this layer.
    pub lock: Vec<u8>,
}

/// A transaction.
///
/// A coinbase has exactly one input which spends [`OutPoint::null`].
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Transaction {
    /// Protocol version for this transaction.
    pub version: u16,
    /// Inputs.
    pub inputs: Vec<TxIn>,
    /// Outputs.
    pub outputs: Vec<TxOut>,
    /// Earliest height or time at which the transaction may be mined.
    pub lock_time: u64,
}

impl Transaction {
    /// Whether this is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prev_out.is_null()
    }

    /// Performs structural validation that needs no chain context.
    pub fn validate_sanity(&self) -> Result<(), CoreError> {
        if self.version != PROTOCOL_VERSION {
            return Err(CoreError::InvalidValue("unsupported transaction version"));
        }
        if self.inputs.is_empty() {
            return Err(CoreError::InvalidValue("transaction has no inputs"));
        }
        if self.outputs.is_empty() {
            return Err(CoreError::InvalidValue("transaction has no outputs"));
        }
        if self.inputs.len() > MAX_INPUTS_PER_TX {
            return Err(CoreError::InvalidValue("too many inputs"));
        }
        if self.outputs.len() > MAX_OUTPUTS_PER_TX {
            return Err(CoreError::InvalidValue("too many outputs"));
        }
        if to_bytes(self)?.len() > MAX_TX_BYTES {
            return Err(CoreError::InvalidValue("tx exceeds MAX_TX_BYTES"));
        }

        let mut total = Amount::zero();
        for out in &self.outputs {
            total = total.checked_add(out.value)?;
        }

        if self.is_coinbase() {
            let len = self.inputs[0].unlock.len();
            if !(MIN_COINBASE_UNLOCK_LEN..=MAX_COINBASE_UNLOCK_LEN).contains(&len) {
                return Err(CoreError::InvalidValue("coinbase unlock length out of range"));
            }
            return Ok(());
        }

        let mut seen = HashSet::with_capacity(self.inputs.len());
        for input in &self.inputs {
            if input.prev_out.is_null() {
                return Err(CoreError::InvalidValue("non-coinbase input spends null outpoint"));
            }
            if !seen.insert(input.prev_out) {
                return Err(CoreError::InvalidValue("duplicate input"));
            }
        }
        Ok(())
    }
}

/// Block header containing consensus-critical metadata.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BlockHeader {
    /// Protocol version.
    pub version: u16,
    /// Hash of the previous block (zero for genesis).
    pub prev: BlockHash,
    /// Merkle root of transaction identifiers.
    pub merkle_root: Hash32,
    /// Block timestamp (Unix seconds).
    pub timestamp: u64,
    /// Compact difficulty target.
    pub bits: u32,
    /// Proof-of-work nonce.
    pub nonce: u64,
}

/// Full block (header + transactions).
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Block {
    /// Block header.
    pub header: BlockHeader,
    /// Transactions included in this block, coinbase first.
    pub txs: Vec<Transaction>,
}

impl Block {
    /// Size of the canonical encoding in bytes.
    pub fn serialized_size(&self) -> Result<usize, CoreError> {
        Ok(to_bytes(self)?.len())
    }
}

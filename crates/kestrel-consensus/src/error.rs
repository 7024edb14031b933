//! Consensus error types.

use kestrel_core::Hash32;
use thiserror::Error;

/// A broken consensus rule. Every variant is terminal for the offending block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    /// Compact bits have the sign bit set.
    #[error("compact bits {0:#010x} encode a negative target")]
    NegativeTarget(u32),

    /// Compact bits decode to zero.
    #[error("compact bits {0:#010x} encode a zero target")]
    ZeroTarget(u32),

    /// Target is easier than the network's proof-of-work limit.
    #[error("target bits {bits:#010x} exceed the proof-of-work limit {limit:#010x}")]
    TargetAboveLimit {
        /// Declared bits.
        bits: u32,
        /// Network limit.
        limit: u32,
    },

    /// Proof-of-work hash did not meet the declared target.
    #[error("block hash {0} is higher than its target")]
    HighHash(Hash32),

    /// Declared bits differ from the retarget rule's result.
    #[error("unexpected difficulty bits {got:#010x}, expected {expected:#010x}")]
    UnexpectedDifficulty {
        /// Bits required by the retarget rule.
        expected: u32,
        /// Bits found in the header.
        got: u32,
    },

    /// Timestamp is not after the median time of recent ancestors.
    #[error("block timestamp {timestamp} is not after median time past {median}")]
    TimeTooOld {
        /// Header timestamp.
        timestamp: u64,
        /// Median time past of the parent.
        median: u64,
    },

    /// Timestamp is too far ahead of adjusted network time.
    #[error("block timestamp {timestamp} is too far in the future (max {max})")]
    TimeTooNew {
        /// Header timestamp.
        timestamp: u64,
        /// Latest acceptable timestamp.
        max: u64,
    },

    /// Header merkle root does not commit to the transactions.
    #[error("merkle root mismatch: header {header}, computed {computed}")]
    BadMerkleRoot {
        /// Root in the header.
        header: Hash32,
        /// Root computed from the transactions.
        computed: Hash32,
    },

    /// Block has no transactions.
    #[error("block contains no transactions")]
    NoTransactions,

    /// Block carries more transactions than allowed.
    #[error("block has {count} transactions (max {max})")]
    TooManyTransactions {
        /// Transactions in the block.
        count: usize,
        /// Limit.
        max: usize,
    },

    /// Serialized block exceeds the size limit.
    #[error("block is {size} bytes (max {max})")]
    BlockTooBig {
        /// Serialized size.
        size: usize,
        /// Limit.
        max: usize,
    },

    /// First transaction is not a coinbase.
    #[error("first transaction is not a coinbase")]
    FirstTxNotCoinbase,

    /// A coinbase appears after the first position.
    #[error("block contains more than one coinbase")]
    MultipleCoinbases,

    /// The same transaction id appears twice.
    #[error("duplicate transaction {0}")]
    DuplicateTx(Hash32),

    /// The transaction-validity oracle rejected a transaction.
    #[error("transaction {txid} rejected: {reason}")]
    BadTransaction {
        /// Offending transaction.
        txid: Hash32,
        /// Oracle's reason.
        reason: String,
    },

    /// The block could not be connected to the active chain.
    #[error("block failed to connect at height {height}: {reason}")]
    ConnectRejected {
        /// Height the block was being connected at.
        height: u64,
        /// Oracle's reason.
        reason: String,
    },

    /// Unsupported header version.
    #[error("unsupported block version {0}")]
    BadVersion(u16),

    /// The parent (or an earlier ancestor) was already rejected.
    #[error("previous block {0} is known to be invalid")]
    InvalidAncestor(Hash32),

    /// An ancestor needed by the retarget rule is not available.
    #[error("missing ancestor at height {0} for difficulty retarget")]
    MissingAncestor(u64),

    /// Header fields violated basic consensus constraints.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),
}

// Consensus-critical. Changes require a network upgrade + tests.
//! Block validation rules.
//!
//! [`check_block_sanity`] covers everything that can be decided from the
//! block alone. [`check_header_context`] covers the rules that need the
//! parent: required difficulty and timestamp bounds. Neither touches chain
//! state; callers gather the context.

use hashbrown::HashSet;

use crate::error::ConsensusError;
use crate::params::ChainParams;
use crate::pow::check_proof_of_work;
use kestrel_core::{merkle_root, txid, Block, BlockHeader, Hash32, Transaction, PROTOCOL_VERSION};

/// Opaque transaction-validity oracle.
///
/// Script interpretation and spend checks live behind this seam. The
/// context-free hook runs for every block; the connect hook runs when a block
/// is attached to the active chain.
pub trait TransactionValidator: Send + Sync {
    /// Context-free validity of one transaction.
    fn check_transaction(&self, tx: &Transaction) -> Result<(), String>;

    /// Validity of a block's transactions when connected at `height`.
    fn check_connect(&self, _block: &Block, _height: u64) -> Result<(), String> {
        Ok(())
    }
}

/// Oracle that applies only the structural transaction rules.
#[derive(Clone, Copy, Debug, Default)]
pub struct StructuralValidator;

impl TransactionValidator for StructuralValidator {
    fn check_transaction(&self, tx: &Transaction) -> Result<(), String> {
        tx.validate_sanity().map_err(|e| e.to_string())
    }
}

/// Validate a block's consensus rules that do not require chain state.
///
/// Order: header sanity, proof of work, transaction count, size, coinbase
/// placement, per-transaction oracle, merkle root, duplicate transactions.
/// Returns the block hash.
pub fn check_block_sanity(
    block: &Block,
    params: &ChainParams,
    oracle: &dyn TransactionValidator,
    check_pow: bool,
) -> Result<Hash32, ConsensusError> {
    check_header_sanity(&block.header)?;
    let hash = check_proof_of_work(&block.header, params.pow_limit_bits, check_pow)?;

    if block.txs.is_empty() {
        return Err(ConsensusError::NoTransactions);
    }
    if block.txs.len() > params.max_block_txs {
        return Err(ConsensusError::TooManyTransactions {
            count: block.txs.len(),
            max: params.max_block_txs,
        });
    }

    let size = block
        .serialized_size()
        .map_err(|_| ConsensusError::InvalidHeader("block serialization failed"))?;
    if size > params.max_block_size {
        return Err(ConsensusError::BlockTooBig {
            size,
            max: params.max_block_size,
        });
    }

    if !block.txs[0].is_coinbase() {
        return Err(ConsensusError::FirstTxNotCoinbase);
    }
    if block.txs[1..].iter().any(Transaction::is_coinbase) {
        return Err(ConsensusError::MultipleCoinbases);
    }

    let mut ids = Vec::with_capacity(block.txs.len());
    for tx in &block.txs {
        let id = txid(tx).map_err(|e| ConsensusError::BadTransaction {
            txid: Hash32::zero(),
            reason: e.to_string(),
        })?;
        oracle
            .check_transaction(tx)
            .map_err(|reason| ConsensusError::BadTransaction { txid: id, reason })?;
        ids.push(id);
    }

    let computed = merkle_root(&ids);
    if computed != block.header.merkle_root {
        return Err(ConsensusError::BadMerkleRoot {
            header: block.header.merkle_root,
            computed,
        });
    }

    let mut seen = HashSet::with_capacity(ids.len());
    for id in &ids {
        if !seen.insert(*id) {
            return Err(ConsensusError::DuplicateTx(*id));
        }
    }

    Ok(hash)
}

/// Header fields that can be checked in isolation.
pub fn check_header_sanity(header: &BlockHeader) -> Result<(), ConsensusError> {
    if header.version != PROTOCOL_VERSION {
        return Err(ConsensusError::BadVersion(header.version));
    }
    if header.timestamp == 0 {
        return Err(ConsensusError::InvalidHeader("timestamp must be non-zero"));
    }
    Ok(())
}

/// Facts about a block's position that contextual header checks need.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderContext {
    /// Bits the retarget rule requires for this block.
    pub expected_bits: u32,
    /// Median time past of the parent.
    pub median_time_past: u64,
    /// Adjusted network time (Unix seconds).
    pub adjusted_time: i64,
}

/// Validate a header against its parent-derived context.
pub fn check_header_context(
    header: &BlockHeader,
    ctx: &HeaderContext,
    params: &ChainParams,
) -> Result<(), ConsensusError> {
    if header.bits != ctx.expected_bits {
        return Err(ConsensusError::UnexpectedDifficulty {
            expected: ctx.expected_bits,
            got: header.bits,
        });
    }

    if header.timestamp <= ctx.median_time_past {
        return Err(ConsensusError::TimeTooOld {
            timestamp: header.timestamp,
            median: ctx.median_time_past,
        });
    }

    let now = ctx.adjusted_time.max(0) as u64;
    let max = now.saturating_add(params.max_future_drift_secs);
    if header.timestamp > max {
        return Err(ConsensusError::TimeTooNew {
            timestamp: header.timestamp,
            max,
        });
    }
    Ok(())
}

/// Check if a candidate timestamp is within an absolute drift window.
pub fn is_timestamp_within_drift(candidate: u64, reference: u64, max_drift_secs: u64) -> bool {
    candidate.abs_diff(reference) <= max_drift_secs
}

/// Median of the given timestamps (newest last), over at most `window` of
/// the most recent ones.
pub fn median_time_past(timestamps: &[u64], window: usize) -> Option<u64> {
    if timestamps.is_empty() || window == 0 {
        return None;
    }
    let start = timestamps.len().saturating_sub(window);
    let mut buf = timestamps[start..].to_vec();
    buf.sort_unstable();
    Some(buf[buf.len() / 2])
}

//! Transactional persistence for blocks, index records, and the best tip.
//!
//! All writes go through a [`StoreTx`]. A transaction is either committed
//! whole or not at all; dropping one without calling
//! [`StoreTx::commit`] discards its writes.

use borsh::{BorshDeserialize, BorshSerialize};
use kestrel_core::{BlockHeader, Hash32};
use thiserror::Error;

use crate::index::BlockStatus;

pub mod memory;
pub mod sled_store;

/// Durability layer failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage engine reported an error.
    #[error("backend: {0}")]
    Backend(String),
    /// A stored value could not be encoded or decoded.
    #[error("codec: {0}")]
    Codec(String),
    /// A stored record is structurally wrong.
    #[error("corrupt record: {0}")]
    Corrupt(&'static str),
    /// Failure requested by a test harness.
    #[error("injected failure: {0}")]
    Injected(&'static str),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

/// Persisted form of a [`crate::BlockNode`].
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NodeRecord {
    /// Block header.
    pub header: BlockHeader,
    /// Height on its own branch.
    pub height: u64,
    /// Cumulative work, big-endian bytes.
    pub cumulative_work: Vec<u8>,
    /// Validation outcome.
    pub status: BlockStatus,
    /// Whether the full block is stored alongside.
    pub have_data: bool,
}

/// The persisted active tip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BestState {
    /// Tip hash.
    pub hash: Hash32,
    /// Tip height.
    pub height: u64,
}

/// One unit of atomic work against a [`ChainStore`].
///
/// Reads observe the transaction's own uncommitted writes.
pub trait StoreTx {
    /// Stage a full block.
    fn put_block(&mut self, hash: &Hash32, block: &kestrel_core::Block) -> Result<(), StoreError>;
    /// Read a full block.
    fn get_block(&self, hash: &Hash32) -> Result<Option<kestrel_core::Block>, StoreError>;
    /// Stage an index record.
    fn put_node(&mut self, hash: &Hash32, record: &NodeRecord) -> Result<(), StoreError>;
    /// Read an index record.
    fn get_node(&self, hash: &Hash32) -> Result<Option<NodeRecord>, StoreError>;
    /// Stage the best-tip record.
    fn put_best(&mut self, best: &BestState) -> Result<(), StoreError>;
    /// Read the best-tip record.
    fn get_best(&self) -> Result<Option<BestState>, StoreError>;
    /// Apply every staged write atomically.
    fn commit(self) -> Result<(), StoreError>;
    /// Discard every staged write.
    fn rollback(self);
}

/// A store that hands out transactions and can enumerate index records.
pub trait ChainStore: Send + Sync {
    /// Transaction type.
    type Tx: StoreTx;

    /// Start a transaction.
    fn begin_tx(&self) -> Result<Self::Tx, StoreError>;

    /// Every persisted index record, in no particular order.
    fn load_nodes(&self) -> Result<Vec<(Hash32, NodeRecord)>, StoreError>;
}

pub(crate) fn hash_from_key(key: &[u8]) -> Result<Hash32, StoreError> {
    let bytes: [u8; 32] = key
        .try_into()
        .map_err(|_| StoreError::Corrupt("index key is not 32 bytes"))?;
    Ok(Hash32(bytes))
}

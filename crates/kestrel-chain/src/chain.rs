//! The chain engine: configuration, startup, and read-only queries.

use std::sync::Arc;
use std::time::Duration;

use kestrel_consensus::{next_required_bits, tip_is_better, ChainParams, StructuralValidator, TransactionValidator};
use kestrel_core::{Block, BlockHeader, Hash32};
use num_bigint::BigUint;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::ChainError;
use crate::index::{BlockNode, BlockStatus, ChainIndex};
use crate::median_time::{MedianTime, MedianTimeSource};
use crate::notify::{ChainNotification, Notifier};
use crate::orphan::{OrphanPool, DEFAULT_MAX_ORPHANS, DEFAULT_ORPHAN_TTL};
use crate::store::{BestState, ChainStore, StoreTx};
use crate::view::ChainView;

/// Everything needed to open a [`BlockChain`].
pub struct ChainConfig<S> {
    /// Durable storage.
    pub store: S,
    /// Network parameters.
    pub params: Arc<ChainParams>,
    /// Adjusted-time source for the future-timestamp rule.
    pub time_source: Arc<dyn MedianTimeSource>,
    /// Transaction rules applied to every block.
    pub tx_validator: Arc<dyn TransactionValidator>,
    /// Orphan pool capacity.
    pub max_orphans: usize,
    /// Orphan lifetime.
    pub orphan_ttl: Duration,
}

impl<S: ChainStore> ChainConfig<S> {
    /// Defaults: system-clock median time, structural transaction checks,
    /// 100 orphans for one hour.
    pub fn new(store: S, params: ChainParams) -> Self {
        Self {
            store,
            params: Arc::new(params),
            time_source: Arc::new(MedianTime::new()),
            tx_validator: Arc::new(StructuralValidator),
            max_orphans: DEFAULT_MAX_ORPHANS,
            orphan_ttl: DEFAULT_ORPHAN_TTL,
        }
    }

    /// Replace the time source.
    pub fn with_time_source(mut self, source: Arc<dyn MedianTimeSource>) -> Self {
        self.time_source = source;
        self
    }

    /// Replace the transaction validator.
    pub fn with_tx_validator(mut self, validator: Arc<dyn TransactionValidator>) -> Self {
        self.tx_validator = validator;
        self
    }

    /// Change orphan pool limits.
    pub fn with_orphan_limits(mut self, max_orphans: usize, ttl: Duration) -> Self {
        self.max_orphans = max_orphans;
        self.orphan_ttl = ttl;
        self
    }
}

/// Snapshot of the active tip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BestSnapshot {
    /// Tip hash.
    pub hash: Hash32,
    /// Tip height.
    pub height: u64,
    /// Tip bits.
    pub bits: u32,
    /// Tip timestamp.
    pub timestamp: u64,
    /// Cumulative work of the active chain.
    pub cumulative_work: BigUint,
    /// Median time past of the tip.
    pub median_time: u64,
}

pub(crate) struct ChainState {
    pub(crate) index: ChainIndex,
    pub(crate) view: ChainView,
}

impl ChainState {
    pub(crate) fn tip(&self) -> Result<&BlockNode, ChainError> {
        self.index
            .lookup(&self.view.tip())
            .ok_or(ChainError::Unexpected("tip not indexed"))
    }
}

/// Block acceptance engine over a [`ChainStore`].
///
/// All mutation is serialized by one write lock; queries take the read
/// lock and never observe a half-applied reorganization.
pub struct BlockChain<S: ChainStore> {
    pub(crate) store: S,
    pub(crate) params: Arc<ChainParams>,
    pub(crate) time_source: Arc<dyn MedianTimeSource>,
    pub(crate) tx_validator: Arc<dyn TransactionValidator>,
    pub(crate) state: RwLock<ChainState>,
    pub(crate) orphans: OrphanPool,
    pub(crate) notifier: Notifier,
    genesis_hash: Hash32,
}

impl<S: ChainStore> BlockChain<S> {
    /// Open the chain: load the persisted index, or write genesis into an
    /// empty store.
    pub fn new(config: ChainConfig<S>) -> Result<Self, ChainError> {
        let ChainConfig {
            store,
            params,
            time_source,
            tx_validator,
            max_orphans,
            orphan_ttl,
        } = config;

        let genesis_hash = params.genesis_hash()?;
        let state = load_or_init(&store, &params, genesis_hash)?;
        info!(
            network = params.name,
            height = state.view.height(),
            tip = %state.view.tip(),
            blocks = state.index.len(),
            "chain loaded"
        );

        Ok(Self {
            store,
            params,
            time_source,
            tx_validator,
            state: RwLock::new(state),
            orphans: OrphanPool::new(max_orphans, orphan_ttl),
            notifier: Notifier::default(),
            genesis_hash,
        })
    }

    /// Register a callback for chain events.
    pub fn subscribe(&self, callback: impl Fn(&ChainNotification) + Send + Sync + 'static) {
        self.notifier.subscribe(Arc::new(callback));
    }

    /// Network parameters.
    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Genesis hash.
    pub fn genesis_hash(&self) -> Hash32 {
        self.genesis_hash
    }

    /// The store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The active tip.
    pub fn best_snapshot(&self) -> Result<BestSnapshot, ChainError> {
        let state = self.state.read();
        let tip = state.tip()?;
        let median_time = state
            .index
            .past_median_time(&tip.hash, self.params.median_time_blocks)
            .ok_or(ChainError::Unexpected("tip has no median time"))?;
        Ok(BestSnapshot {
            hash: tip.hash,
            height: tip.height,
            bits: tip.header.bits,
            timestamp: tip.header.timestamp,
            cumulative_work: tip.cumulative_work.clone(),
            median_time,
        })
    }

    /// Whether `hash` is indexed or held as an orphan.
    pub fn have_block(&self, hash: &Hash32) -> bool {
        self.state.read().index.contains(hash) || self.orphans.contains(hash)
    }

    /// Whether `hash` is held as an orphan.
    pub fn is_known_orphan(&self, hash: &Hash32) -> bool {
        self.orphans.contains(hash)
    }

    /// Deepest orphan ancestor of `hash`; request its parent from peers.
    pub fn orphan_root(&self, hash: &Hash32) -> Hash32 {
        self.orphans.orphan_root(hash)
    }

    /// Number of held orphans.
    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    /// Drop orphans past their lifetime.
    pub fn prune_orphans(&self) -> usize {
        self.orphans.prune_expired()
    }

    /// Whether `hash` is on the active chain.
    pub fn main_chain_has_block(&self, hash: &Hash32) -> bool {
        let state = self.state.read();
        state.view.contains_hash(&state.index, hash)
    }

    /// Active-chain hash at `height`.
    pub fn block_hash_by_height(&self, height: u64) -> Option<Hash32> {
        self.state.read().view.hash_at(height)
    }

    /// Height of `hash` if it is on the active chain.
    pub fn block_height_by_hash(&self, hash: &Hash32) -> Option<u64> {
        let state = self.state.read();
        state
            .index
            .lookup(hash)
            .filter(|n| state.view.contains(n))
            .map(|n| n.height)
    }

    /// Header of any indexed block.
    pub fn header_by_hash(&self, hash: &Hash32) -> Option<BlockHeader> {
        self.state.read().index.lookup(hash).map(|n| n.header.clone())
    }

    /// Copy of the index node for `hash`.
    pub fn node(&self, hash: &Hash32) -> Option<BlockNode> {
        self.state.read().index.lookup(hash).cloned()
    }

    /// Validation status of `hash`.
    pub fn block_status(&self, hash: &Hash32) -> Option<BlockStatus> {
        self.state.read().index.lookup(hash).map(|n| n.status)
    }

    /// Full block from the store.
    pub fn block_by_hash(&self, hash: &Hash32) -> Result<Option<Block>, ChainError> {
        let tx = self.store.begin_tx()?;
        let block = tx.get_block(hash)?;
        tx.rollback();
        Ok(block)
    }

    /// Bits required of the next block on the active chain.
    pub fn calc_next_required_bits(&self) -> Result<u32, ChainError> {
        let state = self.state.read();
        let tip = state.view.tip();
        self.required_bits_after(&state.index, &tip)
    }

    /// Bits required of a child of `parent` on `parent`'s own branch.
    pub fn required_bits_for_child(&self, parent: &Hash32) -> Result<u32, ChainError> {
        self.required_bits_after(&self.state.read().index, parent)
    }

    /// Median time past of the active tip.
    pub fn calc_past_median_time(&self) -> Result<u64, ChainError> {
        Ok(self.best_snapshot()?.median_time)
    }

    /// Locator for the active chain.
    pub fn block_locator(&self) -> Vec<Hash32> {
        self.state.read().view.locator()
    }

    /// Most recent common ancestor of two indexed blocks.
    pub fn find_fork(&self, a: &Hash32, b: &Hash32) -> Option<Hash32> {
        self.state.read().index.find_fork(a, b).map(|n| n.hash)
    }

    /// Current adjusted network time.
    pub fn adjusted_time(&self) -> i64 {
        self.time_source.adjusted_time()
    }

    pub(crate) fn required_bits_after(
        &self,
        index: &ChainIndex,
        parent: &Hash32,
    ) -> Result<u32, ChainError> {
        let node = index
            .lookup(parent)
            .ok_or(ChainError::Unexpected("parent not indexed"))?;
        Ok(next_required_bits(&self.params, node.retarget_sample(), |h| {
            index.retarget_ancestor(parent, h)
        })?)
    }
}

fn load_or_init<S: ChainStore>(
    store: &S,
    params: &ChainParams,
    genesis_hash: Hash32,
) -> Result<ChainState, ChainError> {
    let mut records = store.load_nodes()?;
    let mut index = ChainIndex::new();

    if records.is_empty() {
        index.insert_genesis(genesis_hash, params.genesis.header.clone())?;
        let node = index
            .lookup(&genesis_hash)
            .ok_or(ChainError::Unexpected("genesis not indexed"))?;
        let mut tx = store.begin_tx()?;
        tx.put_block(&genesis_hash, &params.genesis)?;
        tx.put_node(&genesis_hash, &node.record())?;
        tx.put_best(&BestState {
            hash: genesis_hash,
            height: 0,
        })?;
        tx.commit()?;
        info!(%genesis_hash, "initialized empty store with genesis");
        return Ok(ChainState {
            index,
            view: ChainView::new(genesis_hash),
        });
    }

    records.sort_by_key(|(_, r)| r.height);
    if records[0].0 != genesis_hash || records[0].1.height != 0 {
        return Err(ChainError::Unexpected("stored genesis does not match network"));
    }
    for (hash, record) in records {
        index.restore(hash, record)?;
    }

    let tx = store.begin_tx()?;
    let persisted = tx.get_best()?;
    tx.rollback();

    let tip = match persisted.and_then(|b| index.lookup(&b.hash)) {
        Some(node) if node.status == BlockStatus::Valid => node.hash,
        _ => {
            let recovered = recover_tip(&index).ok_or(ChainError::Unexpected("no valid tip"))?;
            warn!(%recovered, "persisted tip missing or unusable; recovered heaviest valid block");
            recovered
        }
    };

    let mut view = ChainView::new(genesis_hash);
    view.set_tip(&index, &tip)?;
    Ok(ChainState { index, view })
}

/// Heaviest fully valid block with stored data, ties to the lower hash.
fn recover_tip(index: &ChainIndex) -> Option<Hash32> {
    let mut best: Option<&BlockNode> = None;
    for node in index.nodes() {
        if node.status != BlockStatus::Valid || !node.have_data {
            continue;
        }
        best = match best {
            Some(b)
                if !tip_is_better(&node.cumulative_work, &node.hash, &b.cumulative_work, &b.hash) =>
            {
                Some(b)
            }
            _ => Some(node),
        };
    }
    best.map(|n| n.hash)
}

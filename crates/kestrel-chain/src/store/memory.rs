//! In-process [`ChainStore`] with failure injection for tests and tooling.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use kestrel_core::{Block, Hash32};
use parking_lot::Mutex;

use super::{BestState, ChainStore, NodeRecord, StoreError, StoreTx};

#[derive(Default)]
struct Contents {
    blocks: HashMap<Hash32, Block>,
    nodes: HashMap<Hash32, NodeRecord>,
    best: Option<BestState>,
}

#[derive(Default)]
struct Faults {
    fail_commits: usize,
    fail_block_writes: HashSet<Hash32>,
}

/// Heap-backed store. Clones share the same contents.
#[derive(Clone, Default)]
pub struct MemoryStore {
    contents: Arc<Mutex<Contents>>,
    faults: Arc<Mutex<Faults>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` commits fail without applying anything.
    pub fn fail_next_commits(&self, n: usize) {
        self.faults.lock().fail_commits = n;
    }

    /// Make every `put_block` for `hash` fail.
    pub fn fail_block_write(&self, hash: Hash32) {
        self.faults.lock().fail_block_writes.insert(hash);
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }

    /// Number of stored full blocks.
    pub fn block_count(&self) -> usize {
        self.contents.lock().blocks.len()
    }

    /// Committed index record for `hash`.
    pub fn node(&self, hash: &Hash32) -> Option<NodeRecord> {
        self.contents.lock().nodes.get(hash).cloned()
    }

    /// Committed best-tip record.
    pub fn best(&self) -> Option<BestState> {
        self.contents.lock().best
    }

    /// Drop the best-tip record, forcing tip recovery on next load.
    pub fn clear_best(&self) {
        self.contents.lock().best = None;
    }
}

impl ChainStore for MemoryStore {
    type Tx = MemoryTx;

    fn begin_tx(&self) -> Result<MemoryTx, StoreError> {
        Ok(MemoryTx {
            store: self.clone(),
            blocks: HashMap::new(),
            nodes: HashMap::new(),
            best: None,
        })
    }

    fn load_nodes(&self) -> Result<Vec<(Hash32, NodeRecord)>, StoreError> {
        Ok(self
            .contents
            .lock()
            .nodes
            .iter()
            .map(|(h, r)| (*h, r.clone()))
            .collect())
    }
}

/// Staged writes against a [`MemoryStore`].
pub struct MemoryTx {
    store: MemoryStore,
    blocks: HashMap<Hash32, Block>,
    nodes: HashMap<Hash32, NodeRecord>,
    best: Option<BestState>,
}

impl StoreTx for MemoryTx {
    fn put_block(&mut self, hash: &Hash32, block: &Block) -> Result<(), StoreError> {
        if self.store.faults.lock().fail_block_writes.contains(hash) {
            return Err(StoreError::Injected("block write"));
        }
        self.blocks.insert(*hash, block.clone());
        Ok(())
    }

    fn get_block(&self, hash: &Hash32) -> Result<Option<Block>, StoreError> {
        if let Some(b) = self.blocks.get(hash) {
            return Ok(Some(b.clone()));
        }
        Ok(self.store.contents.lock().blocks.get(hash).cloned())
    }

    fn put_node(&mut self, hash: &Hash32, record: &NodeRecord) -> Result<(), StoreError> {
        self.nodes.insert(*hash, record.clone());
        Ok(())
    }

    fn get_node(&self, hash: &Hash32) -> Result<Option<NodeRecord>, StoreError> {
        if let Some(r) = self.nodes.get(hash) {
            return Ok(Some(r.clone()));
        }
        Ok(self.store.contents.lock().nodes.get(hash).cloned())
    }

    fn put_best(&mut self, best: &BestState) -> Result<(), StoreError> {
        self.best = Some(*best);
        Ok(())
    }

    fn get_best(&self) -> Result<Option<BestState>, StoreError> {
        if self.best.is_some() {
            return Ok(self.best);
        }
        Ok(self.store.contents.lock().best)
    }

    fn commit(self) -> Result<(), StoreError> {
        {
            let mut faults = self.store.faults.lock();
            if faults.fail_commits > 0 {
                faults.fail_commits -= 1;
                return Err(StoreError::Injected("commit"));
            }
        }
        let mut contents = self.store.contents.lock();
        contents.blocks.extend(self.blocks);
        contents.nodes.extend(self.nodes);
        if let Some(best) = self.best {
            contents.best = Some(best);
        }
        Ok(())
    }

    fn rollback(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::BlockStatus;
    use kestrel_consensus::ChainParams;

    fn genesis() -> (Hash32, Block, NodeRecord) {
        let params = ChainParams::regtest();
        let hash = params.genesis_hash().unwrap();
        let rec = NodeRecord {
            header: params.genesis.header.clone(),
            height: 0,
            cumulative_work: vec![2],
            status: BlockStatus::Valid,
            have_data: true,
        };
        (hash, params.genesis, rec)
    }

    #[test]
    fn reads_see_staged_writes_before_commit() {
        let store = MemoryStore::new();
        let (hash, block, rec) = genesis();
        let mut tx = store.begin_tx().unwrap();
        tx.put_block(&hash, &block).unwrap();
        tx.put_node(&hash, &rec).unwrap();
        assert!(tx.get_block(&hash).unwrap().is_some());
        assert!(store.node(&hash).is_none());
        tx.commit().unwrap();
        assert_eq!(store.node(&hash), Some(rec));
        assert_eq!(store.block_count(), 1);
    }

    #[test]
    fn injected_commit_failure_applies_nothing() {
        let store = MemoryStore::new();
        let (hash, block, rec) = genesis();
        store.fail_next_commits(1);

        let mut tx = store.begin_tx().unwrap();
        tx.put_block(&hash, &block).unwrap();
        tx.put_node(&hash, &rec).unwrap();
        tx.put_best(&BestState { hash, height: 0 }).unwrap();
        assert!(matches!(tx.commit(), Err(StoreError::Injected(_))));
        assert_eq!(store.block_count(), 0);
        assert!(store.best().is_none());

        let mut tx = store.begin_tx().unwrap();
        tx.put_block(&hash, &block).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.block_count(), 1);
    }

    #[test]
    fn injected_block_write_failure() {
        let store = MemoryStore::new();
        let (hash, block, _) = genesis();
        store.fail_block_write(hash);
        let mut tx = store.begin_tx().unwrap();
        assert!(tx.put_block(&hash, &block).is_err());
        store.clear_faults();
        assert!(tx.put_block(&hash, &block).is_ok());
    }
}

//! [`ChainStore`] backed by a sled database.

use std::collections::BTreeMap;
use std::path::Path;

use borsh::{to_vec, BorshDeserialize};
use kestrel_core::{Block, Hash32};
use sled::transaction::{Transactional, TransactionResult};
use sled::Error as SledError;
use tracing::debug;

use super::{hash_from_key, BestState, ChainStore, NodeRecord, StoreError, StoreTx};

const TREE_BLOCKS: &str = "blocks";
const TREE_INDEX: &str = "index";
const TREE_META: &str = "meta";
const KEY_BEST: &[u8] = b"best";

/// Three sled trees: full blocks, index records, and metadata (best tip).
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    blocks: sled::Tree,
    index: sled::Tree,
    meta: sled::Tree,
}

impl SledStore {
    /// Open or create a database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let blocks = db.open_tree(TREE_BLOCKS)?;
        let index = db.open_tree(TREE_INDEX)?;
        let meta = db.open_tree(TREE_META)?;
        Ok(Self {
            db,
            blocks,
            index,
            meta,
        })
    }

    /// Drop the best-tip record, forcing tip recovery on next load.
    pub fn clear_best(&self) -> Result<(), StoreError> {
        self.meta.remove(KEY_BEST)?;
        self.db.flush()?;
        Ok(())
    }
}

impl ChainStore for SledStore {
    type Tx = SledTx;

    fn begin_tx(&self) -> Result<SledTx, StoreError> {
        Ok(SledTx {
            store: self.clone(),
            blocks: BTreeMap::new(),
            index: BTreeMap::new(),
            best: None,
        })
    }

    fn load_nodes(&self) -> Result<Vec<(Hash32, NodeRecord)>, StoreError> {
        let mut out = Vec::new();
        for item in self.index.iter() {
            let (k, v) = item?;
            let rec = NodeRecord::try_from_slice(&v)?;
            out.push((hash_from_key(&k)?, rec));
        }
        Ok(out)
    }
}

/// Buffered writes applied in one sled multi-tree transaction.
pub struct SledTx {
    store: SledStore,
    blocks: BTreeMap<Hash32, Vec<u8>>,
    index: BTreeMap<Hash32, Vec<u8>>,
    best: Option<Vec<u8>>,
}

impl StoreTx for SledTx {
    fn put_block(&mut self, hash: &Hash32, block: &Block) -> Result<(), StoreError> {
        self.blocks.insert(*hash, to_vec(block)?);
        Ok(())
    }

    fn get_block(&self, hash: &Hash32) -> Result<Option<Block>, StoreError> {
        if let Some(bytes) = self.blocks.get(hash) {
            return Ok(Some(Block::try_from_slice(bytes)?));
        }
        match self.store.blocks.get(hash.as_bytes())? {
            Some(bytes) => Ok(Some(Block::try_from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_node(&mut self, hash: &Hash32, record: &NodeRecord) -> Result<(), StoreError> {
        self.index.insert(*hash, to_vec(record)?);
        Ok(())
    }

    fn get_node(&self, hash: &Hash32) -> Result<Option<NodeRecord>, StoreError> {
        if let Some(bytes) = self.index.get(hash) {
            return Ok(Some(NodeRecord::try_from_slice(bytes)?));
        }
        match self.store.index.get(hash.as_bytes())? {
            Some(bytes) => Ok(Some(NodeRecord::try_from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_best(&mut self, best: &BestState) -> Result<(), StoreError> {
        self.best = Some(to_vec(best)?);
        Ok(())
    }

    fn get_best(&self) -> Result<Option<BestState>, StoreError> {
        if let Some(bytes) = &self.best {
            return Ok(Some(BestState::try_from_slice(bytes)?));
        }
        match self.store.meta.get(KEY_BEST)? {
            Some(bytes) => Ok(Some(BestState::try_from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn commit(self) -> Result<(), StoreError> {
        let Self {
            store,
            blocks,
            index,
            best,
        } = self;

        let res: TransactionResult<(), SledError> =
            (&store.blocks, &store.index, &store.meta).transaction(|(tb, ti, tm)| {
                for (hash, bytes) in &blocks {
                    tb.insert(hash.as_bytes(), bytes.clone())?;
                }
                for (hash, bytes) in &index {
                    ti.insert(hash.as_bytes(), bytes.clone())?;
                }
                if let Some(b) = &best {
                    tm.insert(KEY_BEST, b.clone())?;
                }
                Ok(())
            });
        res.map_err(|e| StoreError::Backend(e.to_string()))?;
        store.db.flush()?;

        debug!(blocks = blocks.len(), nodes = index.len(), "store commit");
        Ok(())
    }

    fn rollback(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::BlockStatus;
    use kestrel_consensus::ChainParams;
    use tempfile::tempdir;

    fn record(params: &ChainParams) -> NodeRecord {
        NodeRecord {
            header: params.genesis.header.clone(),
            height: 0,
            cumulative_work: vec![1],
            status: BlockStatus::Valid,
            have_data: true,
        }
    }

    #[test]
    fn committed_writes_survive_reopen() {
        let dir = tempdir().unwrap();
        let params = ChainParams::regtest();
        let hash = params.genesis_hash().unwrap();

        {
            let store = SledStore::open(dir.path()).unwrap();
            let mut tx = store.begin_tx().unwrap();
            tx.put_block(&hash, &params.genesis).unwrap();
            tx.put_node(&hash, &record(&params)).unwrap();
            tx.put_best(&BestState { hash, height: 0 }).unwrap();
            assert_eq!(tx.get_best().unwrap().unwrap().hash, hash);
            tx.commit().unwrap();
        }

        let store = SledStore::open(dir.path()).unwrap();
        let nodes = store.load_nodes().unwrap();
        assert_eq!(nodes, vec![(hash, record(&params))]);
        let tx = store.begin_tx().unwrap();
        assert_eq!(tx.get_block(&hash).unwrap().unwrap(), params.genesis);
        assert_eq!(tx.get_best().unwrap(), Some(BestState { hash, height: 0 }));
    }

    #[test]
    fn dropped_tx_writes_nothing() {
        let dir = tempdir().unwrap();
        let params = ChainParams::regtest();
        let hash = params.genesis_hash().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        let mut tx = store.begin_tx().unwrap();
        tx.put_block(&hash, &params.genesis).unwrap();
        tx.put_node(&hash, &record(&params)).unwrap();
        drop(tx);

        let mut tx = store.begin_tx().unwrap();
        tx.put_best(&BestState { hash, height: 0 }).unwrap();
        tx.rollback();

        assert!(store.load_nodes().unwrap().is_empty());
        let tx = store.begin_tx().unwrap();
        assert!(tx.get_block(&hash).unwrap().is_none());
        assert!(tx.get_best().unwrap().is_none());
    }

    #[test]
    fn clear_best_removes_only_the_tip() {
        let dir = tempdir().unwrap();
        let params = ChainParams::regtest();
        let hash = params.genesis_hash().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        let mut tx = store.begin_tx().unwrap();
        tx.put_node(&hash, &record(&params)).unwrap();
        tx.put_best(&BestState { hash, height: 0 }).unwrap();
        tx.commit().unwrap();

        store.clear_best().unwrap();
        assert!(store.begin_tx().unwrap().get_best().unwrap().is_none());
        assert_eq!(store.load_nodes().unwrap().len(), 1);
    }
}

//! In-memory tree of every known block header.
//!
//! Each [`BlockNode`] records its parent, height, and cumulative work, both
//! fixed at insertion. Only the validation status and the data flag change
//! later.

use std::collections::VecDeque;

use borsh::{BorshDeserialize, BorshSerialize};
use hashbrown::HashMap;
use kestrel_consensus::{
    chain_work, median_time_past, work_from_bits, work_from_bytes, work_to_bytes, RetargetSample,
};
use kestrel_core::{BlockHeader, Hash32};
use num_bigint::BigUint;

use crate::error::ChainError;
use crate::store::{NodeRecord, StoreError};

/// Validation outcome of a block.
///
/// Moves out of `Unvalidated` at most once and never returns to it.
/// `Invalid` is terminal.
///
/// There is one exception to write-once: `Valid` means the block passed
/// every check available when it was indexed. A side-branch block is only
/// checked against the transaction oracle's connect rules when a
/// reorganization tries to attach it. If it fails there, it and its
/// descendants move from `Valid` to `Invalid`. No other transition out of
/// `Valid` exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum BlockStatus {
    /// Not yet checked against its context.
    Unvalidated,
    /// Passed every check so far.
    Valid,
    /// Failed a contextual or connect-time check, or descends from such a
    /// block.
    Invalid,
}

/// One known block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockNode {
    /// Block hash.
    pub hash: Hash32,
    /// Parent hash; `None` for genesis.
    pub parent: Option<Hash32>,
    /// Block header.
    pub header: BlockHeader,
    /// Height on its own branch.
    pub height: u64,
    /// Work of this block alone.
    pub work: BigUint,
    /// Parent's cumulative work plus this block's.
    pub cumulative_work: BigUint,
    /// Validation outcome.
    pub status: BlockStatus,
    /// Whether the full block is stored.
    pub have_data: bool,
}

impl BlockNode {
    /// Persisted form.
    pub fn record(&self) -> NodeRecord {
        NodeRecord {
            header: self.header.clone(),
            height: self.height,
            cumulative_work: work_to_bytes(&self.cumulative_work),
            status: self.status,
            have_data: self.have_data,
        }
    }

    /// The fields difficulty retargeting reads.
    pub fn retarget_sample(&self) -> RetargetSample {
        RetargetSample {
            height: self.height,
            timestamp: self.header.timestamp,
            bits: self.header.bits,
        }
    }
}

/// Every known block, keyed by hash, with a child index.
#[derive(Default)]
pub struct ChainIndex {
    nodes: HashMap<Hash32, BlockNode>,
    children: HashMap<Hash32, Vec<Hash32>>,
}

impl ChainIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Node for `hash`.
    pub fn lookup(&self, hash: &Hash32) -> Option<&BlockNode> {
        self.nodes.get(hash)
    }

    /// Whether `hash` is indexed.
    pub fn contains(&self, hash: &Hash32) -> bool {
        self.nodes.contains_key(hash)
    }

    /// Number of indexed blocks.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes, in no particular order.
    pub fn nodes(&self) -> impl Iterator<Item = &BlockNode> {
        self.nodes.values()
    }

    /// Direct children of `hash`.
    pub fn children(&self, hash: &Hash32) -> &[Hash32] {
        self.children.get(hash).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Insert the root of the tree. Valid by definition.
    pub fn insert_genesis(
        &mut self,
        hash: Hash32,
        header: BlockHeader,
    ) -> Result<&BlockNode, ChainError> {
        if !self.nodes.is_empty() {
            return Err(ChainError::Unexpected("genesis inserted into non-empty index"));
        }
        let work = work_from_bits(header.bits)?;
        let node = BlockNode {
            hash,
            parent: None,
            header,
            height: 0,
            cumulative_work: work.clone(),
            work,
            status: BlockStatus::Valid,
            have_data: true,
        };
        Ok(self.nodes.entry(hash).or_insert(node))
    }

    /// Insert a header whose parent is indexed. The new node is
    /// `Unvalidated` and has no data.
    pub fn insert(&mut self, hash: Hash32, header: BlockHeader) -> Result<&BlockNode, ChainError> {
        if self.nodes.contains_key(&hash) {
            return Err(ChainError::AlreadyHave(hash));
        }
        let parent = self
            .nodes
            .get(&header.prev)
            .ok_or(ChainError::Unexpected("parent not indexed"))?;
        let (work, cumulative_work) = chain_work(&parent.cumulative_work, header.bits)?;
        let node = BlockNode {
            hash,
            parent: Some(parent.hash),
            height: parent.height + 1,
            cumulative_work,
            work,
            header,
            status: BlockStatus::Unvalidated,
            have_data: false,
        };
        self.children.entry(node.header.prev).or_default().push(hash);
        Ok(self.nodes.entry(hash).or_insert(node))
    }

    /// Rebuild a node from its persisted record. Parents must be restored
    /// before children.
    pub fn restore(&mut self, hash: Hash32, record: NodeRecord) -> Result<(), ChainError> {
        let NodeRecord {
            header,
            height,
            cumulative_work,
            status,
            have_data,
        } = record;
        let node = if height == 0 {
            self.insert_genesis(hash, header)?
        } else {
            self.insert(hash, header)?
        };
        if node.height != height
            || node.cumulative_work != work_from_bytes(&cumulative_work)
        {
            return Err(StoreError::Corrupt("index record disagrees with its parent").into());
        }
        if let Some(node) = self.nodes.get_mut(&hash) {
            node.status = status;
            node.have_data = have_data;
        }
        Ok(())
    }

    /// Record a validation outcome.
    pub fn set_status(&mut self, hash: &Hash32, status: BlockStatus) -> Result<(), ChainError> {
        let node = self
            .nodes
            .get_mut(hash)
            .ok_or(ChainError::Unexpected("status update for unknown block"))?;
        match (node.status, status) {
            (_, BlockStatus::Unvalidated) | (BlockStatus::Invalid, BlockStatus::Valid) => {
                Err(ChainError::Unexpected("block status moved backwards"))
            }
            _ => {
                node.status = status;
                Ok(())
            }
        }
    }

    /// Mark that the full block is stored.
    pub fn set_have_data(&mut self, hash: &Hash32, have_data: bool) {
        if let Some(node) = self.nodes.get_mut(hash) {
            node.have_data = have_data;
        }
    }

    /// `hash` and every descendant not already invalid, `hash` first.
    /// Nothing is modified.
    pub fn invalidation_set(&self, hash: &Hash32) -> Vec<Hash32> {
        let mut found = Vec::new();
        let mut queue = VecDeque::from([*hash]);
        while let Some(h) = queue.pop_front() {
            if self.nodes.get(&h).is_some_and(|n| n.status != BlockStatus::Invalid) {
                found.push(h);
            }
            if let Some(kids) = self.children.get(&h) {
                queue.extend(kids.iter().copied());
            }
        }
        found
    }

    /// Mark `hash` and every descendant invalid. Returns the hashes whose
    /// status changed, `hash` first.
    pub fn mark_invalid_with_descendants(&mut self, hash: &Hash32) -> Vec<Hash32> {
        let changed = self.invalidation_set(hash);
        for h in &changed {
            if let Some(node) = self.nodes.get_mut(h) {
                node.status = BlockStatus::Invalid;
            }
        }
        changed
    }

    /// Remove a node that has no children. Used to undo an insertion whose
    /// persistence failed.
    pub fn remove_leaf(&mut self, hash: &Hash32) -> Option<BlockNode> {
        if self.children.get(hash).is_some_and(|c| !c.is_empty()) {
            return None;
        }
        let node = self.nodes.remove(hash)?;
        if let Some(parent) = node.parent {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.retain(|h| h != hash);
                if siblings.is_empty() {
                    self.children.remove(&parent);
                }
            }
        }
        self.children.remove(hash);
        Some(node)
    }

    /// Ancestor of `hash` at `height`, following parent links.
    pub fn ancestor(&self, hash: &Hash32, height: u64) -> Option<&BlockNode> {
        let mut node = self.nodes.get(hash)?;
        if height > node.height {
            return None;
        }
        while node.height > height {
            node = self.nodes.get(&node.parent?)?;
        }
        Some(node)
    }

    /// Median timestamp of `hash` and up to `window - 1` of its ancestors.
    pub fn past_median_time(&self, hash: &Hash32, window: usize) -> Option<u64> {
        let mut timestamps = Vec::with_capacity(window);
        let mut cursor = self.nodes.get(hash);
        while let Some(node) = cursor {
            if timestamps.len() == window {
                break;
            }
            timestamps.push(node.header.timestamp);
            cursor = node.parent.and_then(|p| self.nodes.get(&p));
        }
        timestamps.reverse();
        median_time_past(&timestamps, window)
    }

    /// Most recent common ancestor of `a` and `b`.
    pub fn find_fork(&self, a: &Hash32, b: &Hash32) -> Option<&BlockNode> {
        let mut x = self.nodes.get(a)?;
        let mut y = self.nodes.get(b)?;
        while x.height > y.height {
            x = self.nodes.get(&x.parent?)?;
        }
        while y.height > x.height {
            y = self.nodes.get(&y.parent?)?;
        }
        while x.hash != y.hash {
            x = self.nodes.get(&x.parent?)?;
            y = self.nodes.get(&y.parent?)?;
        }
        Some(x)
    }

    /// Retarget samples of `hash`'s ancestors, keyed by height.
    pub fn retarget_ancestor(&self, hash: &Hash32, height: u64) -> Option<RetargetSample> {
        self.ancestor(hash, height).map(BlockNode::retarget_sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::PROTOCOL_VERSION;

    const EASY: u32 = 0x207f_ffff;

    fn header(prev: Hash32, timestamp: u64, nonce: u64) -> BlockHeader {
        BlockHeader {
            version: PROTOCOL_VERSION,
            prev,
            merkle_root: Hash32::zero(),
            timestamp,
            bits: EASY,
            nonce,
        }
    }

    fn h(n: u8) -> Hash32 {
        Hash32([n; 32])
    }

    // 0 - 1 - 2 - 3
    //      \
    //       4 - 5
    fn tree() -> ChainIndex {
        let mut idx = ChainIndex::new();
        idx.insert_genesis(h(0), header(Hash32::zero(), 1000, 0)).unwrap();
        idx.insert(h(1), header(h(0), 1010, 1)).unwrap();
        idx.insert(h(2), header(h(1), 1020, 2)).unwrap();
        idx.insert(h(3), header(h(2), 1030, 3)).unwrap();
        idx.insert(h(4), header(h(1), 1025, 4)).unwrap();
        idx.insert(h(5), header(h(4), 1035, 5)).unwrap();
        idx
    }

    #[test]
    fn heights_and_work_accumulate() {
        let idx = tree();
        let unit = work_from_bits(EASY).unwrap();
        let n3 = idx.lookup(&h(3)).unwrap();
        assert_eq!(n3.height, 3);
        assert_eq!(n3.cumulative_work, &unit * 4u32);
        assert_eq!(n3.parent, Some(h(2)));
        assert_eq!(n3.status, BlockStatus::Unvalidated);
        assert!(idx.lookup(&h(0)).unwrap().parent.is_none());
    }

    #[test]
    fn insert_requires_parent_and_rejects_duplicates() {
        let mut idx = tree();
        assert!(matches!(
            idx.insert(h(9), header(h(8), 2000, 9)),
            Err(ChainError::Unexpected(_))
        ));
        assert!(matches!(
            idx.insert(h(3), header(h(2), 1030, 3)),
            Err(ChainError::AlreadyHave(_))
        ));
    }

    #[test]
    fn fork_and_ancestor() {
        let idx = tree();
        assert_eq!(idx.find_fork(&h(3), &h(5)).unwrap().hash, h(1));
        assert_eq!(idx.find_fork(&h(2), &h(3)).unwrap().hash, h(2));
        assert_eq!(idx.find_fork(&h(0), &h(5)).unwrap().hash, h(0));
        assert_eq!(idx.ancestor(&h(5), 1).unwrap().hash, h(1));
        assert_eq!(idx.ancestor(&h(5), 2).unwrap().hash, h(4));
        assert!(idx.ancestor(&h(1), 2).is_none());
    }

    #[test]
    fn median_uses_own_branch() {
        let idx = tree();
        // 1000, 1010, 1025, 1035
        assert_eq!(idx.past_median_time(&h(5), 11), Some(1025));
        // 1010, 1020, 1030 with a window of 3
        assert_eq!(idx.past_median_time(&h(3), 3), Some(1020));
        assert_eq!(idx.past_median_time(&h(0), 11), Some(1000));
    }

    #[test]
    fn invalidity_spreads_to_descendants_only() {
        let mut idx = tree();
        assert_eq!(idx.invalidation_set(&h(4)), vec![h(4), h(5)]);
        assert_eq!(idx.lookup(&h(4)).unwrap().status, BlockStatus::Unvalidated);
        let changed = idx.mark_invalid_with_descendants(&h(4));
        assert_eq!(changed, vec![h(4), h(5)]);
        assert_eq!(idx.lookup(&h(5)).unwrap().status, BlockStatus::Invalid);
        assert_eq!(idx.lookup(&h(3)).unwrap().status, BlockStatus::Unvalidated);
        assert!(idx.mark_invalid_with_descendants(&h(4)).is_empty());
    }

    #[test]
    fn status_never_returns() {
        let mut idx = tree();
        idx.set_status(&h(2), BlockStatus::Valid).unwrap();
        assert!(idx.set_status(&h(2), BlockStatus::Unvalidated).is_err());
        idx.set_status(&h(2), BlockStatus::Invalid).unwrap();
        assert!(idx.set_status(&h(2), BlockStatus::Valid).is_err());
    }

    #[test]
    fn remove_leaf_only_removes_leaves() {
        let mut idx = tree();
        assert!(idx.remove_leaf(&h(4)).is_none());
        assert!(idx.remove_leaf(&h(5)).is_some());
        assert!(idx.children(&h(4)).is_empty());
        assert!(idx.remove_leaf(&h(4)).is_some());
        assert_eq!(idx.children(&h(1)), &[h(2)]);
        assert_eq!(idx.len(), 4);
    }

    #[test]
    fn restore_checks_records() {
        let src = tree();
        let mut idx = ChainIndex::new();
        for n in 0..=3u8 {
            idx.restore(h(n), src.lookup(&h(n)).unwrap().record()).unwrap();
        }
        assert_eq!(idx.lookup(&h(3)), src.lookup(&h(3)));

        let mut bad = src.lookup(&h(4)).unwrap().record();
        bad.height = 7;
        assert!(matches!(idx.restore(h(4), bad), Err(ChainError::Store(_))));
    }
}

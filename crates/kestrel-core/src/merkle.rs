// Consensus-critical. Changes require a network upgrade + tests.
//! Transaction merkle root.
//!
//! Leaves are transaction ids appended in block order. Only the frontier of
//! filled subtrees is kept, so appending is O(log n) and the root folds the
//! frontier with domain-separated padding nodes for incomplete levels.

use hashbrown::HashMap;

use crate::constants::{DS_MERKLE_EMPTY, DS_MERKLE_LEAF, DS_MERKLE_NODE};
use crate::serialization::hash32;
use crate::types::{Hash32, TxId};

/// Incremental merkle accumulator over transaction ids.
#[derive(Clone, Debug, Default)]
pub struct TxMerkleTree {
    len: u64,
    /// Complete subtree roots keyed by level (0 = leaves).
    frontier: HashMap<u8, Hash32>,
}

impl TxMerkleTree {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of leaves appended.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether no leaf has been appended.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a transaction id.
    pub fn push(&mut self, id: &TxId) {
        let mut node = hash32(DS_MERKLE_LEAF, id.as_bytes());
        let mut level: u8 = 0;
        let mut idx = self.len;

        // An odd index at this level means a left sibling is waiting in the frontier.
        while idx & 1 == 1 {
            let left = self
                .frontier
                .remove(&level)
                .unwrap_or_else(|| padding(level));
            node = join(&left, &node);
            idx >>= 1;
            level = level.saturating_add(1);
        }

        self.frontier.insert(level, node);
        self.len = self.len.saturating_add(1);
    }

    /// Root of everything appended so far; the zero hash when empty.
    pub fn root(&self) -> Hash32 {
        let Some(top) = self.frontier.keys().max().copied() else {
            return Hash32::zero();
        };

        let mut acc: Option<Hash32> = None;
        for level in 0..=top {
            let node = self
                .frontier
                .get(&level)
                .copied()
                .unwrap_or_else(|| padding(level));
            acc = Some(match acc {
                None => node,
                Some(lower) => join(&node, &lower),
            });
        }
        acc.unwrap_or_else(Hash32::zero)
    }
}

/// Merkle root of a sequence of transaction ids.
pub fn merkle_root(ids: &[TxId]) -> Hash32 {
    let mut tree = TxMerkleTree::new();
    for id in ids {
        tree.push(id);
    }
    tree.root()
}

fn join(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(left.as_bytes());
    bytes[32..].copy_from_slice(right.as_bytes());
    hash32(DS_MERKLE_NODE, &bytes)
}

fn padding(level: u8) -> Hash32 {
    hash32(DS_MERKLE_EMPTY, &[level])
}

//! The active chain as a height-indexed list of hashes.

use kestrel_core::Hash32;

use crate::error::ChainError;
use crate::index::{BlockNode, ChainIndex};

/// Genesis-to-tip sequence of the active chain. Position `h` holds the hash
/// at height `h`.
#[derive(Clone, Debug)]
pub struct ChainView {
    hashes: Vec<Hash32>,
}

impl ChainView {
    /// A chain holding only genesis.
    pub fn new(genesis: Hash32) -> Self {
        Self {
            hashes: vec![genesis],
        }
    }

    /// Hash of the tip.
    pub fn tip(&self) -> Hash32 {
        self.hashes[self.hashes.len() - 1]
    }

    /// Height of the tip.
    pub fn height(&self) -> u64 {
        (self.hashes.len() - 1) as u64
    }

    /// Hash at `height`, if the chain is that tall.
    pub fn hash_at(&self, height: u64) -> Option<Hash32> {
        usize::try_from(height)
            .ok()
            .and_then(|h| self.hashes.get(h))
            .copied()
    }

    /// Whether `node` is on the active chain.
    pub fn contains(&self, node: &BlockNode) -> bool {
        self.hash_at(node.height) == Some(node.hash)
    }

    /// Whether `hash` is on the active chain.
    pub fn contains_hash(&self, index: &ChainIndex, hash: &Hash32) -> bool {
        index.lookup(hash).is_some_and(|n| self.contains(n))
    }

    /// Make `tip` the active tip, rewriting every position above the point
    /// where its branch meets the current chain.
    pub fn set_tip(&mut self, index: &ChainIndex, tip: &Hash32) -> Result<(), ChainError> {
        let mut branch = Vec::new();
        let mut cursor = index
            .lookup(tip)
            .ok_or(ChainError::Unexpected("new tip not indexed"))?;
        while !self.contains(cursor) {
            branch.push(cursor.hash);
            let parent = cursor
                .parent
                .ok_or(ChainError::Unexpected("new tip does not descend from genesis"))?;
            cursor = index
                .lookup(&parent)
                .ok_or(ChainError::Unexpected("tip ancestor not indexed"))?;
        }
        self.hashes.truncate(cursor.height as usize + 1);
        self.hashes.extend(branch.into_iter().rev());
        Ok(())
    }

    /// Highest block shared by the active chain and `hash`'s branch.
    pub fn find_fork<'a>(&self, index: &'a ChainIndex, hash: &Hash32) -> Option<&'a BlockNode> {
        let mut node = index.lookup(hash)?;
        while !self.contains(node) {
            node = index.lookup(&node.parent?)?;
        }
        Some(node)
    }

    /// Hashes from the tip back to genesis: the ten most recent one apart,
    /// then doubling gaps. Always ends with genesis.
    pub fn locator(&self) -> Vec<Hash32> {
        let mut out = Vec::new();
        let mut height = self.height();
        let mut step = 1u64;
        loop {
            if let Some(hash) = self.hash_at(height) {
                out.push(hash);
            }
            if height == 0 {
                break;
            }
            if out.len() >= 10 {
                step *= 2;
            }
            height = height.saturating_sub(step);
        }
        out
    }

    /// Hashes from genesis to tip.
    pub fn hashes(&self) -> &[Hash32] {
        &self.hashes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::{BlockHeader, PROTOCOL_VERSION};

    fn h(n: u8) -> Hash32 {
        Hash32([n; 32])
    }

    fn header(prev: Hash32, nonce: u64) -> BlockHeader {
        BlockHeader {
            version: PROTOCOL_VERSION,
            prev,
            merkle_root: Hash32::zero(),
            timestamp: 1000 + nonce,
            bits: 0x207f_ffff,
            nonce,
        }
    }

    // 0 - 1 - 2 - 3
    //      \
    //       4 - 5 - 6
    fn tree() -> ChainIndex {
        let mut idx = ChainIndex::new();
        idx.insert_genesis(h(0), header(Hash32::zero(), 0)).unwrap();
        for (n, p) in [(1, 0), (2, 1), (3, 2), (4, 1), (5, 4), (6, 5)] {
            idx.insert(h(n), header(h(p), n as u64)).unwrap();
        }
        idx
    }

    #[test]
    fn set_tip_switches_branches() {
        let idx = tree();
        let mut view = ChainView::new(h(0));
        view.set_tip(&idx, &h(3)).unwrap();
        assert_eq!(view.hashes(), &[h(0), h(1), h(2), h(3)]);
        assert_eq!(view.height(), 3);

        view.set_tip(&idx, &h(6)).unwrap();
        assert_eq!(view.hashes(), &[h(0), h(1), h(4), h(5), h(6)]);
        assert!(view.contains_hash(&idx, &h(4)));
        assert!(!view.contains_hash(&idx, &h(2)));

        view.set_tip(&idx, &h(1)).unwrap();
        assert_eq!(view.tip(), h(1));
        assert_eq!(view.hash_at(2), None);
    }

    #[test]
    fn fork_point_of_side_branch() {
        let idx = tree();
        let mut view = ChainView::new(h(0));
        view.set_tip(&idx, &h(3)).unwrap();
        assert_eq!(view.find_fork(&idx, &h(6)).unwrap().hash, h(1));
        assert_eq!(view.find_fork(&idx, &h(2)).unwrap().hash, h(2));
    }

    #[test]
    fn locator_thins_out_and_ends_at_genesis() {
        let mut idx = ChainIndex::new();
        let mut hashes = vec![Hash32([0xaa; 32])];
        idx.insert_genesis(hashes[0], header(Hash32::zero(), 0)).unwrap();
        for n in 1..=40u64 {
            let mut bytes = [0u8; 32];
            bytes[..8].copy_from_slice(&n.to_be_bytes());
            let hash = Hash32(bytes);
            idx.insert(hash, header(hashes[n as usize - 1], n)).unwrap();
            hashes.push(hash);
        }
        let mut view = ChainView::new(hashes[0]);
        view.set_tip(&idx, &hashes[40]).unwrap();

        let loc = view.locator();
        let heights: Vec<u64> = loc
            .iter()
            .map(|x| idx.lookup(x).unwrap().height)
            .collect();
        assert_eq!(
            heights,
            vec![40, 39, 38, 37, 36, 35, 34, 33, 32, 31, 29, 25, 17, 1, 0]
        );
    }
}

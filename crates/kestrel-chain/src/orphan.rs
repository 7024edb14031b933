//! Blocks waiting for an unknown parent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use kestrel_core::{Block, Hash32};
use parking_lot::Mutex;
use tracing::debug;

/// Default maximum number of held orphans.
pub const DEFAULT_MAX_ORPHANS: usize = 100;

/// Default lifetime of an orphan.
pub const DEFAULT_ORPHAN_TTL: Duration = Duration::from_secs(60 * 60);

/// A held orphan.
#[derive(Clone, Debug)]
pub struct OrphanBlock {
    /// Block hash.
    pub hash: Hash32,
    /// The block.
    pub block: Arc<Block>,
    /// When it was added.
    pub received: Instant,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    by_hash: HashMap<Hash32, OrphanBlock>,
    by_parent: HashMap<Hash32, Vec<Hash32>>,
    next_seq: u64,
}

impl Inner {
    fn remove(&mut self, hash: &Hash32) -> Option<OrphanBlock> {
        let orphan = self.by_hash.remove(hash)?;
        let parent = orphan.block.header.prev;
        if let Some(siblings) = self.by_parent.get_mut(&parent) {
            siblings.retain(|h| h != hash);
            if siblings.is_empty() {
                self.by_parent.remove(&parent);
            }
        }
        Some(orphan)
    }

    fn prune_expired(&mut self, now: Instant, ttl: Duration) -> usize {
        let expired: Vec<Hash32> = self
            .by_hash
            .values()
            .filter(|o| now.saturating_duration_since(o.received) > ttl)
            .map(|o| o.hash)
            .collect();
        for hash in &expired {
            self.remove(hash);
        }
        expired.len()
    }

    fn oldest(&self) -> Option<Hash32> {
        self.by_hash.values().min_by_key(|o| o.seq).map(|o| o.hash)
    }
}

/// Bounded set of orphans, indexed by hash and by missing parent.
pub struct OrphanPool {
    inner: Mutex<Inner>,
    max_orphans: usize,
    ttl: Duration,
}

impl Default for OrphanPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ORPHANS, DEFAULT_ORPHAN_TTL)
    }
}

impl OrphanPool {
    /// Pool holding at most `max_orphans` blocks for at most `ttl` each.
    pub fn new(max_orphans: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_orphans: max_orphans.max(1),
            ttl,
        }
    }

    /// Capacity.
    pub fn max_orphans(&self) -> usize {
        self.max_orphans
    }

    /// Add an orphan. A known hash is ignored. When full, expired entries go
    /// first, then the oldest.
    pub fn add(&self, hash: Hash32, block: Arc<Block>) {
        self.add_at(hash, block, Instant::now());
    }

    /// [`OrphanPool::add`] with an explicit arrival time.
    pub fn add_at(&self, hash: Hash32, block: Arc<Block>, now: Instant) {
        let mut inner = self.inner.lock();
        if inner.by_hash.contains_key(&hash) {
            return;
        }
        if inner.by_hash.len() >= self.max_orphans {
            inner.prune_expired(now, self.ttl);
        }
        while inner.by_hash.len() >= self.max_orphans {
            let Some(oldest) = inner.oldest() else { break };
            debug!(%oldest, "evicting orphan");
            inner.remove(&oldest);
        }

        let parent = block.header.prev;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.by_parent.entry(parent).or_default().push(hash);
        inner.by_hash.insert(
            hash,
            OrphanBlock {
                hash,
                block,
                received: now,
                seq,
            },
        );
    }

    /// Orphans whose parent is `parent`, in arrival order.
    pub fn children_of(&self, parent: &Hash32) -> Vec<OrphanBlock> {
        let inner = self.inner.lock();
        inner
            .by_parent
            .get(parent)
            .map(|kids| {
                kids.iter()
                    .filter_map(|h| inner.by_hash.get(h).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove and return an orphan.
    pub fn remove(&self, hash: &Hash32) -> Option<OrphanBlock> {
        self.inner.lock().remove(hash)
    }

    /// Put back an orphan taken out with [`OrphanPool::remove`], keeping its
    /// arrival time and its place among its siblings. A known hash is
    /// ignored.
    pub fn reinsert(&self, orphan: OrphanBlock) {
        let mut inner = self.inner.lock();
        let Inner {
            by_hash, by_parent, ..
        } = &mut *inner;
        if by_hash.contains_key(&orphan.hash) {
            return;
        }
        let siblings = by_parent.entry(orphan.block.header.prev).or_default();
        let at = siblings
            .iter()
            .position(|h| by_hash.get(h).is_some_and(|o| o.seq > orphan.seq))
            .unwrap_or(siblings.len());
        siblings.insert(at, orphan.hash);
        by_hash.insert(orphan.hash, orphan);
    }

    /// Drop orphans older than `max_age`. Returns how many were removed.
    pub fn prune(&self, max_age: Duration) -> usize {
        self.prune_at(Instant::now(), max_age)
    }

    /// [`OrphanPool::prune`] evaluated at `now`.
    pub fn prune_at(&self, now: Instant, max_age: Duration) -> usize {
        self.inner.lock().prune_expired(now, max_age)
    }

    /// Drop orphans past the pool's lifetime.
    pub fn prune_expired(&self) -> usize {
        self.prune(self.ttl)
    }

    /// Whether `hash` is held.
    pub fn contains(&self, hash: &Hash32) -> bool {
        self.inner.lock().by_hash.contains_key(hash)
    }

    /// Deepest ancestor of `hash` that is still an orphan, or `hash` itself.
    /// Its parent is the block to request from peers.
    pub fn orphan_root(&self, hash: &Hash32) -> Hash32 {
        let inner = self.inner.lock();
        let mut root = *hash;
        // Bounded by the pool size, so a malformed cycle cannot hang.
        for _ in 0..=inner.by_hash.len() {
            match inner.by_hash.get(&root) {
                Some(o) if inner.by_hash.contains_key(&o.block.header.prev) => {
                    root = o.block.header.prev;
                }
                _ => break,
            }
        }
        root
    }

    /// Number of held orphans.
    pub fn len(&self) -> usize {
        self.inner.lock().by_hash.len()
    }

    /// True if no orphans are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::{BlockHeader, PROTOCOL_VERSION};

    fn h(n: u8) -> Hash32 {
        Hash32([n; 32])
    }

    fn block(prev: Hash32, nonce: u64) -> Arc<Block> {
        Arc::new(Block {
            header: BlockHeader {
                version: PROTOCOL_VERSION,
                prev,
                merkle_root: Hash32::zero(),
                timestamp: 0,
                bits: 0x207f_ffff,
                nonce,
            },
            txs: Vec::new(),
        })
    }

    #[test]
    fn indexes_by_parent_in_arrival_order() {
        let pool = OrphanPool::default();
        pool.add(h(2), block(h(1), 2));
        pool.add(h(3), block(h(1), 3));
        pool.add(h(4), block(h(9), 4));
        pool.add(h(2), block(h(1), 2));

        let kids: Vec<Hash32> = pool.children_of(&h(1)).iter().map(|o| o.hash).collect();
        assert_eq!(kids, vec![h(2), h(3)]);
        assert_eq!(pool.len(), 3);

        assert!(pool.remove(&h(2)).is_some());
        assert!(!pool.contains(&h(2)));
        assert_eq!(pool.children_of(&h(1)).len(), 1);
        assert!(pool.remove(&h(2)).is_none());
    }

    #[test]
    fn reinsert_restores_arrival_position() {
        let pool = OrphanPool::default();
        pool.add(h(2), block(h(1), 2));
        pool.add(h(3), block(h(1), 3));
        pool.add(h(4), block(h(1), 4));

        let taken = pool.remove(&h(2)).unwrap();
        let received = taken.received;
        pool.reinsert(taken.clone());
        pool.reinsert(taken);

        let kids = pool.children_of(&h(1));
        let order: Vec<Hash32> = kids.iter().map(|o| o.hash).collect();
        assert_eq!(order, vec![h(2), h(3), h(4)]);
        assert_eq!(kids[0].received, received);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn full_pool_evicts_expired_before_oldest() {
        let pool = OrphanPool::new(3, Duration::from_secs(60));
        let t0 = Instant::now();
        pool.add_at(h(1), block(h(0), 1), t0);
        pool.add_at(h(2), block(h(0), 2), t0 + Duration::from_secs(50));
        pool.add_at(h(3), block(h(0), 3), t0 + Duration::from_secs(55));

        // h(1) is expired at t0 + 100s; h(2) and h(3) are not.
        pool.add_at(h(4), block(h(0), 4), t0 + Duration::from_secs(100));
        assert!(!pool.contains(&h(1)));
        assert!(pool.contains(&h(2)));

        // Nothing expired: the oldest goes.
        pool.add_at(h(5), block(h(0), 5), t0 + Duration::from_secs(101));
        assert!(!pool.contains(&h(2)));
        assert!(pool.contains(&h(3)) && pool.contains(&h(4)) && pool.contains(&h(5)));
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn prune_drops_old_entries() {
        let pool = OrphanPool::default();
        let t0 = Instant::now();
        pool.add_at(h(1), block(h(0), 1), t0);
        pool.add_at(h(2), block(h(0), 2), t0 + Duration::from_secs(30));
        assert_eq!(pool.prune_at(t0 + Duration::from_secs(40), Duration::from_secs(20)), 1);
        assert!(pool.contains(&h(2)));
        assert!(pool.children_of(&h(0)).iter().all(|o| o.hash == h(2)));
    }

    #[test]
    fn orphan_root_walks_to_deepest_orphan() {
        let pool = OrphanPool::default();
        pool.add(h(3), block(h(2), 3));
        pool.add(h(2), block(h(1), 2));
        assert_eq!(pool.orphan_root(&h(3)), h(2));
        assert_eq!(pool.orphan_root(&h(2)), h(2));
        assert_eq!(pool.orphan_root(&h(7)), h(7));
    }
}

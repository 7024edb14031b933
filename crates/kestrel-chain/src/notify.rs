//! Ordered chain events for external indexers.

use std::sync::Arc;

use kestrel_core::{Block, Hash32};
use parking_lot::RwLock;

/// An event emitted after the corresponding state change is committed.
///
/// For a reorganization, every `BlockDisconnected` (old tip first) precedes
/// every `BlockConnected` (fork point first).
#[derive(Clone, Debug)]
pub enum ChainNotification {
    /// The block passed validation and was stored, on any branch.
    BlockAccepted {
        /// Block hash.
        hash: Hash32,
        /// Block height.
        height: u64,
        /// The block.
        block: Arc<Block>,
    },
    /// The block joined the active chain.
    BlockConnected {
        /// Block hash.
        hash: Hash32,
        /// Block height.
        height: u64,
        /// The block.
        block: Arc<Block>,
    },
    /// The block left the active chain.
    BlockDisconnected {
        /// Block hash.
        hash: Hash32,
        /// Block height.
        height: u64,
        /// The block.
        block: Arc<Block>,
    },
}

impl ChainNotification {
    /// Hash of the block the event refers to.
    pub fn hash(&self) -> Hash32 {
        match self {
            Self::BlockAccepted { hash, .. }
            | Self::BlockConnected { hash, .. }
            | Self::BlockDisconnected { hash, .. } => *hash,
        }
    }
}

/// Subscriber callback. Runs while the chain's write lock is held, so it must
/// not call back into the [`crate::BlockChain`].
pub type NotificationCallback = Arc<dyn Fn(&ChainNotification) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Notifier {
    subscribers: RwLock<Vec<NotificationCallback>>,
}

impl Notifier {
    pub(crate) fn subscribe(&self, callback: NotificationCallback) {
        self.subscribers.write().push(callback);
    }

    pub(crate) fn send(&self, notification: ChainNotification) {
        for callback in self.subscribers.read().iter() {
            callback(&notification);
        }
    }
}

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Kestrel block acceptance engine.
//!
//! [`BlockChain::process_block`] decides, for every candidate block, whether
//! it is valid, where it attaches, and whether the active chain must switch
//! to it. It owns:
//! - the chain index (one [`BlockNode`] per known header) and the active
//!   [`ChainView`], serialized behind a single lock
//! - the orphan pool for blocks whose parent is unknown
//! - a median-time source for timestamp checks
//! - a transactional [`ChainStore`] for durability
//!
//! Transaction scripts, mempool policy, and networking are out of scope.

mod accept;
pub mod chain;
pub mod error;
pub mod flags;
pub mod index;
pub mod median_time;
pub mod notify;
pub mod orphan;
mod process;
mod reorg;
pub mod store;
pub mod view;

pub use chain::{BestSnapshot, BlockChain, ChainConfig};
pub use error::{ChainError, ProcessOutcome};
pub use flags::BehaviorFlags;
pub use index::{BlockNode, BlockStatus, ChainIndex};
pub use median_time::{MedianTime, MedianTimeSource};
pub use notify::ChainNotification;
pub use orphan::{OrphanBlock, OrphanPool};
pub use store::{
    memory::MemoryStore, sled_store::SledStore, BestState, ChainStore, NodeRecord, StoreError,
    StoreTx,
};
pub use view::ChainView;

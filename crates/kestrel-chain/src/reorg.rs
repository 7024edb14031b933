//! Switching the active chain to a heavier branch.

use std::sync::Arc;

use kestrel_consensus::{check_header_context, ConsensusError};
use kestrel_core::{Block, Hash32};
use tracing::{info, warn};

use crate::chain::{BlockChain, ChainState};
use crate::error::ChainError;
use crate::index::{BlockStatus, ChainIndex};
use crate::notify::ChainNotification;
use crate::store::{BestState, ChainStore, StoreTx};

impl<S: ChainStore> BlockChain<S> {
    /// Make `new_tip` the active tip inside `tx`, which already holds the new
    /// block's data and record.
    ///
    /// Blocks above the fork point are detached tip first, then the new
    /// branch is attached fork first, each block re-checked as it attaches.
    /// Nothing in memory changes until the transaction commits. If a block
    /// fails to attach, the transaction is discarded, that block and its
    /// descendants are marked invalid, and the old tip stays active.
    pub(crate) fn connect_best_chain(
        &self,
        state: &mut ChainState,
        mut tx: S::Tx,
        new_tip: Hash32,
        new_block: &Arc<Block>,
    ) -> Result<(), ChainError> {
        let old_tip = state.view.tip();
        let old_height = state.view.height();
        let fork = state
            .view
            .find_fork(&state.index, &new_tip)
            .ok_or(ChainError::Unexpected("new tip does not meet the active chain"))?;
        let (fork_hash, fork_height) = (fork.hash, fork.height);

        let mut detach = Vec::new();
        for height in (fork_height + 1..=old_height).rev() {
            let hash = state
                .view
                .hash_at(height)
                .ok_or(ChainError::Unexpected("active chain has a gap"))?;
            detach.push(hash);
        }

        let mut attach = Vec::new();
        let mut cursor = new_tip;
        while cursor != fork_hash {
            attach.push(cursor);
            cursor = state
                .index
                .lookup(&cursor)
                .and_then(|n| n.parent)
                .ok_or(ChainError::Unexpected("branch does not reach fork point"))?;
        }
        attach.reverse();

        if !detach.is_empty() {
            info!(
                fork = %fork_hash,
                fork_height,
                %old_tip,
                %new_tip,
                detach = detach.len(),
                attach = attach.len(),
                "reorganizing active chain"
            );
        }

        let mut disconnected = Vec::with_capacity(detach.len());
        for hash in detach {
            let height = self.height_of(&state.index, &hash)?;
            let block = tx
                .get_block(&hash)?
                .ok_or(ChainError::Unexpected("active block missing from store"))?;
            disconnected.push((hash, height, Arc::new(block)));
        }

        let mut connected = Vec::with_capacity(attach.len());
        for hash in attach {
            let height = self.height_of(&state.index, &hash)?;
            let block = if hash == new_tip {
                Arc::clone(new_block)
            } else {
                let stored = tx
                    .get_block(&hash)?
                    .ok_or(ChainError::Unexpected("branch block missing from store"))?;
                Arc::new(stored)
            };
            match self.check_attach(&state.index, &hash, &block) {
                Ok(()) => connected.push((hash, height, block)),
                Err(ChainError::Rule(rule)) => {
                    tx.rollback();
                    return Err(self.reject_on_attach(state, hash, new_tip, rule));
                }
                Err(other) => return Err(other),
            }
        }

        let new_height = self.height_of(&state.index, &new_tip)?;
        tx.put_best(&BestState {
            hash: new_tip,
            height: new_height,
        })?;
        tx.commit()?;

        state.view.set_tip(&state.index, &new_tip)?;
        info!(hash = %new_tip, height = new_height, "new best block");

        for (hash, height, block) in disconnected {
            self.notifier
                .send(ChainNotification::BlockDisconnected { hash, height, block });
        }
        for (hash, height, block) in connected {
            self.notifier
                .send(ChainNotification::BlockConnected { hash, height, block });
        }
        Ok(())
    }

    /// Checks a block must pass at the moment it joins the active chain.
    fn check_attach(
        &self,
        index: &ChainIndex,
        hash: &Hash32,
        block: &Block,
    ) -> Result<(), ChainError> {
        let node = index
            .lookup(hash)
            .ok_or(ChainError::Unexpected("attaching unknown block"))?;
        if node.status == BlockStatus::Invalid {
            return Err(ConsensusError::InvalidAncestor(*hash).into());
        }
        let parent = node
            .parent
            .ok_or(ChainError::Unexpected("attaching genesis"))?;
        let ctx = self.header_context(index, &parent)?;
        check_header_context(&node.header, &ctx, &self.params)?;
        self.tx_validator
            .check_connect(block, node.height)
            .map_err(|reason| ConsensusError::ConnectRejected {
                height: node.height,
                reason,
            })?;
        Ok(())
    }

    /// Record an attach-time failure and build the error for the caller.
    fn reject_on_attach(
        &self,
        state: &mut ChainState,
        failed: Hash32,
        new_tip: Hash32,
        rule: ConsensusError,
    ) -> ChainError {
        warn!(block = %failed, error = %rule, "block failed to connect; marking branch invalid");
        let doomed = state.index.invalidation_set(&failed);
        if let Err(e) = self.persist_status(&state.index, &doomed, BlockStatus::Invalid) {
            return e;
        }
        state.index.mark_invalid_with_descendants(&failed);
        if failed == new_tip {
            rule.into()
        } else {
            ConsensusError::InvalidAncestor(failed).into()
        }
    }

    fn height_of(&self, index: &ChainIndex, hash: &Hash32) -> Result<u64, ChainError> {
        index
            .lookup(hash)
            .map(|n| n.height)
            .ok_or(ChainError::Unexpected("block not indexed"))
    }
}

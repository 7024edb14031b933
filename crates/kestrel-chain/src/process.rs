//! Entry point for candidate blocks.

use std::collections::VecDeque;
use std::sync::Arc;

use kestrel_consensus::{check_block_sanity, pow_hash};
use kestrel_core::{Block, Hash32};
use tracing::{debug, warn};

use crate::chain::{BlockChain, ChainState};
use crate::error::{ChainError, ProcessOutcome};
use crate::flags::BehaviorFlags;
use crate::index::BlockStatus;
use crate::store::ChainStore;

impl<S: ChainStore> BlockChain<S> {
    /// Validate `block` and place it in the chain.
    ///
    /// Runs in order: duplicate detection, context-free checks, orphan
    /// handling, contextual checks, index insertion, best-chain selection
    /// (extending or reorganizing the active chain), and finally
    /// re-processing of any orphans that were waiting on this block.
    ///
    /// A block that fails context-free checks is not remembered, since its
    /// header hash does not cover the transaction list. Contextual failures
    /// are recorded and answered with [`ChainError::KnownInvalid`] on
    /// resubmission.
    ///
    /// A store failure while re-processing orphans is returned even though
    /// `block` itself was accepted. The orphan goes back to the pool, and
    /// resubmitting either block picks the sweep up again.
    pub fn process_block(
        &self,
        block: Block,
        flags: BehaviorFlags,
    ) -> Result<ProcessOutcome, ChainError> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let hash = pow_hash(&block.header)?;

        if let Some(status) = state.index.lookup(&hash).map(|n| n.status) {
            // Orphans left behind by an interrupted sweep.
            self.process_orphans(state, hash)?;
            return Err(match status {
                BlockStatus::Invalid => ChainError::KnownInvalid(hash),
                _ => ChainError::AlreadyHave(hash),
            });
        }
        if self.orphans.contains(&hash) {
            if !state.index.contains(&block.header.prev) {
                return Err(ChainError::AlreadyHave(hash));
            }
            // Parent arrived but the sweep never reached this one.
            self.orphans.remove(&hash);
        }

        if let Err(e) = check_block_sanity(
            &block,
            &self.params,
            self.tx_validator.as_ref(),
            flags.check_pow(),
        ) {
            debug!(%hash, error = %e, "block failed context-free checks");
            return Err(e.into());
        }

        let block = Arc::new(block);
        let prev = block.header.prev;
        if !state.index.contains(&prev) {
            debug!(%hash, %prev, "parent unknown; holding orphan");
            self.orphans.add(hash, block);
            return Ok(ProcessOutcome::ORPHAN);
        }

        let result = self.accept_block(state, hash, &block);
        // Indexed even when invalid; waiting orphans learn either outcome.
        if state.index.contains(&hash) {
            self.process_orphans(state, hash)?;
        }
        result.map(ProcessOutcome::accepted)
    }

    /// Accept every orphan that descends from `accepted`, breadth first, in
    /// arrival order per parent.
    ///
    /// Stops at the first store failure and puts that orphan back in the
    /// pool; orphans not yet reached stay pooled.
    fn process_orphans(&self, state: &mut ChainState, accepted: Hash32) -> Result<(), ChainError> {
        let mut queue = VecDeque::from([accepted]);
        while let Some(parent) = queue.pop_front() {
            for orphan in self.orphans.children_of(&parent) {
                self.orphans.remove(&orphan.hash);
                match self.accept_block(state, orphan.hash, &orphan.block) {
                    Ok(is_main_chain) => {
                        debug!(hash = %orphan.hash, is_main_chain, "accepted former orphan");
                        queue.push_back(orphan.hash);
                    }
                    Err(e) if e.is_retryable() => {
                        warn!(hash = %orphan.hash, error = %e, "store failed while resolving orphan");
                        self.orphans.reinsert(orphan);
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(hash = %orphan.hash, error = %e, "former orphan rejected");
                        // Recorded as invalid: its own orphans inherit that.
                        if state.index.contains(&orphan.hash) {
                            queue.push_back(orphan.hash);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

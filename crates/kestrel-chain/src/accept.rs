//! Contextual validation, index insertion, and the best-chain decision.

use std::sync::Arc;

use kestrel_consensus::{check_header_context, ConsensusError, HeaderContext};
use kestrel_core::{Block, Hash32};
use tracing::{debug, info};

use crate::chain::{BlockChain, ChainState};
use crate::error::ChainError;
use crate::index::{BlockStatus, ChainIndex};
use crate::notify::ChainNotification;
use crate::store::{ChainStore, StoreTx};

impl<S: ChainStore> BlockChain<S> {
    /// Accept a block whose parent is indexed. Returns whether it became the
    /// active tip.
    pub(crate) fn accept_block(
        &self,
        state: &mut ChainState,
        hash: Hash32,
        block: &Arc<Block>,
    ) -> Result<bool, ChainError> {
        let header = &block.header;
        let parent = state
            .index
            .lookup(&header.prev)
            .ok_or(ChainError::Unexpected("parent not indexed"))?;

        let verdict = if parent.status == BlockStatus::Invalid {
            Err(ConsensusError::InvalidAncestor(header.prev))
        } else {
            let ctx = self.header_context(&state.index, &header.prev)?;
            check_header_context(header, &ctx, &self.params)
        };

        state.index.insert(hash, header.clone())?;

        if let Err(rule) = verdict {
            debug!(%hash, error = %rule, "block failed contextual checks");
            if let Err(e) = self.persist_status(&state.index, &[hash], BlockStatus::Invalid) {
                state.index.remove_leaf(&hash);
                return Err(e);
            }
            state.index.set_status(&hash, BlockStatus::Invalid)?;
            return Err(rule.into());
        }
        state.index.set_status(&hash, BlockStatus::Valid)?;

        let result = self.store_and_connect(state, hash, block);
        if matches!(&result, Err(e) if e.is_retryable()) {
            state.index.remove_leaf(&hash);
        }
        result
    }

    /// Persist a freshly validated block and switch the active chain to it
    /// when it carries strictly more work than the current tip.
    fn store_and_connect(
        &self,
        state: &mut ChainState,
        hash: Hash32,
        block: &Arc<Block>,
    ) -> Result<bool, ChainError> {
        let node = state
            .index
            .lookup(&hash)
            .ok_or(ChainError::Unexpected("accepted block not indexed"))?;
        let height = node.height;
        let mut record = node.record();
        record.have_data = true;
        let is_heavier = node.cumulative_work > state.tip()?.cumulative_work;

        let mut tx = self.store.begin_tx()?;
        tx.put_block(&hash, block)?;
        tx.put_node(&hash, &record)?;

        if is_heavier {
            self.connect_best_chain(state, tx, hash, block)?;
        } else {
            tx.commit()?;
            info!(%hash, height, "accepted side-chain block");
        }
        state.index.set_have_data(&hash, true);

        self.notifier.send(ChainNotification::BlockAccepted {
            hash,
            height,
            block: Arc::clone(block),
        });
        Ok(is_heavier)
    }

    /// Everything a header is checked against, for a child of `parent`.
    pub(crate) fn header_context(
        &self,
        index: &ChainIndex,
        parent: &Hash32,
    ) -> Result<HeaderContext, ChainError> {
        let expected_bits = self.required_bits_after(index, parent)?;
        let median_time_past = index
            .past_median_time(parent, self.params.median_time_blocks)
            .ok_or(ChainError::Unexpected("parent has no median time"))?;
        Ok(HeaderContext {
            expected_bits,
            median_time_past,
            adjusted_time: self.time_source.adjusted_time(),
        })
    }

    /// Write the index records of `hashes` with `status` in one transaction.
    /// The in-memory index is left alone; callers apply the status once this
    /// succeeds.
    pub(crate) fn persist_status(
        &self,
        index: &ChainIndex,
        hashes: &[Hash32],
        status: BlockStatus,
    ) -> Result<(), ChainError> {
        let mut tx = self.store.begin_tx()?;
        for hash in hashes {
            let node = index
                .lookup(hash)
                .ok_or(ChainError::Unexpected("persisting unknown block"))?;
            let mut record = node.record();
            record.status = status;
            tx.put_node(hash, &record)?;
        }
        tx.commit()?;
        Ok(())
    }
}

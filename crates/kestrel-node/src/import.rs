//! Feeding a block file through the chain.

use anyhow::{Context, Result};
use kestrel_chain::{BehaviorFlags, BlockChain, ChainStore};
use kestrel_core::Block;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::blockfile::BlockFileError;

/// Outcome counts of an import.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    /// Blocks that became the active tip when processed.
    pub main_chain: u64,
    /// Valid blocks stored on a side branch.
    pub side_chain: u64,
    /// Blocks parked for a missing parent.
    pub orphans: u64,
    /// Blocks already known.
    pub duplicates: u64,
    /// Blocks that broke a consensus rule.
    pub rejected: u64,
}

/// Process every block in order. Rule violations and duplicates are counted
/// and skipped; a store failure or unreadable record aborts the import.
pub fn import_blocks<S, I>(chain: &BlockChain<S>, blocks: I) -> Result<ImportStats>
where
    S: ChainStore,
    I: IntoIterator<Item = Result<Block, BlockFileError>>,
{
    let mut stats = ImportStats::default();
    for (n, block) in blocks.into_iter().enumerate() {
        let block = block.context("reading block file")?;
        match chain.process_block(block, BehaviorFlags::NONE) {
            Ok(outcome) if outcome.is_orphan => stats.orphans += 1,
            Ok(outcome) if outcome.is_main_chain => stats.main_chain += 1,
            Ok(_) => stats.side_chain += 1,
            Err(e) if e.is_already_known() => {
                debug!(record = n, error = %e, "skipping known block");
                stats.duplicates += 1;
            }
            Err(e) if e.is_rule_violation() => {
                warn!(record = n, error = %e, "rejected block");
                stats.rejected += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("processing record {n}")),
        }
    }
    info!(
        main_chain = stats.main_chain,
        side_chain = stats.side_chain,
        orphans = stats.orphans,
        duplicates = stats.duplicates,
        rejected = stats.rejected,
        "import finished"
    );
    Ok(stats)
}

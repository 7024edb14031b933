//! Error categories surfaced by block processing.

use kestrel_consensus::ConsensusError;
use kestrel_core::Hash32;
use thiserror::Error;

use crate::store::StoreError;

/// Why a block was not accepted.
///
/// Callers branch on the category: penalize the sender for
/// [`ChainError::Rule`], ignore [`ChainError::AlreadyHave`] and
/// [`ChainError::KnownInvalid`], retry on [`ChainError::Store`].
#[derive(Debug, Error)]
pub enum ChainError {
    /// The block breaks a consensus rule. Terminal for this block.
    #[error(transparent)]
    Rule(#[from] ConsensusError),

    /// The block was already processed (accepted or parked as orphan).
    #[error("already have block {0}")]
    AlreadyHave(Hash32),

    /// The block was processed before and found invalid.
    #[error("already known invalid block {0}")]
    KnownInvalid(Hash32),

    /// The durability layer failed; nothing was recorded and the call may be
    /// retried.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    /// In-memory chain state contradicts itself.
    #[error("chain state inconsistency: {0}")]
    Unexpected(&'static str),
}

impl ChainError {
    /// The block itself is bad.
    pub fn is_rule_violation(&self) -> bool {
        matches!(self, Self::Rule(_))
    }

    /// The block was seen before; the prior outcome stands.
    pub fn is_already_known(&self) -> bool {
        matches!(self, Self::AlreadyHave(_) | Self::KnownInvalid(_))
    }

    /// Infrastructure failure; resubmitting the same block is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// The rule violation, if this is one.
    pub fn rule(&self) -> Option<&ConsensusError> {
        match self {
            Self::Rule(rule) => Some(rule),
            _ => None,
        }
    }
}

/// Result of a successful [`crate::BlockChain::process_block`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// The block is now the tip of the active chain.
    pub is_main_chain: bool,
    /// The block's parent is unknown; it waits in the orphan pool.
    pub is_orphan: bool,
}

impl ProcessOutcome {
    pub(crate) const ORPHAN: Self = Self {
        is_main_chain: false,
        is_orphan: true,
    };

    pub(crate) fn accepted(is_main_chain: bool) -> Self {
        Self {
            is_main_chain,
            is_orphan: false,
        }
    }
}

//! Per-call behavior toggles for block processing.

use bitflags::bitflags;

bitflags! {
    /// Options passed to [`crate::BlockChain::process_block`].
    ///
    /// The empty set means full validation. Production callers always pass
    /// [`BehaviorFlags::NONE`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BehaviorFlags: u32 {
        /// Skip the `hash <= target` comparison. The declared target is
        /// still range-checked. Testing only.
        const NO_POW_CHECK = 1 << 0;
    }
}

impl BehaviorFlags {
    /// Full validation.
    pub const NONE: Self = Self::empty();

    /// Whether the proof-of-work hash comparison runs.
    pub fn check_pow(self) -> bool {
        !self.contains(Self::NO_POW_CHECK)
    }
}

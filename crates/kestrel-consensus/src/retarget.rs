// Consensus-critical. Changes require a network upgrade + tests.
//! Difficulty retargeting.
//!
//! The required `bits` of a block are a function of its parent and the
//! parent's ancestors only, so every node computes the same value for the
//! same branch.

use crate::difficulty::{bits_to_target, target_to_bits};
use crate::error::ConsensusError;
use crate::params::ChainParams;
use num_bigint::BigUint;
use num_traits::Zero;
use tracing::debug;

/// Maximum per-block target increase under LWMA, as a fraction (25%).
pub const LWMA_MAX_EASE_NUM: u32 = 5;
/// See [`LWMA_MAX_EASE_NUM`].
pub const LWMA_MAX_EASE_DEN: u32 = 4;

/// How a network adjusts difficulty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetargetRule {
    /// Every block must repeat its parent's bits.
    None,
    /// Classic retarget every `retarget_interval` blocks from the elapsed
    /// time of the previous interval.
    Interval,
    /// Linear weighted moving average over the last `window` blocks,
    /// evaluated every block.
    Lwma {
        /// Number of ancestors considered.
        window: usize,
    },
}

/// The header fields a retarget rule reads from one ancestor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetargetSample {
    /// Height of the ancestor.
    pub height: u64,
    /// Its timestamp.
    pub timestamp: u64,
    /// Its compact bits.
    pub bits: u32,
}

/// Bits required for the child of `parent`.
///
/// `ancestor_at(h)` must return the ancestor of `parent` (on the parent's own
/// branch) at height `h <= parent.height`.
pub fn next_required_bits<F>(
    params: &ChainParams,
    parent: RetargetSample,
    ancestor_at: F,
) -> Result<u32, ConsensusError>
where
    F: Fn(u64) -> Option<RetargetSample>,
{
    match params.retarget {
        RetargetRule::None => Ok(parent.bits),
        RetargetRule::Interval => next_bits_interval(params, parent, ancestor_at),
        RetargetRule::Lwma { window } => {
            let first = (parent.height + 1).saturating_sub(window as u64);
            let mut samples = Vec::with_capacity(window);
            for h in first..parent.height {
                samples.push(ancestor_at(h).ok_or(ConsensusError::MissingAncestor(h))?);
            }
            samples.push(parent);
            if samples.len() < 2 {
                return Ok(parent.bits);
            }
            let window: Vec<(u64, u32)> = samples.iter().map(|s| (s.timestamp, s.bits)).collect();
            next_bits_lwma(&window, params.target_spacing_secs, &params.pow_limit()?)
        }
    }
}

fn next_bits_interval<F>(
    params: &ChainParams,
    parent: RetargetSample,
    ancestor_at: F,
) -> Result<u32, ConsensusError>
where
    F: Fn(u64) -> Option<RetargetSample>,
{
    let interval = params.retarget_interval.max(1);
    if (parent.height + 1) % interval != 0 {
        return Ok(parent.bits);
    }

    let first_height = parent.height + 1 - interval;
    let first = ancestor_at(first_height).ok_or(ConsensusError::MissingAncestor(first_height))?;

    let timespan = params.target_timespan_secs().max(1);
    let factor = params.retarget_adjustment_factor.max(1);
    let actual = parent
        .timestamp
        .saturating_sub(first.timestamp)
        .clamp(timespan / factor, timespan.saturating_mul(factor));

    let old_target = bits_to_target(parent.bits)?;
    let mut next = (&old_target * BigUint::from(actual)) / BigUint::from(timespan);
    let limit = params.pow_limit()?;
    if next > limit {
        next = limit;
    }
    if next.is_zero() {
        next = BigUint::from(1u32);
    }

    let bits = target_to_bits(&next);
    debug!(
        height = parent.height + 1,
        actual_timespan = actual,
        old_bits = parent.bits,
        new_bits = bits,
        "difficulty retarget"
    );
    Ok(bits)
}

/// Compute the next difficulty target using a Linear Weighted Moving Average.
///
/// Inputs are `(timestamp, bits)` ordered oldest -> newest, at least two of
/// them. `max_target` caps the easiest allowable target.
pub fn next_bits_lwma(
    window: &[(u64, u32)],
    target_secs: u64,
    max_target: &BigUint,
) -> Result<u32, ConsensusError> {
    let Some(&(_, prev_bits)) = window.last() else {
        return Err(ConsensusError::InvalidHeader("empty retarget window"));
    };
    if window.len() < 2 {
        return Err(ConsensusError::InvalidHeader("retarget window too short"));
    }

    let mut sum_target = BigUint::zero();
    for &(_, bits) in window {
        sum_target += bits_to_target(bits)?;
    }
    let n = window.len() as u64;
    let avg_target = &sum_target / n;

    // Weighted solvetimes, each clamped to [1, 6T] against timestamp games.
    let mut sum_weighted: u128 = 0;
    for (idx, pair) in window.windows(2).enumerate() {
        let solvetime = pair[1].0.saturating_sub(pair[0].0);
        let clamped = solvetime.clamp(1, target_secs.saturating_mul(6));
        let weight = (idx as u128) + 1;
        sum_weighted = sum_weighted.saturating_add((clamped as u128).saturating_mul(weight));
    }

    // k = N*(N+1)*T/2 normalizes the weights.
    let k = n.saturating_mul(n + 1).saturating_mul(target_secs) / 2;
    let k = k.max(1);

    let mut next_target = (&avg_target * BigUint::from(sum_weighted)) / BigUint::from(k);

    let prev_target = bits_to_target(prev_bits)?;
    let max_increase = (&prev_target * LWMA_MAX_EASE_NUM) / LWMA_MAX_EASE_DEN;
    if next_target > max_increase {
        next_target = max_increase;
    }
    if next_target > *max_target {
        next_target = max_target.clone();
    }
    if next_target.is_zero() {
        next_target = BigUint::from(1u32);
    }

    Ok(target_to_bits(&next_target))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EASY: u32 = 0x1f00_ffff;

    fn interval_params() -> ChainParams {
        ChainParams {
            retarget: RetargetRule::Interval,
            retarget_interval: 10,
            target_spacing_secs: 60,
            pow_limit_bits: 0x207f_ffff,
            ..ChainParams::regtest()
        }
    }

    fn chain(len: u64, spacing: u64, bits: u32) -> Vec<RetargetSample> {
        (0..len)
            .map(|h| RetargetSample {
                height: h,
                timestamp: 1_700_000_000 + h * spacing,
                bits,
            })
            .collect()
    }

    fn required(params: &ChainParams, samples: &[RetargetSample]) -> u32 {
        let parent = *samples.last().unwrap();
        next_required_bits(params, parent, |h| samples.get(h as usize).copied()).unwrap()
    }

    #[test]
    fn fixed_rule_repeats_parent() {
        let params = ChainParams::regtest();
        assert_eq!(required(&params, &chain(5, 600, 0x207f_ffff)), 0x207f_ffff);
    }

    #[test]
    fn interval_rule_keeps_bits_between_boundaries() {
        let params = interval_params();
        assert_eq!(required(&params, &chain(5, 1, EASY)), EASY);
    }

    #[test]
    fn interval_rule_hardens_on_fast_blocks() {
        let params = interval_params();
        // Parent at height 9: the child at height 10 is a retarget boundary.
        let samples = chain(10, 30, EASY);
        let next = bits_to_target(required(&params, &samples)).unwrap();
        assert!(next < bits_to_target(EASY).unwrap());
    }

    #[test]
    fn interval_rule_clamps_adjustment() {
        let params = interval_params();
        let samples = chain(10, 60 * 100, EASY);
        let next = bits_to_target(required(&params, &samples)).unwrap();
        let ceiling = bits_to_target(EASY).unwrap() * 4u32;
        assert!(next <= ceiling);
        assert!(next > bits_to_target(EASY).unwrap());
    }

    #[test]
    fn interval_rule_reports_missing_ancestor() {
        let params = interval_params();
        let samples = chain(10, 60, EASY);
        let parent = *samples.last().unwrap();
        let err = next_required_bits(&params, parent, |_| None).unwrap_err();
        assert_eq!(err, ConsensusError::MissingAncestor(0));
    }

    #[test]
    fn lwma_stable_when_on_target() {
        let max_target = bits_to_target(0x207f_ffff).unwrap();
        let window: Vec<(u64, u32)> = chain(45, 60, EASY)
            .iter()
            .map(|s| (s.timestamp, s.bits))
            .collect();
        let next = bits_to_target(next_bits_lwma(&window, 60, &max_target).unwrap()).unwrap();
        let prev = bits_to_target(EASY).unwrap();
        let upper = (&prev * 105u32) / 100u32;
        let lower = (&prev * 95u32) / 100u32;
        assert!(next >= lower && next <= upper, "target should remain near-stable");
    }

    #[test]
    fn lwma_respects_ease_clamp() {
        let prev = bits_to_target(EASY).unwrap();
        let window: Vec<(u64, u32)> = chain(45, 600, EASY)
            .iter()
            .map(|s| (s.timestamp, s.bits))
            .collect();
        let next =
            bits_to_target(next_bits_lwma(&window, 60, &bits_to_target(0x207f_ffff).unwrap()).unwrap())
                .unwrap();
        assert!(next <= (&prev * LWMA_MAX_EASE_NUM) / LWMA_MAX_EASE_DEN);
    }

    #[test]
    fn lwma_genesis_child_inherits_bits() {
        let params = ChainParams {
            retarget: RetargetRule::Lwma { window: 45 },
            ..ChainParams::regtest()
        };
        assert_eq!(required(&params, &chain(1, 60, EASY)), EASY);
    }
}

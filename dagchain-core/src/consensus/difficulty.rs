//! Difficulty rule
//!
//! The required target of a block depends only on its selected parent:
//! it is inherited unchanged except at retarget heights, where it is scaled
//! by how long the previous interval actually took.

use tracing::debug;

use crate::consensus::params::NetworkParams;
use crate::consensus::work::{compact_to_target, hash_meets_target, target_to_compact, U256};
use crate::error::{rule_error, ErrorCode, RuleError};
use crate::hash::Hash256;

/// Whether a block at `height` recomputes the required target
pub fn is_retarget_height(params: &NetworkParams, height: u64) -> bool {
    !params.no_retargeting && height > 0 && height % params.retarget_interval() == 0
}

/// Scale `prev_bits` by the observed timespan of the last interval.
///
/// The timespan is clamped to a factor of the target timespan in either
/// direction and the result never exceeds the proof-of-work limit.
pub fn retarget(params: &NetworkParams, prev_bits: u32, actual_timespan: u64) -> Result<u32, RuleError> {
    let target_timespan = params.target_timespan.as_secs().max(1);
    let factor = params.retarget_adjustment_factor.max(1);
    let min_timespan = (target_timespan / factor).max(1);
    let max_timespan = target_timespan.saturating_mul(factor);
    let clamped = actual_timespan.clamp(min_timespan, max_timespan);

    let pow_limit = compact_to_target(params.pow_limit_bits)?;
    let prev_target = compact_to_target(prev_bits)?;

    let new_target = prev_target
        .checked_mul_u64(clamped)
        .and_then(|scaled| scaled.checked_div(U256::from_u64(target_timespan)))
        .unwrap_or(pow_limit)
        .min(pow_limit);

    let new_bits = target_to_compact(new_target);
    debug!(
        "Retarget: timespan {}s (clamped {}s), bits {:#010x} -> {:#010x}",
        actual_timespan, clamped, prev_bits, new_bits
    );
    Ok(new_bits)
}

/// Declared target must decode and stay within the proof-of-work limit
pub fn check_target_range(params: &NetworkParams, bits: u32) -> Result<U256, RuleError> {
    let target = compact_to_target(bits)?;
    let pow_limit = compact_to_target(params.pow_limit_bits)?;
    if target > pow_limit {
        return Err(rule_error(
            ErrorCode::TargetOutOfRange,
            format!("target {bits:#010x} is above the proof-of-work limit {:#010x}", params.pow_limit_bits),
        ));
    }
    Ok(target)
}

pub fn check_proof_of_work(hash: &Hash256, target: &U256) -> Result<(), RuleError> {
    if !hash_meets_target(hash, target) {
        return Err(rule_error(
            ErrorCode::HighHash,
            format!("block hash {} is higher than target {}", hex::encode(hash), target),
        ));
    }
    Ok(())
}

/// A declared target meets the requirement when it is at least as hard
pub fn check_required_difficulty(declared_bits: u32, required_bits: u32) -> Result<(), RuleError> {
    let declared = compact_to_target(declared_bits)?;
    let required = compact_to_target(required_bits)?;
    if declared > required {
        return Err(rule_error(
            ErrorCode::UnexpectedDifficulty,
            format!(
                "block difficulty {declared_bits:#010x} is easier than required {required_bits:#010x}"
            ),
        ));
    }
    Ok(())
}

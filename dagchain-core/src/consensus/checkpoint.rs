//! Checkpoint rules
//!
//! Checkpoints pin known block hashes at fixed heights. A block claiming a
//! checkpoint height must carry the pinned hash, and blocks at or below the
//! last checkpoint are treated as having valid scripts.

use tracing::debug;

use crate::consensus::params::NetworkParams;
use crate::error::{rule_error, ErrorCode, RuleError};
use crate::hash::Hash256;

/// Reject a block whose hash contradicts the checkpoint at its height
pub fn verify_against_checkpoints(
    params: &NetworkParams,
    height: u64,
    hash: &Hash256,
) -> Result<(), RuleError> {
    if let Some(checkpoint) = params.checkpoint_at(height) {
        if &checkpoint.hash != hash {
            return Err(rule_error(
                ErrorCode::BadCheckpoint,
                format!(
                    "block at height {} has hash {} but checkpoint requires {}",
                    height,
                    hex::encode(hash),
                    hex::encode(checkpoint.hash)
                ),
            ));
        }
        debug!("Block at height {} matches checkpoint", height);
    }
    Ok(())
}

/// Whether script evaluation can be skipped for a block at `height`
pub fn scripts_assumed_valid(params: &NetworkParams, height: u64) -> bool {
    params
        .last_checkpoint()
        .map(|checkpoint| height <= checkpoint.height)
        .unwrap_or(false)
}

//! Main-view selection
//!
//! The main view is the selected-parent chain of the best tip, genesis
//! first. It is rebuilt from scratch whenever the best tip changes and the
//! in-main flags are moved to match.

use std::collections::HashSet;

use crate::dag::index::{BlockIndex, BlockStatus};
use crate::error::{DagError, DagResult};
use crate::hash::Hash256;

/// Selected-parent chain ending at `tip`, oldest first
pub fn compute_main_view(index: &BlockIndex, tip: &Hash256) -> Vec<Hash256> {
    let mut view: Vec<Hash256> = index.selected_ancestors(tip).map(|node| node.hash).collect();
    view.reverse();
    view
}

/// Move the in-main flags from `old` to `new`
pub fn apply_main_view(index: &mut BlockIndex, old: &[Hash256], new: &[Hash256]) {
    let keep: HashSet<&Hash256> = new.iter().collect();
    for hash in old.iter().filter(|h| !keep.contains(h)) {
        if let Some(node) = index.lookup_mut(hash) {
            node.status.remove(BlockStatus::IN_MAIN);
        }
    }
    for hash in new {
        if let Some(node) = index.lookup_mut(hash) {
            node.status.insert(BlockStatus::IN_MAIN);
        }
    }
}

/// Most recent main-view block on the selected-parent chain of `from`
pub fn find_fork(index: &BlockIndex, from: &Hash256) -> DagResult<Hash256> {
    index
        .selected_ancestors(from)
        .find(|node| node.in_main_view())
        .map(|node| node.hash)
        .ok_or_else(|| {
            DagError::Corruption(format!(
                "selected ancestry of {} never meets the main view",
                hex::encode(from)
            ))
        })
}

/// Blocks after `fork` up to and including `to`, oldest first
pub fn side_path(index: &BlockIndex, fork: &Hash256, to: &Hash256) -> Vec<Hash256> {
    let mut path: Vec<Hash256> = index
        .selected_ancestors(to)
        .take_while(|node| &node.hash != fork)
        .map(|node| node.hash)
        .collect();
    path.reverse();
    path
}

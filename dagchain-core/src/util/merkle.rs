//! Merkle tree over transaction ids
//!
//! Leaves are txids; each level combines adjacent pairs with double SHA-256.
//! A trailing odd node is promoted unchanged to the next level, so a list
//! cannot be extended by duplicating its last entry without changing the root.

use crate::hash::{hash_pair, Hash256, ZERO_HASH};

/// A Merkle tree kept level by level
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// All nodes in the tree, leaves first
    levels: Vec<Vec<Hash256>>,
}

impl MerkleTree {
    pub fn new(leaves: &[Hash256]) -> Self {
        if leaves.is_empty() {
            return Self { levels: Vec::new() };
        }

        let mut levels = vec![leaves.to_vec()];
        while let Some(current) = levels.last() {
            if current.len() <= 1 {
                break;
            }
            let next: Vec<Hash256> = current
                .chunks(2)
                .map(|pair| match pair.get(1) {
                    Some(right) => hash_pair(&pair[0], right),
                    None => pair[0],
                })
                .collect();
            levels.push(next);
        }

        Self { levels }
    }

    /// Root hash; the zero hash for an empty tree
    pub fn root(&self) -> Hash256 {
        self.levels
            .last()
            .and_then(|level| level.first().copied())
            .unwrap_or(ZERO_HASH)
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

/// Convenience wrapper returning only the root
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    MerkleTree::new(leaves).root()
}

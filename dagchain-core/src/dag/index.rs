//! Block index
//!
//! An arena of [`BlockNode`]s keyed by hash. Nodes refer to their parents
//! and children by hash only. Every indexed node is valid: blocks are
//! validated before they are inserted and rejected blocks never enter the
//! index.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::consensus::work::U256;
use crate::error::{DagError, DagResult};
use crate::hash::Hash256;
use crate::storage::{node_key, StorageError, WriteBatch};
use crate::types::BlockHeader;

/// Status bits of a block node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStatus(u8);

impl BlockStatus {
    pub const VALID: u8 = 0b01;
    /// Part of the selected main view; derived state, never persisted
    pub const IN_MAIN: u8 = 0b10;

    pub fn contains(&self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    pub fn insert(&mut self, flag: u8) {
        self.0 |= flag;
    }

    pub fn remove(&mut self, flag: u8) {
        self.0 &= !flag;
    }

    fn persisted(self) -> Self {
        BlockStatus(self.0 & !Self::IN_MAIN)
    }
}

/// Metadata of one block in the DAG
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockNode {
    pub hash: Hash256,
    pub header: BlockHeader,
    /// Parent with the most cumulative work; ties go to the smaller hash
    pub selected_parent: Option<Hash256>,
    pub height: u64,
    /// Work of the selected-parent ancestry plus this block's own work
    pub chain_work: U256,
    /// Compact target this block had to meet
    pub required_bits: u32,
    pub tx_count: u32,
    pub status: BlockStatus,
}

impl BlockNode {
    pub fn new(
        header: BlockHeader,
        selected_parent: Option<Hash256>,
        chain_work: U256,
        required_bits: u32,
        tx_count: u32,
    ) -> Self {
        Self {
            hash: header.hash(),
            height: header.height,
            header,
            selected_parent,
            chain_work,
            required_bits,
            tx_count,
            status: BlockStatus::default(),
        }
    }

    pub fn parents(&self) -> &[Hash256] {
        &self.header.parents
    }

    pub fn mark_valid(&mut self) {
        self.status.insert(BlockStatus::VALID);
    }

    pub fn is_valid(&self) -> bool {
        self.status.contains(BlockStatus::VALID)
    }

    pub fn in_main_view(&self) -> bool {
        self.status.contains(BlockStatus::IN_MAIN)
    }

    /// Whether `self` beats `other` for tip selection: more cumulative
    /// work, then the lexicographically smaller hash
    pub fn is_better_than(&self, other: &BlockNode) -> bool {
        match self.chain_work.cmp(&other.chain_work) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.hash < other.hash,
        }
    }

    /// Stage this node's durable record into `batch`
    pub fn persist(&self, batch: &mut WriteBatch) -> Result<(), StorageError> {
        let mut record = self.clone();
        record.status = record.status.persisted();
        batch.put_record(node_key(&self.hash), &record)
    }
}

/// Arena of block nodes plus the child links and the tip set
#[derive(Debug, Default)]
pub struct BlockIndex {
    nodes: HashMap<Hash256, BlockNode>,
    children: HashMap<Hash256, Vec<Hash256>>,
    tips: HashSet<Hash256>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validated node whose parents are all indexed.
    ///
    /// Re-inserting an identical node is a no-op; a different node under a
    /// known hash is a conflict.
    pub fn insert(&mut self, node: BlockNode) -> DagResult<()> {
        if let Some(existing) = self.nodes.get(&node.hash) {
            if existing.header == node.header && existing.chain_work == node.chain_work {
                return Ok(());
            }
            return Err(DagError::IndexConflict(node.hash));
        }
        if !node.is_valid() {
            return Err(DagError::Corruption(format!(
                "refusing to index unvalidated block {}",
                hex::encode(node.hash)
            )));
        }
        if let Some(missing) = node.parents().iter().find(|p| !self.nodes.contains_key(*p)) {
            return Err(DagError::Corruption(format!(
                "block {} references unindexed parent {}",
                hex::encode(node.hash),
                hex::encode(missing)
            )));
        }

        for parent in node.parents() {
            self.children.entry(*parent).or_default().push(node.hash);
            self.tips.remove(parent);
        }
        self.tips.insert(node.hash);
        self.nodes.insert(node.hash, node);
        Ok(())
    }

    pub fn lookup(&self, hash: &Hash256) -> Option<&BlockNode> {
        self.nodes.get(hash)
    }

    pub(crate) fn lookup_mut(&mut self, hash: &Hash256) -> Option<&mut BlockNode> {
        self.nodes.get_mut(hash)
    }

    /// Like `lookup`, for hashes the caller knows must be indexed
    pub fn expect_node(&self, hash: &Hash256) -> DagResult<&BlockNode> {
        self.nodes.get(hash).ok_or_else(|| {
            DagError::Corruption(format!("block {} missing from index", hex::encode(hash)))
        })
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn children(&self, hash: &Hash256) -> &[Hash256] {
        self.children.get(hash).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Blocks without known children, sorted for deterministic iteration
    pub fn tips(&self) -> Vec<Hash256> {
        let mut tips: Vec<Hash256> = self.tips.iter().copied().collect();
        tips.sort();
        tips
    }

    /// The tip chosen by the selection rule
    pub fn best_tip(&self) -> Option<&BlockNode> {
        self.tips
            .iter()
            .filter_map(|hash| self.nodes.get(hash))
            .fold(None, |best: Option<&BlockNode>, node| match best {
                Some(current) if !node.is_better_than(current) => Some(current),
                _ => Some(node),
            })
    }

    /// Pick the selected parent among `parents`
    pub fn select_parent(&self, parents: &[Hash256]) -> Option<&BlockNode> {
        parents
            .iter()
            .filter_map(|hash| self.nodes.get(hash))
            .fold(None, |best: Option<&BlockNode>, node| match best {
                Some(current) if !node.is_better_than(current) => Some(current),
                _ => Some(node),
            })
    }

    /// Walk the selected-parent chain starting at (and including) `hash`
    pub fn selected_ancestors<'a>(&'a self, hash: &Hash256) -> SelectedAncestors<'a> {
        SelectedAncestors {
            index: self,
            next: self.nodes.get(hash),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Iterator over a selected-parent chain, newest first
pub struct SelectedAncestors<'a> {
    index: &'a BlockIndex,
    next: Option<&'a BlockNode>,
}

impl<'a> Iterator for SelectedAncestors<'a> {
    type Item = &'a BlockNode;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current
            .selected_parent
            .as_ref()
            .and_then(|parent| self.index.nodes.get(parent));
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(parents: Vec<Hash256>, nonce: u32, work: u64) -> BlockNode {
        let header = BlockHeader::new(1, parents.clone(), [0u8; 32], 0, 0x207fffff, nonce, 0);
        let mut node = BlockNode::new(header, parents.first().copied(), U256::from_u64(work), 0x207fffff, 1);
        node.mark_valid();
        node
    }

    #[test]
    fn test_tips_follow_children() {
        let mut index = BlockIndex::new();
        let genesis = node(vec![], 0, 2);
        let a = node(vec![genesis.hash], 1, 4);
        let b = node(vec![genesis.hash], 2, 4);
        let merge = node(vec![a.hash, b.hash], 3, 6);

        index.insert(genesis.clone()).unwrap();
        assert_eq!(index.tips(), vec![genesis.hash]);
        index.insert(a.clone()).unwrap();
        index.insert(b.clone()).unwrap();
        assert_eq!(index.tips().len(), 2);
        index.insert(merge.clone()).unwrap();
        assert_eq!(index.tips(), vec![merge.hash]);
        assert_eq!(index.children(&genesis.hash).len(), 2);
    }

    #[test]
    fn test_conflicting_insert_is_rejected() {
        let mut index = BlockIndex::new();
        let genesis = node(vec![], 0, 2);
        index.insert(genesis.clone()).unwrap();
        index.insert(genesis.clone()).unwrap();

        let mut altered = genesis.clone();
        altered.chain_work = U256::from_u64(99);
        assert!(matches!(index.insert(altered), Err(DagError::IndexConflict(_))));
    }

    #[test]
    fn test_unvalidated_or_orphaned_node_is_refused() {
        let mut index = BlockIndex::new();
        let mut genesis = node(vec![], 0, 2);
        genesis.status = BlockStatus::default();
        assert!(matches!(index.insert(genesis), Err(DagError::Corruption(_))));

        let dangling = node(vec![[9u8; 32]], 1, 4);
        assert!(matches!(index.insert(dangling), Err(DagError::Corruption(_))));
    }

    #[test]
    fn test_tie_break_prefers_smaller_hash() {
        let a = node(vec![], 1, 10);
        let b = node(vec![], 2, 10);
        let (small, large) = if a.hash < b.hash { (a, b) } else { (b, a) };
        assert!(small.is_better_than(&large));
        assert!(!large.is_better_than(&small));
    }

    #[test]
    fn test_persisted_record_drops_main_flag() {
        let mut genesis = node(vec![], 0, 2);
        genesis.status.insert(BlockStatus::IN_MAIN);
        let mut batch = WriteBatch::new();
        genesis.persist(&mut batch).unwrap();

        let value = match &batch.operations()[0] {
            crate::storage::BatchOp::Put { value, .. } => value.clone(),
            other => panic!("unexpected op {:?}", other),
        };
        let stored: BlockNode = bincode::deserialize(&value).unwrap();
        assert!(stored.is_valid());
        assert!(!stored.in_main_view());
    }

    #[test]
    fn test_selected_ancestors_walk() {
        let mut index = BlockIndex::new();
        let genesis = node(vec![], 0, 2);
        let a = node(vec![genesis.hash], 1, 4);
        let b = node(vec![a.hash], 2, 6);
        for n in [&genesis, &a, &b] {
            index.insert(n.clone()).unwrap();
        }
        let walked: Vec<Hash256> = index.selected_ancestors(&b.hash).map(|n| n.hash).collect();
        assert_eq!(walked, vec![b.hash, a.hash, genesis.hash]);
    }
}

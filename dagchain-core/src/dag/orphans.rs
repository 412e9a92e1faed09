//! Orphan pool
//!
//! Holds sanity-checked blocks that reference parents not yet in the index.
//! Each orphan tracks which parents are still missing; once the last one is
//! accepted the orphan is handed back for processing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::hash::{short_hex, Hash256};
use crate::types::Block;

/// Default cap on pooled orphans
pub const DEFAULT_MAX_ORPHANS: usize = 100;

/// Default age after which an orphan is dropped
pub const DEFAULT_ORPHAN_EXPIRY: Duration = Duration::from_secs(60 * 60);

struct OrphanEntry {
    block: Block,
    missing: HashSet<Hash256>,
    added: Instant,
}

pub struct OrphanPool {
    entries: HashMap<Hash256, OrphanEntry>,
    /// Missing parent hash -> orphans waiting on it
    by_parent: HashMap<Hash256, Vec<Hash256>>,
    /// Insertion order, oldest first
    order: VecDeque<Hash256>,
    max_orphans: usize,
}

impl OrphanPool {
    pub fn new(max_orphans: usize) -> Self {
        Self {
            entries: HashMap::new(),
            by_parent: HashMap::new(),
            order: VecDeque::new(),
            max_orphans,
        }
    }

    /// Pool `block`, waiting on `missing` parents.
    ///
    /// Returns false (and stores nothing) when `missing` is empty, the block
    /// is already pooled or the pool is configured with zero capacity.
    pub fn add(&mut self, block: Block, missing: &[Hash256]) -> bool {
        let hash = block.hash();
        if missing.is_empty() || self.entries.contains_key(&hash) || self.max_orphans == 0 {
            return false;
        }

        while self.entries.len() >= self.max_orphans {
            match self.order.front().copied() {
                Some(oldest) => {
                    warn!("Orphan pool full, evicting {}", short_hex(&oldest));
                    self.remove(&oldest);
                }
                None => break,
            }
        }

        let missing: HashSet<Hash256> = missing.iter().copied().collect();
        for parent in &missing {
            self.by_parent.entry(*parent).or_default().push(hash);
        }
        debug!(
            "Added orphan {} waiting on {} parent(s), pool size {}",
            short_hex(&hash),
            missing.len(),
            self.entries.len() + 1
        );
        self.entries.insert(
            hash,
            OrphanEntry {
                block,
                missing,
                added: Instant::now(),
            },
        );
        self.order.push_back(hash);
        true
    }

    /// `parent` was accepted: return the orphans it was the last missing
    /// parent of, removing them from the pool
    pub fn resolve(&mut self, parent: &Hash256) -> Vec<Block> {
        let Some(waiting) = self.by_parent.remove(parent) else {
            return Vec::new();
        };

        let mut ready = Vec::new();
        for hash in waiting {
            let now_complete = match self.entries.get_mut(&hash) {
                Some(entry) => {
                    entry.missing.remove(parent);
                    entry.missing.is_empty()
                }
                None => false,
            };
            if now_complete {
                if let Some(block) = self.remove(&hash) {
                    ready.push(block);
                }
            }
        }
        ready
    }

    /// Drop orphans that have been pooled for at least `max_age`
    pub fn expire_older_than(&mut self, max_age: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<Hash256> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.added + max_age <= now)
            .map(|(hash, _)| *hash)
            .collect();

        for hash in &expired {
            self.remove(hash);
        }
        if !expired.is_empty() {
            debug!("Expired {} orphan block(s)", expired.len());
        }
        expired.len()
    }

    /// Remove every orphan whose missing parents all satisfy `is_known`,
    /// oldest first. Picks up orphans put back after a failed connect.
    pub fn take_satisfied<F>(&mut self, is_known: F) -> Vec<Block>
    where
        F: Fn(&Hash256) -> bool,
    {
        let ready: Vec<Hash256> = self
            .order
            .iter()
            .filter(|hash| {
                self.entries
                    .get(*hash)
                    .map_or(false, |entry| entry.missing.iter().all(|parent| is_known(parent)))
            })
            .copied()
            .collect();
        ready.iter().filter_map(|hash| self.remove(hash)).collect()
    }

    /// Remove a pooled orphan regardless of what it waits on
    pub fn take(&mut self, hash: &Hash256) -> Option<Block> {
        self.remove(hash)
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.entries.contains_key(hash)
    }

    /// Parents the pooled orphan is still waiting on, sorted
    pub fn missing_parents(&self, hash: &Hash256) -> Option<Vec<Hash256>> {
        self.entries.get(hash).map(|entry| {
            let mut missing: Vec<Hash256> = entry.missing.iter().copied().collect();
            missing.sort();
            missing
        })
    }

    /// Deepest pooled ancestor of `hash`, following orphan parents. The
    /// parents of the result are what a syncing peer still has to supply.
    pub fn orphan_root(&self, hash: &Hash256) -> Hash256 {
        let mut root = *hash;
        let mut seen = HashSet::new();
        while seen.insert(root) {
            let next = self
                .entries
                .get(&root)
                .and_then(|entry| {
                    let mut parents = entry.block.header.parents.clone();
                    parents.sort();
                    parents.into_iter().find(|p| self.entries.contains_key(p))
                });
            match next {
                Some(parent) => root = parent,
                None => break,
            }
        }
        root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove(&mut self, hash: &Hash256) -> Option<Block> {
        let entry = self.entries.remove(hash)?;
        for parent in &entry.missing {
            if let Some(waiting) = self.by_parent.get_mut(parent) {
                waiting.retain(|h| h != hash);
                if waiting.is_empty() {
                    self.by_parent.remove(parent);
                }
            }
        }
        self.order.retain(|h| h != hash);
        Some(entry.block)
    }
}

impl Default for OrphanPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ORPHANS)
    }
}

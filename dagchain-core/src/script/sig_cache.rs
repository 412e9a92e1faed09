//! Signature verification cache
//!
//! Remembers (sighash, signature, public key) triples that already verified
//! so blocks re-processed during a reorganization, or transactions seen
//! twice, skip the elliptic curve work. Entries are evicted at random once
//! the cache is full.

use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use crate::hash::Hash256;

/// Default cache capacity (number of entries)
pub const DEFAULT_SIG_CACHE_CAPACITY: usize = 50_000;

/// A signature that verified against a digest and public key
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
pub struct SigCacheKey {
    pub sighash: Hash256,
    pub signature: Vec<u8>,
    pub pubkey: Vec<u8>,
}

impl SigCacheKey {
    pub fn new(sighash: Hash256, signature: &[u8], pubkey: &[u8]) -> Self {
        Self {
            sighash,
            signature: signature.to_vec(),
            pubkey: pubkey.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SigCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: usize,
}

impl SigCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Entries {
    positions: HashMap<SigCacheKey, usize>,
    keys: Vec<SigCacheKey>,
}

/// Bounded set of verified signatures
pub struct SigCache {
    entries: RwLock<Entries>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SigCache {
    /// A cache holding at most `max_entries`; zero disables caching
    pub fn new(max_entries: usize) -> Self {
        debug!("Creating signature cache with capacity {}", max_entries);
        Self {
            entries: RwLock::new(Entries::default()),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn exists(&self, key: &SigCacheKey) -> bool {
        let found = self.entries.read().positions.contains_key(key);
        if found {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!("Signature cache hit for sighash {}", hex::encode(&key.sighash[..8]));
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Record a verified signature, evicting a random entry when full
    pub fn add(&self, key: SigCacheKey) {
        if self.max_entries == 0 {
            return;
        }

        let mut entries = self.entries.write();
        if entries.positions.contains_key(&key) {
            return;
        }

        if entries.keys.len() >= self.max_entries {
            let victim = rand::thread_rng().gen_range(0..entries.keys.len());
            let removed = entries.keys.swap_remove(victim);
            entries.positions.remove(&removed);
            if let Some(moved) = entries.keys.get(victim).cloned() {
                entries.positions.insert(moved, victim);
            }
        }

        let position = entries.keys.len();
        entries.keys.push(key.clone());
        entries.positions.insert(key, position);
    }

    pub fn len(&self) -> usize {
        self.entries.read().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn stats(&self) -> SigCacheStats {
        SigCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.len(),
        }
    }
}

impl Default for SigCache {
    fn default() -> Self {
        Self::new(DEFAULT_SIG_CACHE_CAPACITY)
    }
}

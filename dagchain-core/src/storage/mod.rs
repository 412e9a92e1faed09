//! Persistent key-value storage for DAG state
//!
//! All engine state lives in a single keyspace partitioned by short prefixes.
//! Writes are staged into a [`WriteBatch`] and applied atomically, so one
//! `process_block` call either lands entirely or not at all.

pub mod memory;
pub mod sled_store;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::hash::Hash256;
use crate::types::OutPoint;

pub use memory::MemoryStore;
pub use sled_store::{SledConfig, SledStore};

const NODE_PREFIX: &[u8] = b"n/";
const BODY_PREFIX: &[u8] = b"b/";
const UTXO_PREFIX: &[u8] = b"u/";
const JOURNAL_PREFIX: &[u8] = b"j/";
const TIP_KEY: &[u8] = b"m/tip";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("Corrupt record under key {key}: {reason}")]
    CorruptRecord { key: String, reason: String },
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Minimal ordered key-value store the engine persists into
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// All entries whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Apply every operation of `batch` atomically
    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError>;

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Ordered list of writes applied as a unit
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    operations: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.operations.push(BatchOp::Put { key, value });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.operations.push(BatchOp::Delete { key });
    }

    /// Encode `record` with bincode and stage it under `key`
    pub fn put_record<T: Serialize>(&mut self, key: Vec<u8>, record: &T) -> Result<(), StorageError> {
        let value = bincode::serialize(record)?;
        self.put(key, value);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn operations(&self) -> &[BatchOp] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<BatchOp> {
        self.operations
    }
}

/// Fetch and decode a bincode record
pub fn get_record<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &[u8],
) -> Result<Option<T>, StorageError> {
    match store.get(key)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

fn prefixed(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + suffix.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(suffix);
    key
}

pub fn node_key(hash: &Hash256) -> Vec<u8> {
    prefixed(NODE_PREFIX, hash)
}

pub fn node_prefix() -> &'static [u8] {
    NODE_PREFIX
}

pub fn body_key(hash: &Hash256) -> Vec<u8> {
    prefixed(BODY_PREFIX, hash)
}

pub fn utxo_key(outpoint: &OutPoint) -> Vec<u8> {
    let mut key = prefixed(UTXO_PREFIX, &outpoint.txid);
    key.extend_from_slice(&outpoint.index.to_be_bytes());
    key
}

pub fn utxo_prefix() -> &'static [u8] {
    UTXO_PREFIX
}

pub fn journal_key(hash: &Hash256) -> Vec<u8> {
    prefixed(JOURNAL_PREFIX, hash)
}

pub fn tip_key() -> &'static [u8] {
    TIP_KEY
}

/// Recover the outpoint encoded in a `u/` key
pub fn outpoint_from_utxo_key(key: &[u8]) -> Option<OutPoint> {
    let rest = key.strip_prefix(UTXO_PREFIX)?;
    if rest.len() != 36 {
        return None;
    }
    let mut txid = [0u8; 32];
    txid.copy_from_slice(&rest[..32]);
    let mut index = [0u8; 4];
    index.copy_from_slice(&rest[32..]);
    Some(OutPoint::new(txid, u32::from_be_bytes(index)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utxo_key_round_trip() {
        let outpoint = OutPoint::new([9u8; 32], 7);
        let key = utxo_key(&outpoint);
        assert!(key.starts_with(utxo_prefix()));
        assert_eq!(outpoint_from_utxo_key(&key), Some(outpoint));
        assert_eq!(outpoint_from_utxo_key(b"u/short"), None);
    }

    #[test]
    fn test_prefixes_do_not_overlap() {
        let hash = [1u8; 32];
        assert_ne!(node_key(&hash), body_key(&hash));
        assert_ne!(body_key(&hash), journal_key(&hash));
    }

    #[test]
    fn test_batch_records_operations_in_order() {
        let mut batch = WriteBatch::new();
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.delete(b"a".to_vec());
        assert_eq!(batch.len(), 2);
        assert!(matches!(batch.operations()[1], BatchOp::Delete { .. }));
    }
}

use std::path::Path;
use tracing::debug;

use super::{BatchOp, KvStore, StorageError, WriteBatch};

const STATE_TREE: &str = "dag_state";

/// Tuning knobs passed through to sled
#[derive(Debug, Clone)]
pub struct SledConfig {
    /// Page cache size in bytes
    pub cache_capacity: u64,
    /// Background flush interval; `None` flushes only on demand
    pub flush_every_ms: Option<u64>,
}

impl Default for SledConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 256 * 1024 * 1024, // 256MB
            flush_every_ms: Some(1000),
        }
    }
}

/// sled-backed store; every batch is applied with `Tree::apply_batch`
pub struct SledStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P, config: &SledConfig) -> Result<Self, StorageError> {
        let db = sled::Config::new()
            .path(path.as_ref())
            .cache_capacity(config.cache_capacity)
            .flush_every_ms(config.flush_every_ms)
            .open()?;
        debug!("Opened sled store at {}", path.as_ref().display());
        Self::from_db(db)
    }

    /// Store that is deleted when dropped
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree(STATE_TREE)?;
        Ok(Self { db, tree })
    }

    pub fn size_on_disk(&self) -> Result<u64, StorageError> {
        Ok(self.db.size_on_disk()?)
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.tree.get(key)?.map(|value| value.to_vec()))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        self.tree
            .scan_prefix(prefix)
            .map(|entry| {
                let (key, value) = entry?;
                Ok((key.to_vec(), value.to_vec()))
            })
            .collect()
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut sled_batch = sled::Batch::default();
        for op in batch.into_operations() {
            match op {
                BatchOp::Put { key, value } => sled_batch.insert(key, value),
                BatchOp::Delete { key } => sled_batch.remove(key),
            }
        }
        self.tree.apply_batch(sled_batch)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.tree.flush()?;
        Ok(())
    }
}

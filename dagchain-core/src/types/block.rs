use crate::hash::{hash256, Hash256};
use crate::types::transaction::Transaction;
use crate::util::merkle::merkle_root;
use serde::{Deserialize, Serialize};
use std::fmt;

/// BlockHeader structure representing the header of a block in the DAG
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block version
    pub version: u32,

    /// Hashes of the parent blocks (empty only for genesis)
    pub parents: Vec<Hash256>,

    /// Merkle root of the transactions in this block
    pub merkle_root: Hash256,

    /// Timestamp of the block (seconds since Unix epoch)
    pub timestamp: u64,

    /// Target difficulty bits
    pub bits: u32,

    /// Nonce used for proof of work
    pub nonce: u32,

    /// Declared height: 1 + the greatest parent height
    pub height: u64,
}

impl BlockHeader {
    /// Create a new block header
    pub fn new(
        version: u32,
        parents: Vec<Hash256>,
        merkle_root: Hash256,
        timestamp: u64,
        bits: u32,
        nonce: u32,
        height: u64,
    ) -> Self {
        Self {
            version,
            parents,
            merkle_root,
            timestamp,
            bits,
            nonce,
            height,
        }
    }

    /// Calculate the hash of this block header
    pub fn hash(&self) -> Hash256 {
        hash256(&self.serialize_for_hash())
    }

    /// Serialize this header for hashing
    fn serialize_for_hash(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(96 + self.parents.len() * 32);

        buffer.extend_from_slice(&self.version.to_le_bytes());
        buffer.extend_from_slice(&(self.parents.len() as u32).to_le_bytes());
        for parent in &self.parents {
            buffer.extend_from_slice(parent);
        }
        buffer.extend_from_slice(&self.merkle_root);
        buffer.extend_from_slice(&self.timestamp.to_le_bytes());
        buffer.extend_from_slice(&self.bits.to_le_bytes());
        buffer.extend_from_slice(&self.nonce.to_le_bytes());
        buffer.extend_from_slice(&self.height.to_le_bytes());

        buffer
    }

    pub fn is_genesis(&self) -> bool {
        self.parents.is_empty()
    }
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BlockHeader {{ version: {}, parents: {}, merkle_root: {}, timestamp: {}, bits: {:#x}, nonce: {}, height: {} }}",
            self.version,
            self.parents.len(),
            hex::encode(self.merkle_root),
            self.timestamp,
            self.bits,
            self.nonce,
            self.height
        )
    }
}

/// A full block: header plus transactions, the first of which is the coinbase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn parents(&self) -> &[Hash256] {
        &self.header.parents
    }

    /// Merkle root over the txids of this block's transactions
    pub fn compute_merkle_root(&self) -> Hash256 {
        let txids: Vec<Hash256> = self.transactions.iter().map(|tx| tx.txid()).collect();
        merkle_root(&txids)
    }

    /// Encoded size used for the block size limit
    pub fn serialized_size(&self) -> u64 {
        bincode::serialized_size(self).unwrap_or(u64::MAX)
    }
}

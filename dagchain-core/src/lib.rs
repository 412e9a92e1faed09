// Dagchain core library
// Block-DAG validation, tip selection and persistent state

pub mod consensus;
pub mod dag;
pub mod error;
pub mod hash;
pub mod script;
pub mod storage;
pub mod types;
pub mod util;

// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export commonly used types
pub use crate::consensus::{MedianTime, MedianTimeSource, Network, NetworkParams};
pub use crate::dag::{
    BehaviorFlags, BestSnapshot, BlockDag, DagConfig, Notification, ProcessOutcome,
};
pub use crate::error::{DagError, DagResult, ErrorCode, RuleError};
pub use crate::hash::Hash256;
pub use crate::script::{SigCache, StandardScriptVerifier};
pub use crate::storage::{KvStore, MemoryStore, SledConfig, SledStore, StorageError};
pub use crate::types::{Block, BlockHeader, OutPoint, Transaction, TransactionInput, TransactionOutput};

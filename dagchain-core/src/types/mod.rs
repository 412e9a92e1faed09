pub mod block;
pub mod transaction;

// Re-export main types
pub use block::{Block, BlockHeader};
pub use transaction::{OutPoint, Transaction, TransactionInput, TransactionOutput};

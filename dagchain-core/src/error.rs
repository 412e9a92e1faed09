//! Error types for the block-DAG engine
//!
//! Consensus rule violations are reported as [`RuleError`] values: they are
//! ordinary results, never panics, and the engine stays usable after any of
//! them. [`DagError`] additionally carries the fatal classes (storage
//! failures, index corruption) that mean local state can no longer be trusted.

use std::fmt;
use thiserror::Error;

use crate::hash::Hash256;
use crate::storage::StorageError;

/// Stable identifier for every way a block or transaction can be rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A block with this hash is already known with a different body
    DuplicateBlock,
    /// Serialized block exceeds the maximum allowed size
    BlockTooBig,
    /// Block carries more transactions than allowed
    TooManyTransactions,
    /// Block has no transactions at all
    NoTransactions,
    /// The first transaction is not a coinbase
    FirstTxNotCoinbase,
    /// More than one coinbase transaction in a block
    MultipleCoinbases,
    /// Non-genesis block without parent references
    NoParents,
    /// The same parent hash is referenced twice
    DuplicateParents,
    /// More parent references than the protocol allows
    TooManyParents,
    /// Two transactions in the block share a txid
    DuplicateTx,
    /// Coinbase signature script length out of range
    BadCoinbaseScriptLen,
    /// Transaction without inputs
    NoTxInputs,
    /// Transaction without outputs
    NoTxOutputs,
    /// Output value (or the sum of outputs) out of range
    BadTxOutValue,
    /// A transaction spends the same outpoint twice
    DuplicateTxInputs,
    /// A non-coinbase input references the null outpoint
    BadTxInput,
    /// Timestamp is not after the median time of its ancestry
    TimeTooOld,
    /// Timestamp is too far ahead of the adjusted network time
    TimeTooNew,
    /// Block hash does not satisfy its declared target
    HighHash,
    /// Compact target is malformed or above the proof-of-work limit
    TargetOutOfRange,
    /// Declared target is easier than the difficulty rule requires
    UnexpectedDifficulty,
    /// Merkle root does not commit to the transaction list
    BadMerkleRoot,
    /// Two transactions in the selected view spend the same output
    DoubleSpend,
    /// Referenced output does not exist or is already spent
    MissingOrSpentInput,
    /// Transaction would replace an output that is still unspent
    OverwriteTx,
    /// Unlocking script failed to satisfy the locking condition
    ScriptValidation,
    /// Coinbase output spent before reaching maturity
    ImmatureCoinbaseSpend,
    /// Coinbase pays more than subsidy plus fees
    BadCoinbaseValue,
    /// Transaction spends more than its inputs provide
    SpendTooHigh,
    /// Declared height differs from 1 + max(parent heights)
    HeightMismatch,
    /// Block conflicts with a known checkpoint
    BadCheckpoint,
}

impl ErrorCode {
    /// Stable string name, suitable for logs and external assertions
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DuplicateBlock => "ErrDuplicateBlock",
            ErrorCode::BlockTooBig => "ErrBlockTooBig",
            ErrorCode::TooManyTransactions => "ErrTooManyTransactions",
            ErrorCode::NoTransactions => "ErrNoTransactions",
            ErrorCode::FirstTxNotCoinbase => "ErrFirstTxNotCoinbase",
            ErrorCode::MultipleCoinbases => "ErrMultipleCoinbases",
            ErrorCode::NoParents => "ErrNoParents",
            ErrorCode::DuplicateParents => "ErrDuplicateParents",
            ErrorCode::TooManyParents => "ErrTooManyParents",
            ErrorCode::DuplicateTx => "ErrDuplicateTx",
            ErrorCode::BadCoinbaseScriptLen => "ErrBadCoinbaseScriptLen",
            ErrorCode::NoTxInputs => "ErrNoTxInputs",
            ErrorCode::NoTxOutputs => "ErrNoTxOutputs",
            ErrorCode::BadTxOutValue => "ErrBadTxOutValue",
            ErrorCode::DuplicateTxInputs => "ErrDuplicateTxInputs",
            ErrorCode::BadTxInput => "ErrBadTxInput",
            ErrorCode::TimeTooOld => "ErrTimeTooOld",
            ErrorCode::TimeTooNew => "ErrTimeTooNew",
            ErrorCode::HighHash => "ErrHighHash",
            ErrorCode::TargetOutOfRange => "ErrTargetOutOfRange",
            ErrorCode::UnexpectedDifficulty => "ErrUnexpectedDifficulty",
            ErrorCode::BadMerkleRoot => "ErrBadMerkleRoot",
            ErrorCode::DoubleSpend => "ErrDoubleSpend",
            ErrorCode::MissingOrSpentInput => "ErrMissingTxOut",
            ErrorCode::OverwriteTx => "ErrOverwriteTx",
            ErrorCode::ScriptValidation => "ErrScriptValidation",
            ErrorCode::ImmatureCoinbaseSpend => "ErrImmatureSpend",
            ErrorCode::BadCoinbaseValue => "ErrBadCoinbaseValue",
            ErrorCode::SpendTooHigh => "ErrSpendTooHigh",
            ErrorCode::HeightMismatch => "ErrHeightMismatch",
            ErrorCode::BadCheckpoint => "ErrBadCheckpoint",
        }
    }

    /// Whether the code describes a malformed block or transaction, i.e. a
    /// failure detectable without any chain context
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ErrorCode::BlockTooBig
                | ErrorCode::TooManyTransactions
                | ErrorCode::NoTransactions
                | ErrorCode::FirstTxNotCoinbase
                | ErrorCode::MultipleCoinbases
                | ErrorCode::NoParents
                | ErrorCode::DuplicateParents
                | ErrorCode::TooManyParents
                | ErrorCode::DuplicateTx
                | ErrorCode::BadCoinbaseScriptLen
                | ErrorCode::NoTxInputs
                | ErrorCode::NoTxOutputs
                | ErrorCode::BadTxOutValue
                | ErrorCode::DuplicateTxInputs
                | ErrorCode::BadTxInput
                | ErrorCode::BadMerkleRoot
                | ErrorCode::HighHash
                | ErrorCode::TargetOutOfRange
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A consensus rule violation: an error code plus a human readable message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct RuleError {
    pub code: ErrorCode,
    pub message: String,
}

impl RuleError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Shorthand used by the validation stages
pub(crate) fn rule_error(code: ErrorCode, message: impl Into<String>) -> RuleError {
    RuleError::new(code, message)
}

/// Errors surfaced by the block-DAG engine
#[derive(Debug, Error)]
pub enum DagError {
    /// Recoverable consensus violation
    #[error("Rule violation: {0}")]
    Rule(#[from] RuleError),

    /// Persistent store failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The block index contradicts itself
    #[error("Block index corruption: {0}")]
    Corruption(String),

    /// A node was inserted twice with different content
    #[error("Conflicting block index entry for {}", hex::encode(.0))]
    IndexConflict(Hash256),

    /// The persisted DAG was created for another network
    #[error("Genesis block mismatch: store has {stored}, parameters expect {expected}")]
    GenesisMismatch { stored: String, expected: String },
}

impl DagError {
    /// Rule violations are recoverable; everything else is fatal
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DagError::Rule(_))
    }
}

/// Result type for engine operations
pub type DagResult<T> = Result<T, DagError>;

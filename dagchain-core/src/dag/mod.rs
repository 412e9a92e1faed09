//! Block-DAG engine
//!
//! [`BlockDag`] owns the block index, orphan pool and selected main view and
//! exposes the single `process_block` entry point plus read-only queries.

pub mod engine;
pub mod index;
pub mod orphans;
pub mod selection;
pub mod utxo;
pub mod validate;

use std::fmt;
use std::ops::BitOr;

use crate::error::RuleError;
use crate::hash::Hash256;

pub use engine::{BestSnapshot, BlockDag, DagConfig, Subscriber};
pub use index::{BlockIndex, BlockNode, BlockStatus};
pub use orphans::OrphanPool;
pub use utxo::{SpendJournal, SpentOutput, UtxoEntry, UtxoView};

/// Processing options for `process_block`. Production callers pass `NONE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BehaviorFlags(u32);

impl BehaviorFlags {
    pub const NONE: BehaviorFlags = BehaviorFlags(0);
    /// Skip the hash-below-target check (tests only)
    pub const NO_POW_CHECK: BehaviorFlags = BehaviorFlags(1 << 0);
    /// Skip both timestamp bounds (tests only)
    pub const NO_TIMESTAMP_CHECK: BehaviorFlags = BehaviorFlags(1 << 1);

    pub fn contains(&self, other: BehaviorFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for BehaviorFlags {
    type Output = BehaviorFlags;

    fn bitor(self, rhs: BehaviorFlags) -> BehaviorFlags {
        BehaviorFlags(self.0 | rhs.0)
    }
}

/// Result of submitting a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Parents are unknown; the block waits in the orphan pool
    Orphan { missing: Vec<Hash256> },
    /// Accepted and part of the selected main view
    MainView,
    /// Accepted but not on the selected main view
    SideBlock,
    /// Violates a consensus rule; nothing was stored
    Rejected(RuleError),
}

impl ProcessOutcome {
    pub fn is_main_view(&self) -> bool {
        matches!(self, ProcessOutcome::MainView)
    }

    pub fn is_orphan(&self) -> bool {
        matches!(self, ProcessOutcome::Orphan { .. })
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ProcessOutcome::MainView | ProcessOutcome::SideBlock)
    }

    pub fn rule_error(&self) -> Option<&RuleError> {
        match self {
            ProcessOutcome::Rejected(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessOutcome::Orphan { missing } => write!(f, "orphan (missing {} parent(s))", missing.len()),
            ProcessOutcome::MainView => f.write_str("accepted (main view)"),
            ProcessOutcome::SideBlock => f.write_str("accepted (side block)"),
            ProcessOutcome::Rejected(err) => write!(f, "rejected: {}", err),
        }
    }
}

/// Events delivered to subscribers after each commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A block passed validation and was indexed
    BlockAccepted { hash: Hash256, height: u64, main_view: bool },
    /// A block's transactions were applied to the UTXO set
    BlockConnected { hash: Hash256, height: u64 },
    /// A block's transactions were rolled back by a reorganization
    BlockDisconnected { hash: Hash256, height: u64 },
}

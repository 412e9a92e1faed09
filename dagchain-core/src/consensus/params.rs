//! Network parameters
//!
//! Everything consensus-relevant that differs between networks: genesis,
//! proof-of-work limit, retarget schedule, subsidy, block limits and
//! checkpoints.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::hash::Hash256;
use crate::types::{Block, BlockHeader, Transaction, TransactionOutput};
use crate::util::merkle_root;

/// Base units per coin
pub const COIN: u64 = 100_000_000;

/// Upper bound on any single output value or transaction total
pub const MAX_MONEY: u64 = 21_000_000 * COIN;

/// Networks with built-in parameter presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Regtest,
}

impl Network {
    pub fn params(&self) -> NetworkParams {
        match self {
            Network::Mainnet => NetworkParams::mainnet(),
            Network::Regtest => NetworkParams::regtest(),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => f.write_str("mainnet"),
            Network::Regtest => f.write_str("regtest"),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}

/// A block hash pinned at a height
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub height: u64,
    pub hash: Hash256,
}

#[derive(Debug, Clone)]
pub struct NetworkParams {
    pub name: &'static str,
    pub genesis_block: Block,
    /// Easiest allowed target, compact form
    pub pow_limit_bits: u32,
    /// Time the blocks of one retarget interval should take
    pub target_timespan: Duration,
    pub target_time_per_block: Duration,
    /// Bound on how far a single retarget may move the target
    pub retarget_adjustment_factor: u64,
    pub no_retargeting: bool,
    /// Depth a coinbase output must reach before it can be spent
    pub coinbase_maturity: u64,
    pub base_subsidy: u64,
    pub subsidy_halving_interval: u64,
    pub max_block_size: u64,
    pub max_block_transactions: usize,
    pub max_block_parents: usize,
    /// How far ahead of adjusted time a block timestamp may be
    pub max_future_block_time: Duration,
    /// Ancestors along the selected-parent chain used for median time past
    pub median_time_blocks: usize,
    pub checkpoints: Vec<Checkpoint>,
}

impl NetworkParams {
    pub fn mainnet() -> Self {
        let pow_limit_bits = 0x1d00ffff;
        Self {
            name: "mainnet",
            genesis_block: build_genesis(1_700_000_000, pow_limit_bits, 50 * COIN),
            pow_limit_bits,
            target_timespan: Duration::from_secs(14 * 24 * 60 * 60),
            target_time_per_block: Duration::from_secs(10 * 60),
            retarget_adjustment_factor: 4,
            no_retargeting: false,
            coinbase_maturity: 100,
            base_subsidy: 50 * COIN,
            subsidy_halving_interval: 210_000,
            max_block_size: 1_000_000,
            max_block_transactions: 1_000_000 / 60,
            max_block_parents: 16,
            max_future_block_time: Duration::from_secs(2 * 60 * 60),
            median_time_blocks: 11,
            checkpoints: Vec::new(),
        }
    }

    /// Local testing network: trivially minable, no retargeting and a short
    /// coinbase maturity
    pub fn regtest() -> Self {
        let pow_limit_bits = 0x207fffff;
        Self {
            name: "regtest",
            genesis_block: build_genesis(1_600_000_000, pow_limit_bits, 50 * COIN),
            pow_limit_bits,
            target_timespan: Duration::from_secs(14 * 24 * 60 * 60),
            target_time_per_block: Duration::from_secs(10 * 60),
            retarget_adjustment_factor: 4,
            no_retargeting: true,
            coinbase_maturity: 2,
            base_subsidy: 50 * COIN,
            subsidy_halving_interval: 150,
            max_block_size: 1_000_000,
            max_block_transactions: 1_000_000 / 60,
            max_block_parents: 16,
            max_future_block_time: Duration::from_secs(2 * 60 * 60),
            median_time_blocks: 11,
            checkpoints: Vec::new(),
        }
    }

    pub fn with_checkpoints(mut self, mut checkpoints: Vec<Checkpoint>) -> Self {
        checkpoints.sort_by_key(|c| c.height);
        self.checkpoints = checkpoints;
        self
    }

    pub fn genesis_hash(&self) -> Hash256 {
        self.genesis_block.hash()
    }

    /// Blocks between difficulty retargets
    pub fn retarget_interval(&self) -> u64 {
        let per_block = self.target_time_per_block.as_secs().max(1);
        (self.target_timespan.as_secs() / per_block).max(1)
    }

    /// Block reward at `height`, halving every `subsidy_halving_interval`
    pub fn subsidy(&self, height: u64) -> u64 {
        if self.subsidy_halving_interval == 0 {
            return self.base_subsidy;
        }
        let halvings = height / self.subsidy_halving_interval;
        if halvings >= 64 {
            0
        } else {
            self.base_subsidy >> halvings
        }
    }

    pub fn checkpoint_at(&self, height: u64) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.height == height)
    }

    pub fn last_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.iter().max_by_key(|c| c.height)
    }
}

fn build_genesis(timestamp: u64, bits: u32, reward: u64) -> Block {
    let coinbase = Transaction::new_coinbase(
        b"dagchain genesis".to_vec(),
        vec![TransactionOutput::new(reward, Vec::new())],
    );
    let root = merkle_root(&[coinbase.txid()]);
    let header = BlockHeader::new(1, Vec::new(), root, timestamp, bits, 0, 0);
    Block::new(header, vec![coinbase])
}

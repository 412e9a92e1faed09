//! Shared fixtures for the DAG integration tests: a regtest engine over an
//! in-memory store with a pinned clock, plus helpers to build and mine blocks.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dagchain_core::consensus::{compact_to_target, hash_meets_target, MedianTime, NetworkParams};
use dagchain_core::dag::{BehaviorFlags, BlockDag, DagConfig, Notification, ProcessOutcome};
use dagchain_core::script::{p2pk_script, sign_input};
use dagchain_core::storage::{KvStore, MemoryStore, StorageError, WriteBatch};
use dagchain_core::types::{Block, BlockHeader, OutPoint, Transaction, TransactionInput, TransactionOutput};
use dagchain_core::Hash256;
use secp256k1::{PublicKey, Secp256k1, SecretKey};

/// Local clock seen by every test engine, comfortably after regtest genesis
pub const NOW: i64 = 1_600_100_000;

/// Seconds between consecutive test blocks
pub const BLOCK_SPACING: u64 = 600;

/// Regtest proof-of-work limit
pub const EASY_BITS: u32 = 0x207fffff;

/// A harder regtest target: 128 times the work of `EASY_BITS`
pub const HARD_BITS: u32 = 0x2000ffff;

static NEXT_TAG: AtomicU64 = AtomicU64::new(1);

/// In-memory store whose commits can be made to fail on demand
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    /// Remaining successful commits before one fails; 0 means never fail
    fail_in: AtomicU64,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `commit` fail without applying anything
    pub fn fail_next_commit(&self) {
        self.fail_commit_after(0);
    }

    /// Let `ok` commits through, then fail the one after
    pub fn fail_commit_after(&self, ok: u64) {
        self.fail_in.store(ok + 1, Ordering::SeqCst);
    }
}

impl KvStore for FaultyStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        self.inner.scan_prefix(prefix)
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let remaining = self
            .fail_in
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if remaining == 1 {
            return Err(StorageError::Unavailable("injected commit failure".to_string()));
        }
        self.inner.commit(batch)
    }
}

pub struct TestDag {
    pub dag: BlockDag,
    pub store: Arc<FaultyStore>,
    pub clock: Arc<MedianTime>,
    pub events: Arc<Mutex<Vec<Notification>>>,
}

impl TestDag {
    pub fn new() -> Self {
        Self::with_store(Arc::new(FaultyStore::new()))
    }

    pub fn with_store(store: Arc<FaultyStore>) -> Self {
        let clock = Arc::new(MedianTime::with_clock(Box::new(|| NOW)));
        let dag = open_dag(store.clone(), clock.clone());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        dag.subscribe(Box::new(move |n: &Notification| sink.lock().unwrap().push(n.clone())));
        Self { dag, store, clock, events }
    }

    pub fn genesis(&self) -> Block {
        self.dag.params().genesis_block.clone()
    }

    pub fn process(&self, block: &Block) -> ProcessOutcome {
        self.dag.process_block(block, BehaviorFlags::NONE).expect("process_block failed")
    }

    /// Drain collected notifications
    pub fn take_events(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

pub fn open_dag(store: Arc<dyn KvStore>, clock: Arc<MedianTime>) -> BlockDag {
    let config = DagConfig::new(NetworkParams::regtest(), store).with_time_source(clock);
    BlockDag::new(config).expect("failed to open dag")
}

fn next_tag() -> u64 {
    NEXT_TAG.fetch_add(1, Ordering::Relaxed)
}

/// Coinbase paying `value` to `script`, unique per call
pub fn coinbase_to(value: u64, script: Vec<u8>) -> Transaction {
    Transaction::new_coinbase(next_tag().to_le_bytes().to_vec(), vec![TransactionOutput::new(value, script)])
}

pub fn subsidy(height: u64) -> u64 {
    NetworkParams::regtest().subsidy(height)
}

/// Child of `parents` with a fresh anyone-can-spend coinbase followed by `txs`
pub fn child_of(parents: &[&Block], txs: Vec<Transaction>) -> Block {
    BlockSpec::on(parents).txs(txs).mine()
}

/// Builder for test blocks; defaults give a valid, mined child
pub struct BlockSpec {
    parents: Vec<Hash256>,
    height: u64,
    timestamp: u64,
    bits: u32,
    coinbase: Option<Transaction>,
    txs: Vec<Transaction>,
}

impl BlockSpec {
    pub fn on(parents: &[&Block]) -> Self {
        let height = parents.iter().map(|p| p.height()).max().unwrap_or(0) + 1;
        let timestamp = parents.iter().map(|p| p.header.timestamp).max().unwrap_or(0) + BLOCK_SPACING;
        Self {
            parents: parents.iter().map(|p| p.hash()).collect(),
            height,
            timestamp,
            bits: EASY_BITS,
            coinbase: None,
            txs: Vec::new(),
        }
    }

    pub fn height(mut self, height: u64) -> Self {
        self.height = height;
        self
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn bits(mut self, bits: u32) -> Self {
        self.bits = bits;
        self
    }

    pub fn coinbase(mut self, coinbase: Transaction) -> Self {
        self.coinbase = Some(coinbase);
        self
    }

    pub fn txs(mut self, txs: Vec<Transaction>) -> Self {
        self.txs = txs;
        self
    }

    pub fn build(self) -> Block {
        let coinbase = self
            .coinbase
            .unwrap_or_else(|| coinbase_to(subsidy(self.height), Vec::new()));
        let mut transactions = vec![coinbase];
        transactions.extend(self.txs);
        let header = BlockHeader::new(1, self.parents, [0u8; 32], self.timestamp, self.bits, 0, self.height);
        let mut block = Block::new(header, transactions);
        block.header.merkle_root = block.compute_merkle_root();
        block
    }

    pub fn mine(self) -> Block {
        mine(self.build())
    }
}

/// Search nonces until the header hash meets its declared target
pub fn mine(mut block: Block) -> Block {
    let target = compact_to_target(block.header.bits).expect("valid bits");
    while !hash_meets_target(&block.hash(), &target) {
        block.header.nonce += 1;
    }
    block
}

/// Search nonces until the header hash misses its declared target
pub fn unmine(mut block: Block) -> Block {
    let target = compact_to_target(block.header.bits).expect("valid bits");
    while hash_meets_target(&block.hash(), &target) {
        block.header.nonce += 1;
    }
    block
}

pub fn keypair(seed: u8) -> (SecretKey, PublicKey) {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[seed; 32]).expect("valid secret key");
    let public = PublicKey::from_secret_key(&secp, &secret);
    (secret, public)
}

pub fn p2pk(public: &PublicKey) -> Vec<u8> {
    p2pk_script(public)
}

/// Output 0 of the block's coinbase
pub fn coinbase_outpoint(block: &Block) -> OutPoint {
    OutPoint::new(block.transactions[0].txid(), 0)
}

/// Spend `prev` (locked by `prev_script`) into a single anyone-can-spend
/// output of `value`, signing when `key` is given
pub fn spend(prev: OutPoint, prev_script: &[u8], key: Option<&SecretKey>, value: u64) -> Transaction {
    let mut tx = Transaction::new(
        1,
        vec![TransactionInput::new(prev, Vec::new(), u32::MAX)],
        vec![TransactionOutput::new(value, Vec::new())],
        0,
    );
    if let Some(key) = key {
        tx.inputs[0].signature_script = sign_input(&tx, 0, prev_script, key).expect("signing failed");
    }
    tx
}

/// Extend `from` with `count` easy blocks, returning them oldest first
pub fn extend_chain(harness: &TestDag, from: &Block, count: usize) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(count);
    let mut parent = from.clone();
    for _ in 0..count {
        let block = child_of(&[&parent], Vec::new());
        let outcome = harness.process(&block);
        assert!(outcome.is_accepted(), "block not accepted: {}", outcome);
        parent = block.clone();
        blocks.push(block);
    }
    blocks
}

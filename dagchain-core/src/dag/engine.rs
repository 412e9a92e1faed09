//! The block-DAG engine
//!
//! Block acceptance is serialized behind the write half of a single
//! `RwLock`; queries take the read half. Every `process_block` call stages
//! all of its durable writes into one `WriteBatch` and commits it before any
//! in-memory state changes, so a failed commit leaves the engine exactly as
//! it was.

use lru::LruCache;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::consensus::checkpoint::scripts_assumed_valid;
use crate::consensus::median_time::{MedianTime, MedianTimeSource};
use crate::consensus::params::NetworkParams;
use crate::consensus::work::{block_work, U256};
use crate::dag::index::{BlockIndex, BlockNode};
use crate::dag::orphans::{OrphanPool, DEFAULT_MAX_ORPHANS, DEFAULT_ORPHAN_EXPIRY};
use crate::dag::selection::{apply_main_view, compute_main_view, find_fork, side_path};
use crate::dag::utxo::{SpendJournal, UtxoEntry, UtxoView};
use crate::dag::validate::{
    check_block_context, check_block_sanity, connect_block_transactions, median_time_past,
    required_bits_for_child,
};
use crate::dag::{BehaviorFlags, Notification, ProcessOutcome};
use crate::error::{rule_error, DagError, DagResult, ErrorCode, RuleError};
use crate::hash::{short_hex, Hash256};
use crate::script::sig_cache::DEFAULT_SIG_CACHE_CAPACITY;
use crate::script::{verify_scripts, ScriptVerifier, SigCache, StandardScriptVerifier};
use crate::storage::{
    body_key, get_record, journal_key, node_prefix, outpoint_from_utxo_key, tip_key, utxo_key,
    utxo_prefix, KvStore, StorageError, WriteBatch,
};
use crate::types::{Block, OutPoint};

/// Default number of remembered process outcomes
pub const DEFAULT_OUTCOME_CACHE_SIZE: usize = 1024;

pub type Subscriber = Box<dyn Fn(&Notification) + Send + Sync>;

/// Collaborators and limits supplied at construction
pub struct DagConfig {
    pub params: NetworkParams,
    pub store: Arc<dyn KvStore>,
    pub time_source: Arc<dyn MedianTimeSource>,
    pub sig_cache: Arc<SigCache>,
    pub script_verifier: Arc<dyn ScriptVerifier>,
    pub max_orphans: usize,
    pub orphan_expiry: Duration,
    pub outcome_cache_size: usize,
}

impl DagConfig {
    /// Defaults for everything but the network and the store
    pub fn new(params: NetworkParams, store: Arc<dyn KvStore>) -> Self {
        Self {
            params,
            store,
            time_source: Arc::new(MedianTime::new()),
            sig_cache: Arc::new(SigCache::new(DEFAULT_SIG_CACHE_CAPACITY)),
            script_verifier: Arc::new(StandardScriptVerifier::new()),
            max_orphans: DEFAULT_MAX_ORPHANS,
            orphan_expiry: DEFAULT_ORPHAN_EXPIRY,
            outcome_cache_size: DEFAULT_OUTCOME_CACHE_SIZE,
        }
    }

    pub fn with_time_source(mut self, time_source: Arc<dyn MedianTimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    pub fn with_sig_cache(mut self, sig_cache: Arc<SigCache>) -> Self {
        self.sig_cache = sig_cache;
        self
    }
}

/// Summary of the selected tip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestSnapshot {
    pub hash: Hash256,
    pub height: u64,
    pub chain_work: U256,
    pub bits: u32,
    pub median_time_past: u64,
    pub tx_count: u32,
    /// Blocks in the selected main view, genesis included
    pub main_view_len: usize,
}

struct DagState {
    index: BlockIndex,
    orphans: OrphanPool,
    /// Selected-parent chain of the best tip, genesis first
    main_view: Vec<Hash256>,
    recent_outcomes: LruCache<Hash256, ProcessOutcome>,
}

impl DagState {
    fn best_hash(&self) -> DagResult<Hash256> {
        self.main_view
            .last()
            .copied()
            .ok_or_else(|| DagError::Corruption("main view is empty".to_string()))
    }
}

pub struct BlockDag {
    params: NetworkParams,
    store: Arc<dyn KvStore>,
    time_source: Arc<dyn MedianTimeSource>,
    sig_cache: Arc<SigCache>,
    script_verifier: Arc<dyn ScriptVerifier>,
    orphan_expiry: Duration,
    state: RwLock<DagState>,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl BlockDag {
    /// Open the DAG persisted in `config.store`, initialising it with the
    /// genesis block if the store is empty
    pub fn new(config: DagConfig) -> DagResult<Self> {
        let DagConfig {
            params,
            store,
            time_source,
            sig_cache,
            script_verifier,
            max_orphans,
            orphan_expiry,
            outcome_cache_size,
        } = config;

        let index = if store.scan_prefix(node_prefix())?.is_empty() {
            Self::init_genesis(&params, store.as_ref())?
        } else {
            Self::load_index(&params, store.as_ref())?
        };

        let tip = Self::load_tip(store.as_ref(), &index)?;
        let mut index = index;
        let main_view = compute_main_view(&index, &tip);
        apply_main_view(&mut index, &[], &main_view);

        info!(
            "Block DAG ready on {}: {} block(s), tip {} at height {}",
            params.name,
            index.len(),
            short_hex(&tip),
            index.lookup(&tip).map(|n| n.height).unwrap_or(0)
        );

        let cache_size = NonZeroUsize::new(outcome_cache_size).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            params,
            store,
            time_source,
            sig_cache,
            script_verifier,
            orphan_expiry,
            state: RwLock::new(DagState {
                index,
                orphans: OrphanPool::new(max_orphans),
                main_view,
                recent_outcomes: LruCache::new(cache_size),
            }),
            subscribers: RwLock::new(Vec::new()),
        })
    }

    fn init_genesis(params: &NetworkParams, store: &dyn KvStore) -> DagResult<BlockIndex> {
        let genesis = &params.genesis_block;
        let hash = genesis.hash();
        let mut node = BlockNode::new(
            genesis.header.clone(),
            None,
            block_work(genesis.header.bits)?,
            params.pow_limit_bits,
            genesis.transactions.len() as u32,
        );
        node.mark_valid();

        // The genesis coinbase is deliberately left out of the UTXO set.
        let mut batch = WriteBatch::new();
        node.persist(&mut batch)?;
        batch.put_record(body_key(&hash), genesis)?;
        batch.put(tip_key().to_vec(), hash.to_vec());
        store.commit(batch)?;

        let mut index = BlockIndex::new();
        index.insert(node)?;
        info!("Initialised new block DAG with genesis {}", hex::encode(hash));
        Ok(index)
    }

    fn load_index(params: &NetworkParams, store: &dyn KvStore) -> DagResult<BlockIndex> {
        let mut nodes = Vec::new();
        for (key, value) in store.scan_prefix(node_prefix())? {
            let node: BlockNode = bincode::deserialize(&value).map_err(StorageError::from)?;
            if key.get(node_prefix().len()..) != Some(&node.hash[..]) {
                return Err(DagError::Corruption(format!(
                    "node record under key {} holds block {}",
                    hex::encode(&key),
                    hex::encode(node.hash)
                )));
            }
            nodes.push(node);
        }
        // Parents are strictly lower than their children.
        nodes.sort_by_key(|node| node.height);

        let expected = params.genesis_hash();
        match nodes.first() {
            Some(first) if first.hash == expected => {}
            Some(first) => {
                return Err(DagError::GenesisMismatch {
                    stored: hex::encode(first.hash),
                    expected: hex::encode(expected),
                })
            }
            None => return Err(DagError::Corruption("no block nodes stored".to_string())),
        }

        let mut index = BlockIndex::new();
        for node in nodes {
            index.insert(node)?;
        }
        debug!("Loaded {} block node(s) from store", index.len());
        Ok(index)
    }

    fn load_tip(store: &dyn KvStore, index: &BlockIndex) -> DagResult<Hash256> {
        let bytes = store
            .get(tip_key())?
            .ok_or_else(|| DagError::Corruption("selected tip record missing".to_string()))?;
        let tip: Hash256 = bytes
            .as_slice()
            .try_into()
            .map_err(|_| DagError::Corruption(format!("selected tip record has {} bytes", bytes.len())))?;

        let best = index
            .best_tip()
            .ok_or_else(|| DagError::Corruption("block index has no tips".to_string()))?;
        if best.hash != tip {
            return Err(DagError::Corruption(format!(
                "stored tip {} differs from best tip {}",
                hex::encode(tip),
                hex::encode(best.hash)
            )));
        }
        Ok(tip)
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    pub fn time_source(&self) -> &Arc<dyn MedianTimeSource> {
        &self.time_source
    }

    pub fn sig_cache(&self) -> &Arc<SigCache> {
        &self.sig_cache
    }

    /// Register a callback invoked after every commit
    pub fn subscribe(&self, callback: Subscriber) {
        self.subscribers.write().push(callback);
    }

    /// Validate and, if acceptable, add `block` to the DAG.
    ///
    /// Rule violations are reported as `ProcessOutcome::Rejected` with no
    /// state changed. `Err` is reserved for storage failures and corruption.
    pub fn process_block(&self, block: &Block, flags: BehaviorFlags) -> DagResult<ProcessOutcome> {
        let mut notifications = Vec::new();
        let result = {
            let mut state = self.state.write();
            self.process_block_locked(&mut state, block, flags, &mut notifications)
        };
        self.notify(&notifications);
        result
    }

    fn process_block_locked(
        &self,
        state: &mut DagState,
        block: &Block,
        flags: BehaviorFlags,
        notifications: &mut Vec<Notification>,
    ) -> DagResult<ProcessOutcome> {
        state.orphans.expire_older_than(self.orphan_expiry);

        let hash = block.hash();
        debug!("Processing block {} (height {})", short_hex(&hash), block.height());

        if state.index.contains(&hash) {
            return self.duplicate_outcome(state, block, &hash);
        }
        if let Some(missing) = state.orphans.missing_parents(&hash) {
            let still_missing: Vec<Hash256> = missing
                .into_iter()
                .filter(|parent| !state.index.contains(parent))
                .collect();
            if !still_missing.is_empty() {
                debug!("Block {} is already a known orphan", short_hex(&hash));
                return Ok(ProcessOutcome::Orphan { missing: still_missing });
            }
            debug!("Retrying pooled block {} whose parents are all indexed", short_hex(&hash));
            state.orphans.take(&hash);
        }

        if let Err(err) = check_block_sanity(block, &self.params, flags) {
            debug!("Block {} failed sanity checks: {}", short_hex(&hash), err);
            return Ok(ProcessOutcome::Rejected(err));
        }

        let mut missing: Vec<Hash256> = block
            .parents()
            .iter()
            .filter(|parent| !state.index.contains(parent))
            .copied()
            .collect();
        if !missing.is_empty() {
            missing.sort();
            state.orphans.add(block.clone(), &missing);
            info!(
                "Adding orphan block {} with {} missing parent(s)",
                short_hex(&hash),
                missing.len()
            );
            return Ok(ProcessOutcome::Orphan { missing });
        }

        let outcome = self.accept_block(state, block, flags, notifications)?;
        if outcome.is_accepted() {
            self.process_orphans(state, hash, flags, notifications);
        }
        Ok(outcome)
    }

    fn duplicate_outcome(&self, state: &mut DagState, block: &Block, hash: &Hash256) -> DagResult<ProcessOutcome> {
        let stored = self.load_block(hash)?;
        if stored != *block {
            return Ok(ProcessOutcome::Rejected(rule_error(
                ErrorCode::DuplicateBlock,
                format!("already have block {} with a different body", hex::encode(hash)),
            )));
        }
        if let Some(outcome) = state.recent_outcomes.get(hash) {
            return Ok(outcome.clone());
        }
        let in_main = state.index.expect_node(hash)?.in_main_view();
        Ok(if in_main {
            ProcessOutcome::MainView
        } else {
            ProcessOutcome::SideBlock
        })
    }

    /// Feed orphans unblocked by `accepted` (and, transitively, by the
    /// orphans accepted from it) back through validation.
    ///
    /// `accepted` is already committed, so a failure here cannot change its
    /// outcome. The failing orphan and everything still queued go back into
    /// the pool and are retried after the next accepted block or on
    /// resubmission.
    fn process_orphans(
        &self,
        state: &mut DagState,
        accepted: Hash256,
        flags: BehaviorFlags,
        notifications: &mut Vec<Notification>,
    ) {
        let mut ready: VecDeque<Block> = state.orphans.resolve(&accepted).into();
        let index = &state.index;
        ready.extend(state.orphans.take_satisfied(|parent| index.contains(parent)));

        while let Some(orphan) = ready.pop_front() {
            let hash = orphan.hash();
            match self.accept_block(state, &orphan, flags, notifications) {
                Ok(ProcessOutcome::Rejected(err)) => {
                    warn!("Orphan block {} rejected once connected: {}", short_hex(&hash), err)
                }
                Ok(outcome) => {
                    debug!("Orphan block {} processed: {}", short_hex(&hash), outcome);
                    ready.extend(state.orphans.resolve(&hash));
                }
                Err(err) => {
                    error!(
                        "Failed to connect orphan block {}: {}; returning {} block(s) to the orphan pool",
                        short_hex(&hash),
                        err,
                        ready.len() + 1
                    );
                    for block in std::iter::once(orphan).chain(ready.drain(..)) {
                        let parents = block.parents().to_vec();
                        state.orphans.add(block, &parents);
                    }
                    return;
                }
            }
        }
    }

    /// Contextual and transaction validation of a block whose parents are
    /// all indexed, then the commit
    fn accept_block(
        &self,
        state: &mut DagState,
        block: &Block,
        flags: BehaviorFlags,
        notifications: &mut Vec<Notification>,
    ) -> DagResult<ProcessOutcome> {
        let hash = block.hash();
        if state.index.contains(&hash) {
            return self.duplicate_outcome(state, block, &hash);
        }

        let selected_parent = state
            .index
            .select_parent(block.parents())
            .cloned()
            .ok_or_else(|| DagError::Corruption(format!("block {} has no indexed parent", hex::encode(hash))))?;

        let required_bits = match check_block_context(
            &state.index,
            block,
            &selected_parent,
            &self.params,
            self.time_source.adjusted_time(),
            flags,
        ) {
            Ok(bits) => bits,
            Err(err) => return Ok(self.reject(&hash, err)),
        };
        let work = match block_work(block.header.bits) {
            Ok(work) => work,
            Err(err) => return Ok(self.reject(&hash, err)),
        };

        let mut node = BlockNode::new(
            block.header.clone(),
            Some(selected_parent.hash),
            selected_parent.chain_work + work,
            required_bits,
            block.transactions.len() as u32,
        );

        let best_hash = state.best_hash()?;
        let becomes_best = node.is_better_than(state.index.expect_node(&best_hash)?);

        // Position a UTXO view at the block's own selected ancestry: roll the
        // main view back to the fork point, then replay the side branch.
        let mut view = UtxoView::new(self.store.as_ref());
        let fork = find_fork(&state.index, &selected_parent.hash)?;
        let fork_position = state
            .main_view
            .iter()
            .rposition(|h| *h == fork)
            .ok_or_else(|| DagError::Corruption(format!("fork point {} not in main view", hex::encode(fork))))?;
        let detach: Vec<Hash256> = state.main_view[fork_position + 1..].iter().rev().copied().collect();
        let attach = side_path(&state.index, &fork, &selected_parent.hash);

        for detached in &detach {
            let detached_block = self.load_block(detached)?;
            let journal = self.load_journal(detached)?;
            view.disconnect_block(&detached_block, &journal)?;
        }

        let mut attach_journals: Vec<(Hash256, SpendJournal)> = Vec::with_capacity(attach.len());
        for attached in &attach {
            let attached_block = self.load_block(attached)?;
            match view.connect_block(&attached_block) {
                Ok(journal) => attach_journals.push((*attached, journal)),
                Err(DagError::Rule(err)) => {
                    return Err(DagError::Corruption(format!(
                        "previously accepted block {} no longer connects: {}",
                        hex::encode(attached),
                        err
                    )))
                }
                Err(err) => return Err(err),
            }
        }

        let (journal, script_jobs) = match connect_block_transactions(&mut view, block, &self.params) {
            Ok(connected) => connected,
            Err(DagError::Rule(err)) => return Ok(self.reject(&hash, err)),
            Err(err) => return Err(err),
        };
        if scripts_assumed_valid(&self.params, block.height()) {
            debug!("Skipping script checks for block {} below last checkpoint", short_hex(&hash));
        } else if let Err(err) = verify_scripts(self.script_verifier.as_ref(), &script_jobs, &self.sig_cache) {
            return Ok(self.reject(&hash, err));
        }

        node.mark_valid();

        let mut batch = WriteBatch::new();
        node.persist(&mut batch)?;
        batch.put_record(body_key(&hash), block)?;
        if becomes_best {
            view.commit(&mut batch)?;
            for detached in &detach {
                batch.delete(journal_key(detached));
            }
            for (attached, attached_journal) in &attach_journals {
                batch.put_record(journal_key(attached), attached_journal)?;
            }
            batch.put_record(journal_key(&hash), &journal)?;
            batch.put(tip_key().to_vec(), hash.to_vec());
        } else {
            view.discard();
        }
        self.store.commit(batch)?;

        let height = node.height;
        state.index.insert(node)?;

        let outcome = if becomes_best {
            let new_view = compute_main_view(&state.index, &hash);
            apply_main_view(&mut state.index, &state.main_view, &new_view);
            state.main_view = new_view;

            for detached in &detach {
                let detached_height = state.index.expect_node(detached)?.height;
                notifications.push(Notification::BlockDisconnected { hash: *detached, height: detached_height });
            }
            for (attached, _) in &attach_journals {
                let attached_height = state.index.expect_node(attached)?.height;
                notifications.push(Notification::BlockConnected { hash: *attached, height: attached_height });
            }
            notifications.push(Notification::BlockConnected { hash, height });

            if !detach.is_empty() {
                info!(
                    "Reorganized main view: {} block(s) disconnected, {} connected, new tip {} at height {}",
                    detach.len(),
                    attach_journals.len() + 1,
                    short_hex(&hash),
                    height
                );
            }
            ProcessOutcome::MainView
        } else {
            ProcessOutcome::SideBlock
        };

        notifications.push(Notification::BlockAccepted {
            hash,
            height,
            main_view: outcome.is_main_view(),
        });
        state.recent_outcomes.put(hash, outcome.clone());
        info!("Accepted block {} at height {}: {}", short_hex(&hash), height, outcome);
        Ok(outcome)
    }

    fn reject(&self, hash: &Hash256, err: RuleError) -> ProcessOutcome {
        debug!("Rejected block {}: {}", short_hex(hash), err);
        ProcessOutcome::Rejected(err)
    }

    fn load_block(&self, hash: &Hash256) -> DagResult<Block> {
        get_record(self.store.as_ref(), &body_key(hash))?
            .ok_or_else(|| DagError::Corruption(format!("body of block {} missing from store", hex::encode(hash))))
    }

    fn load_journal(&self, hash: &Hash256) -> DagResult<SpendJournal> {
        get_record(self.store.as_ref(), &journal_key(hash))?
            .ok_or_else(|| DagError::Corruption(format!("spend journal of block {} missing", hex::encode(hash))))
    }

    fn notify(&self, notifications: &[Notification]) {
        if notifications.is_empty() {
            return;
        }
        let subscribers = self.subscribers.read();
        for notification in notifications {
            for subscriber in subscribers.iter() {
                subscriber(notification);
            }
        }
    }

    pub fn best_snapshot(&self) -> DagResult<BestSnapshot> {
        let state = self.state.read();
        let best_hash = state.best_hash()?;
        let best = state.index.expect_node(&best_hash)?;
        Ok(BestSnapshot {
            hash: best.hash,
            height: best.height,
            chain_work: best.chain_work,
            bits: best.header.bits,
            median_time_past: median_time_past(&state.index, &best.hash, &self.params),
            tx_count: best.tx_count,
            main_view_len: state.main_view.len(),
        })
    }

    pub fn block_node(&self, hash: &Hash256) -> Option<BlockNode> {
        self.state.read().index.lookup(hash).cloned()
    }

    /// Body of an accepted block
    pub fn block(&self, hash: &Hash256) -> DagResult<Option<Block>> {
        let _state = self.state.read();
        Ok(get_record(self.store.as_ref(), &body_key(hash))?)
    }

    pub fn tips(&self) -> Vec<Hash256> {
        self.state.read().index.tips()
    }

    /// Main view hashes, genesis first
    pub fn main_view(&self) -> Vec<Hash256> {
        self.state.read().main_view.clone()
    }

    pub fn is_in_main_view(&self, hash: &Hash256) -> bool {
        self.state
            .read()
            .index
            .lookup(hash)
            .map(BlockNode::in_main_view)
            .unwrap_or(false)
    }

    pub fn utxo_entry(&self, outpoint: &OutPoint) -> DagResult<Option<UtxoEntry>> {
        let _state = self.state.read();
        Ok(get_record(self.store.as_ref(), &utxo_key(outpoint))?)
    }

    /// Every unspent output of the main view, in key order
    pub fn utxo_set(&self) -> DagResult<Vec<(OutPoint, UtxoEntry)>> {
        let _state = self.state.read();
        let mut entries = Vec::new();
        for (key, value) in self.store.scan_prefix(utxo_prefix())? {
            let outpoint = outpoint_from_utxo_key(&key)
                .ok_or_else(|| DagError::Corruption(format!("malformed utxo key {}", hex::encode(&key))))?;
            let entry: UtxoEntry = bincode::deserialize(&value).map_err(StorageError::from)?;
            entries.push((outpoint, entry));
        }
        Ok(entries)
    }

    /// Known as an indexed block or a pooled orphan
    pub fn have_block(&self, hash: &Hash256) -> bool {
        let state = self.state.read();
        state.index.contains(hash) || state.orphans.contains(hash)
    }

    pub fn is_known_orphan(&self, hash: &Hash256) -> bool {
        self.state.read().orphans.contains(hash)
    }

    pub fn orphan_root(&self, hash: &Hash256) -> Hash256 {
        self.state.read().orphans.orphan_root(hash)
    }

    pub fn orphan_count(&self) -> usize {
        self.state.read().orphans.len()
    }

    pub fn block_count(&self) -> usize {
        self.state.read().index.len()
    }

    /// Bits a block extending the best tip must meet
    pub fn next_required_bits(&self) -> DagResult<u32> {
        let state = self.state.read();
        let best = state.index.expect_node(&state.best_hash()?)?;
        Ok(required_bits_for_child(&state.index, best, best.height + 1, &self.params)?)
    }

    pub fn flush(&self) -> DagResult<()> {
        Ok(self.store.flush()?)
    }
}

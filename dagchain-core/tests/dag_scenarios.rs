//! Block processing scenarios
//!
//! Exercises `BlockDag::process_block` end to end over an in-memory store:
//! orphan handling, contextual rejections, spend rules, idempotence and
//! the all-or-nothing commit.

mod common;

use std::sync::Arc;

use common::*;
use dagchain_core::consensus::{Checkpoint, MedianTimeSource, NetworkParams};
use dagchain_core::dag::{BehaviorFlags, BlockDag, DagConfig, Notification, ProcessOutcome};
use dagchain_core::error::{DagError, ErrorCode};
use dagchain_core::storage::MemoryStore;

fn rejected_code(outcome: &ProcessOutcome) -> ErrorCode {
    outcome
        .rule_error()
        .map(|err| err.code)
        .unwrap_or_else(|| panic!("expected a rejection, got {}", outcome))
}

#[test]
fn test_fresh_dag_starts_at_genesis() {
    let harness = TestDag::new();
    let genesis = harness.genesis();

    let best = harness.dag.best_snapshot().unwrap();
    assert_eq!(best.hash, genesis.hash());
    assert_eq!(best.height, 0);
    assert_eq!(best.main_view_len, 1);
    assert_eq!(best.median_time_past, genesis.header.timestamp);
    assert_eq!(harness.dag.tips(), vec![genesis.hash()]);
    assert!(harness.dag.is_in_main_view(&genesis.hash()));
    assert_eq!(harness.dag.next_required_bits().unwrap(), EASY_BITS);

    // The genesis coinbase is never spendable.
    assert!(harness.dag.utxo_set().unwrap().is_empty());
    assert!(harness
        .dag
        .utxo_entry(&coinbase_outpoint(&genesis))
        .unwrap()
        .is_none());
}

#[test]
fn test_linear_extension_updates_utxo_set_and_notifies() {
    let harness = TestDag::new();
    let genesis = harness.genesis();
    let b1 = child_of(&[&genesis], Vec::new());

    assert_eq!(harness.process(&b1), ProcessOutcome::MainView);

    let best = harness.dag.best_snapshot().unwrap();
    assert_eq!(best.hash, b1.hash());
    assert_eq!(best.height, 1);
    assert_eq!(harness.dag.main_view(), vec![genesis.hash(), b1.hash()]);
    assert_eq!(harness.dag.tips(), vec![b1.hash()]);

    let entry = harness.dag.utxo_entry(&coinbase_outpoint(&b1)).unwrap().unwrap();
    assert!(entry.is_coinbase);
    assert_eq!(entry.height, 1);
    assert_eq!(entry.value, subsidy(1));

    assert_eq!(
        harness.take_events(),
        vec![
            Notification::BlockConnected { hash: b1.hash(), height: 1 },
            Notification::BlockAccepted { hash: b1.hash(), height: 1, main_view: true },
        ]
    );
}

#[test]
fn test_orphan_is_connected_when_parent_arrives() {
    let harness = TestDag::new();
    let genesis = harness.genesis();
    let b1 = child_of(&[&genesis], Vec::new());
    let b2 = child_of(&[&b1], Vec::new());

    assert_eq!(harness.process(&b2), ProcessOutcome::Orphan { missing: vec![b1.hash()] });
    assert!(harness.dag.is_known_orphan(&b2.hash()));
    assert!(harness.dag.have_block(&b2.hash()));
    assert_eq!(harness.dag.orphan_root(&b2.hash()), b2.hash());
    assert!(harness.take_events().is_empty());

    // Resubmitting a pooled orphan reports the same missing parents.
    assert_eq!(harness.process(&b2), ProcessOutcome::Orphan { missing: vec![b1.hash()] });
    assert_eq!(harness.dag.orphan_count(), 1);

    assert_eq!(harness.process(&b1), ProcessOutcome::MainView);
    assert_eq!(harness.dag.orphan_count(), 0);
    assert!(!harness.dag.is_known_orphan(&b2.hash()));
    assert_eq!(harness.dag.best_snapshot().unwrap().hash, b2.hash());
    assert_eq!(harness.dag.main_view(), vec![genesis.hash(), b1.hash(), b2.hash()]);

    let accepted: Vec<_> = harness
        .take_events()
        .into_iter()
        .filter_map(|event| match event {
            Notification::BlockAccepted { hash, .. } => Some(hash),
            _ => None,
        })
        .collect();
    assert_eq!(accepted, vec![b1.hash(), b2.hash()]);
}

#[test]
fn test_orphan_waits_for_every_missing_parent() {
    let harness = TestDag::new();
    let genesis = harness.genesis();
    let a = child_of(&[&genesis], Vec::new());
    let b = child_of(&[&genesis], Vec::new());
    let merge = child_of(&[&a, &b], Vec::new());

    let mut missing = vec![a.hash(), b.hash()];
    missing.sort();
    assert_eq!(harness.process(&merge), ProcessOutcome::Orphan { missing });

    assert!(harness.process(&a).is_accepted());
    assert!(harness.dag.is_known_orphan(&merge.hash()));

    assert!(harness.process(&b).is_accepted());
    assert!(!harness.dag.is_known_orphan(&merge.hash()));
    assert!(harness.dag.is_in_main_view(&merge.hash()));
    assert_eq!(harness.dag.tips(), vec![merge.hash()]);

    let node = harness.dag.block_node(&merge.hash()).unwrap();
    assert_eq!(node.height, 2);
    // Equal work on both parents: the smaller hash is selected.
    assert_eq!(node.selected_parent, Some(a.hash().min(b.hash())));
}

#[test]
fn test_merge_block_keeps_only_selected_chain_in_utxo_set() {
    let harness = TestDag::new();
    let genesis = harness.genesis();
    let a = child_of(&[&genesis], Vec::new());
    let b = child_of(&[&genesis], Vec::new());
    assert!(harness.process(&a).is_accepted());
    assert!(harness.process(&b).is_accepted());

    let merge = child_of(&[&a, &b], Vec::new());
    assert_eq!(harness.process(&merge), ProcessOutcome::MainView);

    let (selected, other) = if a.hash() < b.hash() { (&a, &b) } else { (&b, &a) };
    assert!(harness.dag.is_in_main_view(&selected.hash()));
    assert!(!harness.dag.is_in_main_view(&other.hash()));
    assert!(harness.dag.utxo_entry(&coinbase_outpoint(selected)).unwrap().is_some());
    assert!(harness.dag.utxo_entry(&coinbase_outpoint(other)).unwrap().is_none());
    assert_eq!(harness.dag.utxo_set().unwrap().len(), 2);
}

#[test]
fn test_height_must_follow_highest_parent() {
    let harness = TestDag::new();
    let genesis = harness.genesis();
    let b1 = child_of(&[&genesis], Vec::new());
    assert!(harness.process(&b1).is_accepted());

    let skipped = BlockSpec::on(&[&genesis]).height(2).mine();
    assert_eq!(rejected_code(&harness.process(&skipped)), ErrorCode::HeightMismatch);

    // Two parents at heights 0 and 1: the child must be at height 2.
    let low = BlockSpec::on(&[&genesis, &b1]).height(1).mine();
    assert_eq!(rejected_code(&harness.process(&low)), ErrorCode::HeightMismatch);

    let ok = BlockSpec::on(&[&genesis, &b1]).mine();
    assert_eq!(harness.process(&ok), ProcessOutcome::MainView);
    assert_eq!(harness.dag.block_count(), 3);
}

#[test]
fn test_resubmission_is_idempotent() {
    let harness = TestDag::new();
    let genesis = harness.genesis();
    let b1 = child_of(&[&genesis], Vec::new());

    assert_eq!(harness.process(&b1), ProcessOutcome::MainView);
    harness.take_events();
    let utxos = harness.dag.utxo_set().unwrap();

    assert_eq!(harness.process(&b1), ProcessOutcome::MainView);
    assert_eq!(harness.dag.block_count(), 2);
    assert_eq!(harness.dag.utxo_set().unwrap(), utxos);
    assert!(harness.take_events().is_empty());

    // Same header, different body.
    let mut forged = b1.clone();
    forged.transactions[0].outputs[0].value -= 1;
    assert_eq!(rejected_code(&harness.process(&forged)), ErrorCode::DuplicateBlock);
}

#[test]
fn test_future_timestamp_accepted_once_network_time_catches_up() {
    let harness = TestDag::new();
    let genesis = harness.genesis();
    let ahead = BlockSpec::on(&[&genesis]).timestamp((NOW + 3 * 60 * 60) as u64).mine();

    assert_eq!(rejected_code(&harness.process(&ahead)), ErrorCode::TimeTooNew);
    assert!(!harness.dag.have_block(&ahead.hash()));

    for peer in 0..5 {
        harness.clock.add_time_sample(&format!("peer-{peer}"), NOW + 60 * 60);
    }
    assert_eq!(harness.clock.adjusted_time(), NOW + 60 * 60);

    // Rejections are not cached, so the block is validated afresh.
    assert_eq!(harness.process(&ahead), ProcessOutcome::MainView);
}

#[test]
fn test_timestamp_must_exceed_median_time_past() {
    let harness = TestDag::new();
    let genesis = harness.genesis();
    let stale = BlockSpec::on(&[&genesis]).timestamp(genesis.header.timestamp).mine();

    assert_eq!(rejected_code(&harness.process(&stale)), ErrorCode::TimeTooOld);

    let outcome = harness
        .dag
        .process_block(&stale, BehaviorFlags::NO_TIMESTAMP_CHECK)
        .unwrap();
    assert_eq!(outcome, ProcessOutcome::MainView);
}

#[test]
fn test_proof_of_work_and_target_range() {
    let harness = TestDag::new();
    let genesis = harness.genesis();

    let weak = unmine(BlockSpec::on(&[&genesis]).build());
    assert_eq!(rejected_code(&harness.process(&weak)), ErrorCode::HighHash);
    let outcome = harness.dag.process_block(&weak, BehaviorFlags::NO_POW_CHECK).unwrap();
    assert_eq!(outcome, ProcessOutcome::MainView);

    let too_easy = BlockSpec::on(&[&genesis]).bits(0x217fffff).build();
    assert_eq!(rejected_code(&harness.process(&too_easy)), ErrorCode::TargetOutOfRange);
}

#[test]
fn test_double_spend_in_block_changes_nothing() {
    let harness = TestDag::new();
    let genesis = harness.genesis();
    let chain = extend_chain(&harness, &genesis, 2);
    let funding = coinbase_outpoint(&chain[0]);
    harness.take_events();

    let before_utxos = harness.dag.utxo_set().unwrap();
    let before_best = harness.dag.best_snapshot().unwrap();

    let first = spend(funding, &[], None, 10 * dagchain_core::consensus::COIN);
    let second = spend(funding, &[], None, 20 * dagchain_core::consensus::COIN);
    let block = child_of(&[&chain[1]], vec![first, second]);

    assert_eq!(rejected_code(&harness.process(&block)), ErrorCode::DoubleSpend);
    assert_eq!(harness.dag.utxo_set().unwrap(), before_utxos);
    assert_eq!(harness.dag.best_snapshot().unwrap(), before_best);
    assert!(!harness.dag.have_block(&block.hash()));
    assert!(harness.take_events().is_empty());

    // Still rejected on resubmission.
    assert_eq!(rejected_code(&harness.process(&block)), ErrorCode::DoubleSpend);
}

#[test]
fn test_spend_rules() {
    let harness = TestDag::new();
    let genesis = harness.genesis();
    let chain = extend_chain(&harness, &genesis, 2);
    let tip = &chain[1];

    let unknown = spend(dagchain_core::OutPoint::new([7u8; 32], 0), &[], None, 1);
    let block = child_of(&[tip], vec![unknown]);
    let outcome = harness.process(&block);
    assert_eq!(rejected_code(&outcome), ErrorCode::MissingOrSpentInput);
    assert_eq!(outcome.rule_error().unwrap().code.as_str(), "ErrMissingTxOut");

    // chain[1]'s coinbase is one block deep at the next height.
    let immature = spend(coinbase_outpoint(tip), &[], None, 1);
    let block = child_of(&[tip], vec![immature]);
    assert_eq!(rejected_code(&harness.process(&block)), ErrorCode::ImmatureCoinbaseSpend);

    let greedy = spend(coinbase_outpoint(&chain[0]), &[], None, subsidy(1) + 1);
    let block = child_of(&[tip], vec![greedy]);
    assert_eq!(rejected_code(&harness.process(&block)), ErrorCode::SpendTooHigh);

    let overpaid = BlockSpec::on(&[tip])
        .coinbase(coinbase_to(subsidy(3) + 1, Vec::new()))
        .mine();
    assert_eq!(rejected_code(&harness.process(&overpaid)), ErrorCode::BadCoinbaseValue);

    // Fees may be claimed by the coinbase.
    let paying = spend(coinbase_outpoint(&chain[0]), &[], None, subsidy(1) - 1_000);
    let block = BlockSpec::on(&[tip])
        .coinbase(coinbase_to(subsidy(3) + 1_000, Vec::new()))
        .txs(vec![paying.clone()])
        .mine();
    assert_eq!(harness.process(&block), ProcessOutcome::MainView);
    assert!(harness.dag.utxo_entry(&coinbase_outpoint(&chain[0])).unwrap().is_none());
    let created = dagchain_core::OutPoint::new(paying.txid(), 0);
    let entry = harness.dag.utxo_entry(&created).unwrap().unwrap();
    assert!(!entry.is_coinbase);
    assert_eq!(entry.value, subsidy(1) - 1_000);
}

#[test]
fn test_signed_spend_and_signature_cache() {
    let harness = TestDag::new();
    let genesis = harness.genesis();
    let (secret, public) = keypair(3);
    let (wrong_secret, _) = keypair(4);
    let lock = p2pk(&public);

    let funded = BlockSpec::on(&[&genesis])
        .coinbase(coinbase_to(subsidy(1), lock.clone()))
        .mine();
    assert!(harness.process(&funded).is_accepted());
    let chain = extend_chain(&harness, &funded, 1);
    let outpoint = coinbase_outpoint(&funded);

    let forged = spend(outpoint, &lock, Some(&wrong_secret), 1_000);
    let block = child_of(&[&chain[0]], vec![forged]);
    assert_eq!(rejected_code(&harness.process(&block)), ErrorCode::ScriptValidation);

    let unsigned = spend(outpoint, &lock, None, 1_000);
    let block = child_of(&[&chain[0]], vec![unsigned]);
    assert_eq!(rejected_code(&harness.process(&block)), ErrorCode::ScriptValidation);

    assert!(harness.dag.sig_cache().is_empty());
    let signed = spend(outpoint, &lock, Some(&secret), 1_000);
    let block = child_of(&[&chain[0]], vec![signed]);
    assert_eq!(harness.process(&block), ProcessOutcome::MainView);
    assert_eq!(harness.dag.sig_cache().len(), 1);
}

#[test]
fn test_storage_failure_leaves_state_untouched() {
    let harness = TestDag::new();
    let genesis = harness.genesis();
    let b1 = child_of(&[&genesis], Vec::new());

    harness.store.fail_next_commit();
    let err = harness.dag.process_block(&b1, BehaviorFlags::NONE).unwrap_err();
    assert!(matches!(err, DagError::Storage(_)));
    assert!(err.is_fatal());

    assert!(!harness.dag.have_block(&b1.hash()));
    assert_eq!(harness.dag.best_snapshot().unwrap().hash, genesis.hash());
    assert!(harness.dag.utxo_set().unwrap().is_empty());
    assert!(harness.take_events().is_empty());

    assert_eq!(harness.process(&b1), ProcessOutcome::MainView);
}

#[test]
fn test_orphan_commit_failure_keeps_parent_outcome() {
    let harness = TestDag::new();
    let genesis = harness.genesis();
    let parent = child_of(&[&genesis], Vec::new());
    let child = child_of(&[&parent], Vec::new());

    assert_eq!(harness.process(&child), ProcessOutcome::Orphan { missing: vec![parent.hash()] });
    harness.store.fail_commit_after(1);
    assert_eq!(harness.process(&parent), ProcessOutcome::MainView);

    assert_eq!(harness.dag.best_snapshot().unwrap().hash, parent.hash());
    assert!(!harness.dag.have_block(&child.hash()));
    assert!(harness.dag.is_known_orphan(&child.hash()));
    assert_eq!(
        harness.take_events(),
        vec![
            Notification::BlockConnected { hash: parent.hash(), height: 1 },
            Notification::BlockAccepted { hash: parent.hash(), height: 1, main_view: true },
        ]
    );

    // Resubmitting the pooled child connects it.
    assert_eq!(harness.process(&child), ProcessOutcome::MainView);
    assert!(!harness.dag.is_known_orphan(&child.hash()));
    assert_eq!(harness.dag.best_snapshot().unwrap().hash, child.hash());
}

#[test]
fn test_returned_orphan_connects_after_next_block() {
    let harness = TestDag::new();
    let genesis = harness.genesis();
    let parent = child_of(&[&genesis], Vec::new());
    let child = child_of(&[&parent], Vec::new());
    let grandchild = child_of(&[&child], Vec::new());

    harness.process(&grandchild);
    harness.process(&child);
    harness.store.fail_commit_after(1);
    assert_eq!(harness.process(&parent), ProcessOutcome::MainView);
    assert_eq!(harness.dag.orphan_count(), 2);

    let sibling = child_of(&[&genesis], Vec::new());
    assert!(harness.process(&sibling).is_accepted());
    assert_eq!(harness.dag.orphan_count(), 0);
    assert_eq!(harness.dag.best_snapshot().unwrap().hash, grandchild.hash());
    assert_eq!(
        harness.dag.main_view(),
        vec![genesis.hash(), parent.hash(), child.hash(), grandchild.hash()]
    );
}

#[test]
fn test_checkpoint_mismatch_is_rejected() {
    let params = NetworkParams::regtest().with_checkpoints(vec![Checkpoint { height: 1, hash: [9u8; 32] }]);
    let genesis = params.genesis_block.clone();
    let store = Arc::new(MemoryStore::new());
    let dag = BlockDag::new(DagConfig::new(params, store)).unwrap();

    let b1 = child_of(&[&genesis], Vec::new());
    let outcome = dag.process_block(&b1, BehaviorFlags::NONE).unwrap();
    assert_eq!(rejected_code(&outcome), ErrorCode::BadCheckpoint);
    assert_eq!(dag.block_count(), 1);
}

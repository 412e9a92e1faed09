//! Block validation stages
//!
//! `check_block_sanity` needs nothing but the block; `check_block_context`
//! needs the selected parent from the index; `connect_block_transactions`
//! needs a UTXO view positioned at the block's selected ancestry.

use std::collections::HashSet;
use tracing::debug;

use crate::consensus::difficulty::{
    check_proof_of_work, check_required_difficulty, check_target_range, is_retarget_height, retarget,
};
use crate::consensus::params::{NetworkParams, MAX_MONEY};
use crate::consensus::checkpoint::verify_against_checkpoints;
use crate::dag::index::{BlockIndex, BlockNode};
use crate::dag::utxo::{SpendJournal, UtxoView};
use crate::dag::BehaviorFlags;
use crate::error::{rule_error, DagError, DagResult, ErrorCode, RuleError};
use crate::hash::{short_hex, Hash256};
use crate::script::ScriptJob;
use crate::types::{Block, OutPoint, Transaction};

/// Bounds on the coinbase signature script length
pub const MIN_COINBASE_SCRIPT_LEN: usize = 2;
pub const MAX_COINBASE_SCRIPT_LEN: usize = 100;

/// Context-free checks of a transaction
pub fn check_transaction_sanity(tx: &Transaction) -> Result<(), RuleError> {
    let txid = tx.txid();
    if tx.inputs.is_empty() {
        return Err(rule_error(
            ErrorCode::NoTxInputs,
            format!("transaction {} has no inputs", hex::encode(txid)),
        ));
    }
    if tx.outputs.is_empty() {
        return Err(rule_error(
            ErrorCode::NoTxOutputs,
            format!("transaction {} has no outputs", hex::encode(txid)),
        ));
    }

    let mut total: u64 = 0;
    for (index, output) in tx.outputs.iter().enumerate() {
        if output.value > MAX_MONEY {
            return Err(rule_error(
                ErrorCode::BadTxOutValue,
                format!("output {} of tx {} pays {} which exceeds the money supply", index, hex::encode(txid), output.value),
            ));
        }
        total = match total.checked_add(output.value) {
            Some(sum) if sum <= MAX_MONEY => sum,
            _ => {
                return Err(rule_error(
                    ErrorCode::BadTxOutValue,
                    format!("total output value of tx {} exceeds the money supply", hex::encode(txid)),
                ))
            }
        };
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.previous_output) {
            return Err(rule_error(
                ErrorCode::DuplicateTxInputs,
                format!("transaction {} spends {} twice", hex::encode(txid), input.previous_output),
            ));
        }
    }

    if tx.is_coinbase() {
        let len = tx.inputs[0].signature_script.len();
        if !(MIN_COINBASE_SCRIPT_LEN..=MAX_COINBASE_SCRIPT_LEN).contains(&len) {
            return Err(rule_error(
                ErrorCode::BadCoinbaseScriptLen,
                format!(
                    "coinbase script length {} is out of range [{}, {}]",
                    len, MIN_COINBASE_SCRIPT_LEN, MAX_COINBASE_SCRIPT_LEN
                ),
            ));
        }
    } else if let Some(input) = tx.inputs.iter().find(|input| input.previous_output.is_null()) {
        return Err(rule_error(
            ErrorCode::BadTxInput,
            format!("transaction {} input references null outpoint {}", hex::encode(txid), input.previous_output),
        ));
    }

    Ok(())
}

/// Checks that need no chain context: parent list, proof of work,
/// transaction list shape and the merkle commitment
pub fn check_block_sanity(block: &Block, params: &NetworkParams, flags: BehaviorFlags) -> Result<(), RuleError> {
    let header = &block.header;
    let hash = block.hash();

    if header.parents.is_empty() {
        return Err(rule_error(
            ErrorCode::NoParents,
            format!("block {} has no parents", hex::encode(hash)),
        ));
    }
    if header.parents.len() > params.max_block_parents {
        return Err(rule_error(
            ErrorCode::TooManyParents,
            format!("block references {} parents, limit is {}", header.parents.len(), params.max_block_parents),
        ));
    }
    let mut parents = HashSet::with_capacity(header.parents.len());
    if let Some(dup) = header.parents.iter().find(|p| !parents.insert(**p)) {
        return Err(rule_error(
            ErrorCode::DuplicateParents,
            format!("parent {} referenced more than once", hex::encode(dup)),
        ));
    }

    let target = check_target_range(params, header.bits)?;
    if !flags.contains(BehaviorFlags::NO_POW_CHECK) {
        check_proof_of_work(&hash, &target)?;
    }

    if block.transactions.is_empty() {
        return Err(rule_error(ErrorCode::NoTransactions, "block does not contain any transactions"));
    }
    if block.transactions.len() > params.max_block_transactions {
        return Err(rule_error(
            ErrorCode::TooManyTransactions,
            format!(
                "block contains {} transactions, limit is {}",
                block.transactions.len(),
                params.max_block_transactions
            ),
        ));
    }
    let size = block.serialized_size();
    if size > params.max_block_size {
        return Err(rule_error(
            ErrorCode::BlockTooBig,
            format!("serialized block is {} bytes, limit is {}", size, params.max_block_size),
        ));
    }

    if !block.transactions[0].is_coinbase() {
        return Err(rule_error(
            ErrorCode::FirstTxNotCoinbase,
            "first transaction in block is not a coinbase",
        ));
    }
    if let Some(position) = block.transactions.iter().skip(1).position(Transaction::is_coinbase) {
        return Err(rule_error(
            ErrorCode::MultipleCoinbases,
            format!("block contains second coinbase at index {}", position + 1),
        ));
    }

    for tx in &block.transactions {
        check_transaction_sanity(tx)?;
    }

    let computed = block.compute_merkle_root();
    if computed != header.merkle_root {
        return Err(rule_error(
            ErrorCode::BadMerkleRoot,
            format!(
                "block merkle root is invalid: header indicates {}, computed {}",
                hex::encode(header.merkle_root),
                hex::encode(computed)
            ),
        ));
    }

    let mut txids = HashSet::with_capacity(block.transactions.len());
    for tx in &block.transactions {
        let txid = tx.txid();
        if !txids.insert(txid) {
            return Err(rule_error(
                ErrorCode::DuplicateTx,
                format!("block contains duplicate transaction {}", hex::encode(txid)),
            ));
        }
    }

    Ok(())
}

/// Median timestamp of the last `median_time_blocks` blocks on the
/// selected-parent chain ending at `hash`
pub fn median_time_past(index: &BlockIndex, hash: &Hash256, params: &NetworkParams) -> u64 {
    let mut timestamps: Vec<u64> = index
        .selected_ancestors(hash)
        .take(params.median_time_blocks.max(1))
        .map(|node| node.header.timestamp)
        .collect();
    if timestamps.is_empty() {
        return 0;
    }
    timestamps.sort_unstable();
    timestamps[timestamps.len() / 2]
}

/// Target a child of `parent` at `height` must meet
pub fn required_bits_for_child(
    index: &BlockIndex,
    parent: &BlockNode,
    height: u64,
    params: &NetworkParams,
) -> Result<u32, RuleError> {
    if !is_retarget_height(params, height) {
        return Ok(parent.required_bits);
    }

    let interval = params.retarget_interval() as usize;
    let first = index
        .selected_ancestors(&parent.hash)
        .take(interval)
        .last()
        .map(|node| node.header.timestamp)
        .unwrap_or(parent.header.timestamp);
    let timespan = parent.header.timestamp.saturating_sub(first);
    retarget(params, parent.required_bits, timespan)
}

/// Checks against the block's ancestry. Returns the required bits the
/// block was measured against.
pub fn check_block_context(
    index: &BlockIndex,
    block: &Block,
    selected_parent: &BlockNode,
    params: &NetworkParams,
    adjusted_time: i64,
    flags: BehaviorFlags,
) -> Result<u32, RuleError> {
    let header = &block.header;
    let hash = block.hash();

    // Every parent is indexed by the time contextual checks run.
    let max_parent_height = header
        .parents
        .iter()
        .filter_map(|parent| index.lookup(parent))
        .map(|node| node.height)
        .max()
        .unwrap_or(0);
    let expected_height = max_parent_height + 1;
    if header.height != expected_height {
        return Err(rule_error(
            ErrorCode::HeightMismatch,
            format!("block declares height {}, parents imply {}", header.height, expected_height),
        ));
    }

    if !flags.contains(BehaviorFlags::NO_TIMESTAMP_CHECK) {
        let mtp = median_time_past(index, &selected_parent.hash, params);
        if header.timestamp <= mtp {
            return Err(rule_error(
                ErrorCode::TimeTooOld,
                format!("block timestamp {} is not after median time past {}", header.timestamp, mtp),
            ));
        }

        let max_timestamp = adjusted_time.saturating_add(params.max_future_block_time.as_secs() as i64);
        if header.timestamp as i128 > max_timestamp as i128 {
            return Err(rule_error(
                ErrorCode::TimeTooNew,
                format!(
                    "block timestamp {} is too far in the future (limit {})",
                    header.timestamp, max_timestamp
                ),
            ));
        }
    }

    let required = required_bits_for_child(index, selected_parent, header.height, params)?;
    check_required_difficulty(header.bits, required)?;

    verify_against_checkpoints(params, header.height, &hash)?;

    debug!("Contextual checks passed for block {} at height {}", short_hex(&hash), header.height);
    Ok(required)
}

/// Connect `block` into `view`, enforcing spend rules. Script checks are
/// returned as jobs for the caller to run.
pub fn connect_block_transactions<'b>(
    view: &mut UtxoView<'_>,
    block: &'b Block,
    params: &NetworkParams,
) -> DagResult<(SpendJournal, Vec<ScriptJob<'b>>)> {
    let height = block.height();
    let mut journal = SpendJournal::default();
    let mut jobs = Vec::new();
    let mut spent_in_block: HashSet<OutPoint> = HashSet::new();
    let mut total_fees: u64 = 0;

    for tx in &block.transactions {
        if tx.is_coinbase() {
            journal.spent.push(view.connect_transaction(tx, height)?);
            continue;
        }

        let txid = tx.txid();
        for input in &tx.inputs {
            if !spent_in_block.insert(input.previous_output) {
                return Err(DagError::Rule(rule_error(
                    ErrorCode::DoubleSpend,
                    format!(
                        "output {} spent by tx {} was already spent earlier in the block",
                        input.previous_output,
                        hex::encode(txid)
                    ),
                )));
            }
        }

        let spent = view.connect_transaction(tx, height)?;

        let mut input_total: u64 = 0;
        for (input_index, item) in spent.iter().enumerate() {
            if item.entry.is_coinbase {
                let depth = height.saturating_sub(item.entry.height);
                if depth < params.coinbase_maturity {
                    return Err(DagError::Rule(rule_error(
                        ErrorCode::ImmatureCoinbaseSpend,
                        format!(
                            "tx {} spends coinbase output {} from height {} at height {}; maturity is {}",
                            hex::encode(txid),
                            item.outpoint,
                            item.entry.height,
                            height,
                            params.coinbase_maturity
                        ),
                    )));
                }
            }
            input_total = input_total
                .checked_add(item.entry.value)
                .filter(|sum| *sum <= MAX_MONEY)
                .ok_or_else(|| {
                    DagError::Rule(rule_error(
                        ErrorCode::BadTxOutValue,
                        format!("total input value of tx {} exceeds the money supply", hex::encode(txid)),
                    ))
                })?;
            jobs.push(ScriptJob {
                tx,
                input_index,
                prev_script: item.entry.script_pubkey.clone(),
            });
        }

        let output_total = tx.total_output().unwrap_or(u64::MAX);
        if input_total < output_total {
            return Err(DagError::Rule(rule_error(
                ErrorCode::SpendTooHigh,
                format!(
                    "tx {} spends {} but its inputs only provide {}",
                    hex::encode(txid),
                    output_total,
                    input_total
                ),
            )));
        }
        total_fees = total_fees.saturating_add(input_total - output_total);
        journal.spent.push(spent);
    }

    let allowed = params.subsidy(height).saturating_add(total_fees);
    let paid = block.transactions[0].total_output().unwrap_or(u64::MAX);
    if paid > allowed {
        return Err(DagError::Rule(rule_error(
            ErrorCode::BadCoinbaseValue,
            format!("coinbase pays {} which is more than subsidy plus fees {}", paid, allowed),
        )));
    }

    Ok((journal, jobs))
}

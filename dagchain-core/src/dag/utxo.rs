//! UTXO view
//!
//! A copy-on-write overlay over the persisted unspent-output set. Blocks are
//! connected and disconnected against the overlay only; nothing reaches the
//! store until [`UtxoView::commit`] stages the overlay into a write batch.
//! Dropping the view discards every speculative change.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{rule_error, DagError, DagResult, ErrorCode};
use crate::storage::{get_record, utxo_key, KvStore, StorageError, WriteBatch};
use crate::types::{Block, OutPoint, Transaction};

/// An unspent output together with where it was created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoEntry {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
    pub is_coinbase: bool,
    /// Height of the block that created the output
    pub height: u64,
}

/// An output consumed by a connected transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpentOutput {
    pub outpoint: OutPoint,
    pub entry: UtxoEntry,
}

/// Everything a connected block spent, per transaction in block order.
/// Needed to disconnect the block again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendJournal {
    pub spent: Vec<Vec<SpentOutput>>,
}

impl SpendJournal {
    pub fn spent_count(&self) -> usize {
        self.spent.iter().map(Vec::len).sum()
    }
}

/// Overlay of modified outpoints; `None` marks a removed entry
pub struct UtxoView<'a> {
    store: &'a dyn KvStore,
    overlay: HashMap<OutPoint, Option<UtxoEntry>>,
}

impl<'a> UtxoView<'a> {
    pub fn new(store: &'a dyn KvStore) -> Self {
        Self {
            store,
            overlay: HashMap::new(),
        }
    }

    pub fn fetch(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StorageError> {
        match self.overlay.get(outpoint) {
            Some(entry) => Ok(entry.clone()),
            None => get_record(self.store, &utxo_key(outpoint)),
        }
    }

    /// Spend every input of `tx` and add its outputs at `height`.
    ///
    /// Returns the spent entries in input order. A missing or already spent
    /// input fails with `MissingOrSpentInput`, an output that would replace
    /// an unspent entry of the same txid fails with `OverwriteTx`. Either
    /// failure leaves the view untouched. Locking scripts are not evaluated
    /// here.
    pub fn connect_transaction(&mut self, tx: &Transaction, height: u64) -> DagResult<Vec<SpentOutput>> {
        let mut spent = Vec::new();
        if !tx.is_coinbase() {
            spent.reserve(tx.inputs.len());
            for input in &tx.inputs {
                let outpoint = input.previous_output;
                let entry = self.fetch(&outpoint)?.ok_or_else(|| {
                    DagError::Rule(rule_error(
                        ErrorCode::MissingOrSpentInput,
                        format!(
                            "output {} referenced by tx {} is missing or already spent",
                            outpoint,
                            hex::encode(tx.txid())
                        ),
                    ))
                })?;
                spent.push(SpentOutput { outpoint, entry });
            }
        }

        let txid = tx.txid();
        for index in 0..tx.outputs.len() {
            let outpoint = OutPoint::new(txid, index as u32);
            if self.fetch(&outpoint)?.is_some() {
                return Err(DagError::Rule(rule_error(
                    ErrorCode::OverwriteTx,
                    format!("tx {} would overwrite unspent output {}", hex::encode(txid), outpoint),
                )));
            }
        }

        for item in &spent {
            self.overlay.insert(item.outpoint, None);
        }

        let is_coinbase = tx.is_coinbase();
        for (index, output) in tx.outputs.iter().enumerate() {
            self.overlay.insert(
                OutPoint::new(txid, index as u32),
                Some(UtxoEntry {
                    value: output.value,
                    script_pubkey: output.script_pubkey.clone(),
                    is_coinbase,
                    height,
                }),
            );
        }
        Ok(spent)
    }

    /// Undo `connect_transaction`: drop the outputs of `tx` and restore the
    /// entries it spent
    pub fn disconnect_transaction(&mut self, tx: &Transaction, spent: &[SpentOutput]) {
        let txid = tx.txid();
        for index in 0..tx.outputs.len() {
            self.overlay.insert(OutPoint::new(txid, index as u32), None);
        }
        for item in spent.iter().rev() {
            self.overlay.insert(item.outpoint, Some(item.entry.clone()));
        }
    }

    /// Connect every transaction of an already validated block
    pub fn connect_block(&mut self, block: &Block) -> DagResult<SpendJournal> {
        let mut journal = SpendJournal::default();
        for tx in &block.transactions {
            journal.spent.push(self.connect_transaction(tx, block.height())?);
        }
        Ok(journal)
    }

    /// Disconnect a block, transactions in reverse order
    pub fn disconnect_block(&mut self, block: &Block, journal: &SpendJournal) -> DagResult<()> {
        if journal.spent.len() != block.transactions.len() {
            return Err(DagError::Corruption(format!(
                "spend journal of block {} covers {} transactions, block has {}",
                hex::encode(block.hash()),
                journal.spent.len(),
                block.transactions.len()
            )));
        }
        for (tx, spent) in block.transactions.iter().zip(&journal.spent).rev() {
            self.disconnect_transaction(tx, spent);
        }
        Ok(())
    }

    /// Stage the overlay into `batch`
    pub fn commit(self, batch: &mut WriteBatch) -> Result<(), StorageError> {
        let mut changes: Vec<(OutPoint, Option<UtxoEntry>)> = self.overlay.into_iter().collect();
        changes.sort_by(|a, b| a.0.cmp(&b.0));
        for (outpoint, entry) in changes {
            match entry {
                Some(entry) => batch.put_record(utxo_key(&outpoint), &entry)?,
                None => batch.delete(utxo_key(&outpoint)),
            }
        }
        Ok(())
    }

    /// Throw away every speculative change
    pub fn discard(self) {}

    pub fn modified_count(&self) -> usize {
        self.overlay.len()
    }
}

use crate::hash::{hash256, Hash256, ZERO_HASH};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to a specific output of a previous transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    /// Transaction ID
    pub txid: Hash256,
    /// Output index
    pub index: u32,
}

impl OutPoint {
    /// Create a new outpoint
    pub fn new(txid: Hash256, index: u32) -> Self {
        Self { txid, index }
    }

    /// The outpoint referenced by coinbase inputs
    pub fn null() -> Self {
        Self {
            txid: ZERO_HASH,
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.txid == ZERO_HASH
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(self.txid), self.index)
    }
}

/// Transaction input spending a previous output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub previous_output: OutPoint,
    /// Unlocking data; arbitrary extra-nonce bytes for a coinbase
    pub signature_script: Vec<u8>,
    pub sequence: u32,
}

impl TransactionInput {
    pub fn new(previous_output: OutPoint, signature_script: Vec<u8>, sequence: u32) -> Self {
        Self {
            previous_output,
            signature_script,
            sequence,
        }
    }
}

/// Transaction output carrying a value and its locking condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

impl TransactionOutput {
    pub fn new(value: u64, script_pubkey: Vec<u8>) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(
        version: u32,
        inputs: Vec<TransactionInput>,
        outputs: Vec<TransactionOutput>,
        lock_time: u32,
    ) -> Self {
        Self {
            version,
            inputs,
            outputs,
            lock_time,
        }
    }

    /// Build a coinbase transaction. `extra_nonce` lands in the coinbase
    /// signature script and keeps coinbases of sibling blocks distinct.
    pub fn new_coinbase(extra_nonce: Vec<u8>, outputs: Vec<TransactionOutput>) -> Self {
        Self {
            version: 1,
            inputs: vec![TransactionInput::new(OutPoint::null(), extra_nonce, u32::MAX)],
            outputs,
            lock_time: 0,
        }
    }

    /// Transaction identifier
    pub fn txid(&self) -> Hash256 {
        hash256(&self.serialize_for_hash(None))
    }

    /// A coinbase has exactly one input spending the null outpoint
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Sum of output values, `None` on overflow
    pub fn total_output(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }

    /// Digest committed to by the signature for `input_index`.
    ///
    /// Every signature script is blanked, the spent output's locking script
    /// takes the place of the signed input's script, and the input index is
    /// appended.
    pub fn signature_hash(&self, input_index: usize, prev_script: &[u8]) -> Hash256 {
        let mut buffer = self.serialize_for_hash(Some((input_index, prev_script)));
        buffer.extend_from_slice(&(input_index as u32).to_le_bytes());
        hash256(&buffer)
    }

    /// Approximate encoded size in bytes
    pub fn serialized_size(&self) -> usize {
        self.serialize_for_hash(None).len()
    }

    fn serialize_for_hash(&self, signing: Option<(usize, &[u8])>) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(64 + self.inputs.len() * 48 + self.outputs.len() * 40);

        buffer.extend_from_slice(&self.version.to_le_bytes());

        buffer.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for (i, input) in self.inputs.iter().enumerate() {
            buffer.extend_from_slice(&input.previous_output.txid);
            buffer.extend_from_slice(&input.previous_output.index.to_le_bytes());
            let script: &[u8] = match signing {
                Some((idx, prev_script)) if idx == i => prev_script,
                Some(_) => &[],
                None => &input.signature_script,
            };
            buffer.extend_from_slice(&(script.len() as u32).to_le_bytes());
            buffer.extend_from_slice(script);
            buffer.extend_from_slice(&input.sequence.to_le_bytes());
        }

        buffer.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            buffer.extend_from_slice(&output.value.to_le_bytes());
            buffer.extend_from_slice(&(output.script_pubkey.len() as u32).to_le_bytes());
            buffer.extend_from_slice(&output.script_pubkey);
        }

        buffer.extend_from_slice(&self.lock_time.to_le_bytes());
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spend(prev: OutPoint, value: u64) -> Transaction {
        Transaction::new(
            1,
            vec![TransactionInput::new(prev, vec![1, 2, 3], 0)],
            vec![TransactionOutput::new(value, vec![])],
            0,
        )
    }

    #[test]
    fn test_coinbase_detection() {
        let coinbase = Transaction::new_coinbase(vec![0, 1], vec![TransactionOutput::new(50, vec![])]);
        assert!(coinbase.is_coinbase());

        let regular = spend(OutPoint::new([7u8; 32], 0), 10);
        assert!(!regular.is_coinbase());
    }

    #[test]
    fn test_txid_commits_to_signature_script() {
        let a = spend(OutPoint::new([7u8; 32], 0), 10);
        let mut b = a.clone();
        b.inputs[0].signature_script = vec![9];
        assert_ne!(a.txid(), b.txid());
    }

    #[test]
    fn test_signature_hash_ignores_signature_script() {
        let a = spend(OutPoint::new([7u8; 32], 0), 10);
        let mut b = a.clone();
        b.inputs[0].signature_script = vec![9, 9, 9];
        assert_eq!(a.signature_hash(0, b"lock"), b.signature_hash(0, b"lock"));
        assert_ne!(a.signature_hash(0, b"lock"), a.signature_hash(0, b"other"));
    }

    #[test]
    fn test_total_output_overflow() {
        let tx = Transaction::new(
            1,
            vec![],
            vec![
                TransactionOutput::new(u64::MAX, vec![]),
                TransactionOutput::new(1, vec![]),
            ],
            0,
        );
        assert_eq!(tx.total_output(), None);
    }
}

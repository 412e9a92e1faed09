//! Script verification
//!
//! The engine only needs to know whether an unlocking script satisfies a
//! locking script; [`ScriptVerifier`] is that seam. The bundled
//! [`StandardScriptVerifier`] understands two locking forms:
//!
//! - an empty script, spendable by anyone
//! - a 33-byte compressed secp256k1 public key, spendable with a 64-byte
//!   compact ECDSA signature over [`Transaction::signature_hash`]

pub mod sig_cache;

use rayon::prelude::*;
use secp256k1::{ecdsa::Signature, All, Message, PublicKey, Secp256k1, SecretKey};
use tracing::debug;

use crate::error::{rule_error, ErrorCode, RuleError};
use crate::types::Transaction;

pub use sig_cache::{SigCache, SigCacheKey, SigCacheStats};

/// Length of a compressed public key locking script
pub const P2PK_SCRIPT_LEN: usize = 33;

/// Length of a compact signature unlocking script
pub const COMPACT_SIG_LEN: usize = 64;

/// Below this many inputs a block's scripts are checked on the calling thread
const PARALLEL_THRESHOLD: usize = 8;

pub trait ScriptVerifier: Send + Sync {
    /// Check input `input_index` of `tx` against the locking script it spends
    fn verify_input(
        &self,
        tx: &Transaction,
        input_index: usize,
        prev_script: &[u8],
        sig_cache: &SigCache,
    ) -> Result<(), RuleError>;
}

pub struct StandardScriptVerifier {
    secp: Secp256k1<All>,
}

impl StandardScriptVerifier {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::new(),
        }
    }
}

impl Default for StandardScriptVerifier {
    fn default() -> Self {
        Self::new()
    }
}

fn script_failure(tx: &Transaction, input_index: usize, reason: impl std::fmt::Display) -> RuleError {
    rule_error(
        ErrorCode::ScriptValidation,
        format!("input {} of tx {}: {}", input_index, hex::encode(tx.txid()), reason),
    )
}

impl ScriptVerifier for StandardScriptVerifier {
    fn verify_input(
        &self,
        tx: &Transaction,
        input_index: usize,
        prev_script: &[u8],
        sig_cache: &SigCache,
    ) -> Result<(), RuleError> {
        let input = tx
            .inputs
            .get(input_index)
            .ok_or_else(|| script_failure(tx, input_index, "no such input"))?;

        if prev_script.is_empty() {
            return Ok(());
        }
        if prev_script.len() != P2PK_SCRIPT_LEN {
            return Err(script_failure(tx, input_index, "unsupported locking script"));
        }
        if input.signature_script.len() != COMPACT_SIG_LEN {
            return Err(script_failure(
                tx,
                input_index,
                format!("signature script is {} bytes, expected {}", input.signature_script.len(), COMPACT_SIG_LEN),
            ));
        }

        let sighash = tx.signature_hash(input_index, prev_script);
        let key = SigCacheKey::new(sighash, &input.signature_script, prev_script);
        if sig_cache.exists(&key) {
            return Ok(());
        }

        let pubkey = PublicKey::from_slice(prev_script).map_err(|e| script_failure(tx, input_index, e))?;
        let signature =
            Signature::from_compact(&input.signature_script).map_err(|e| script_failure(tx, input_index, e))?;
        let message = Message::from_slice(&sighash).map_err(|e| script_failure(tx, input_index, e))?;

        self.secp
            .verify_ecdsa(&message, &signature, &pubkey)
            .map_err(|e| script_failure(tx, input_index, e))?;

        sig_cache.add(key);
        Ok(())
    }
}

/// One input whose unlocking script still has to be checked
#[derive(Debug, Clone)]
pub struct ScriptJob<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
    pub prev_script: Vec<u8>,
}

/// Check every job, in parallel once there are enough of them. The error
/// reported is the one of the earliest failing job.
pub fn verify_scripts(
    verifier: &dyn ScriptVerifier,
    jobs: &[ScriptJob<'_>],
    sig_cache: &SigCache,
) -> Result<(), RuleError> {
    let check = |job: &ScriptJob<'_>| verifier.verify_input(job.tx, job.input_index, &job.prev_script, sig_cache);

    if jobs.len() < PARALLEL_THRESHOLD {
        return jobs.iter().try_for_each(check);
    }

    debug!("Verifying {} scripts in parallel", jobs.len());
    let failures: Vec<(usize, RuleError)> = jobs
        .par_iter()
        .enumerate()
        .filter_map(|(i, job)| check(job).err().map(|e| (i, e)))
        .collect();

    match failures.into_iter().min_by_key(|(i, _)| *i) {
        Some((_, err)) => Err(err),
        None => Ok(()),
    }
}

/// Locking script paying to `pubkey`
pub fn p2pk_script(pubkey: &PublicKey) -> Vec<u8> {
    pubkey.serialize().to_vec()
}

/// Produce the unlocking script for input `input_index` of `tx`, which
/// spends an output locked by `prev_script`
pub fn sign_input(
    tx: &Transaction,
    input_index: usize,
    prev_script: &[u8],
    secret_key: &SecretKey,
) -> Result<Vec<u8>, secp256k1::Error> {
    let secp = Secp256k1::signing_only();
    let message = Message::from_slice(&tx.signature_hash(input_index, prev_script))?;
    let signature = secp.sign_ecdsa(&message, secret_key);
    Ok(signature.serialize_compact().to_vec())
}

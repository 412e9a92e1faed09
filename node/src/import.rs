//! Offline block import
//!
//! An import file is a sequence of records, each a little-endian `u32`
//! length followed by that many bytes of a bincode-encoded [`Block`]. Blocks
//! may appear in any order; out-of-order blocks wait in the orphan pool
//! until their parents are read.

use std::io::{self, Read, Write};
use thiserror::Error;
use tracing::{debug, info, warn};

use dagchain_core::dag::{BehaviorFlags, BlockDag, ProcessOutcome};
use dagchain_core::error::DagError;
use dagchain_core::hash::short_hex;
use dagchain_core::types::Block;

/// Upper bound on a single record, well above any valid block
pub const MAX_RECORD_LEN: u32 = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to decode block record {index}: {source}")]
    Decode { index: u64, source: bincode::Error },

    #[error("Failed to encode block: {0}")]
    Encode(bincode::Error),

    #[error("Record {index} is truncated")]
    Truncated { index: u64 },

    #[error("Record {index} declares {len} bytes, limit is {MAX_RECORD_LEN}")]
    RecordTooLarge { index: u64, len: u32 },

    #[error("Encoded block is {len} bytes, limit is {MAX_RECORD_LEN}")]
    BlockTooLarge { len: usize },

    #[error("DAG error: {0}")]
    Dag(#[from] DagError),
}

/// Tally of process outcomes over one import
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportStats {
    pub read: u64,
    pub main_view: u64,
    pub side_blocks: u64,
    pub orphans: u64,
    pub rejected: u64,
}

impl ImportStats {
    fn record(&mut self, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::MainView => self.main_view += 1,
            ProcessOutcome::SideBlock => self.side_blocks += 1,
            ProcessOutcome::Orphan { .. } => self.orphans += 1,
            ProcessOutcome::Rejected(_) => self.rejected += 1,
        }
    }
}

/// Append one length-prefixed block record to `writer`
pub fn write_block<W: Write>(writer: &mut W, block: &Block) -> Result<(), ImportError> {
    let bytes = bincode::serialize(block).map_err(ImportError::Encode)?;
    let len = u32::try_from(bytes.len())
        .ok()
        .filter(|len| *len <= MAX_RECORD_LEN)
        .ok_or(ImportError::BlockTooLarge { len: bytes.len() })?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&bytes)?;
    Ok(())
}

/// Read the next record, `None` at a clean end of input
pub fn read_block<R: Read>(reader: &mut R, index: u64) -> Result<Option<Block>, ImportError> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    match filled {
        0 => return Ok(None),
        4 => {}
        _ => return Err(ImportError::Truncated { index }),
    }

    let len = u32::from_le_bytes(len_buf);
    if len > MAX_RECORD_LEN {
        return Err(ImportError::RecordTooLarge { index, len });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => ImportError::Truncated { index },
        _ => ImportError::Io(e),
    })?;
    let block = bincode::deserialize(&body).map_err(|source| ImportError::Decode { index, source })?;
    Ok(Some(block))
}

/// Feeds a stream of block records through `BlockDag::process_block`
pub struct BlockImporter<'a> {
    dag: &'a BlockDag,
    flags: BehaviorFlags,
}

impl<'a> BlockImporter<'a> {
    pub fn new(dag: &'a BlockDag) -> Self {
        Self {
            dag,
            flags: BehaviorFlags::NONE,
        }
    }

    pub fn with_flags(mut self, flags: BehaviorFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Import every record from `reader`. Rejected blocks are logged and
    /// skipped; storage or corruption errors abort the import.
    pub fn import_from<R: Read>(&self, reader: &mut R) -> Result<ImportStats, ImportError> {
        let mut stats = ImportStats::default();
        while let Some(block) = read_block(reader, stats.read)? {
            stats.read += 1;
            let outcome = self.dag.process_block(&block, self.flags)?;
            match &outcome {
                ProcessOutcome::Rejected(err) => {
                    warn!("Block {} rejected: {}", short_hex(&block.hash()), err)
                }
                _ => debug!("Block {}: {}", short_hex(&block.hash()), outcome),
            }
            stats.record(&outcome);
        }

        self.dag.flush()?;
        info!(
            "Imported {} block(s): {} main view, {} side, {} orphan, {} rejected",
            stats.read, stats.main_view, stats.side_blocks, stats.orphans, stats.rejected
        );
        Ok(stats)
    }
}

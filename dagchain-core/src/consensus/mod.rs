pub mod checkpoint;
pub mod difficulty;
pub mod median_time;
pub mod params;
pub mod work;

pub use median_time::{MedianTime, MedianTimeSource};
pub use params::{Checkpoint, Network, NetworkParams, COIN, MAX_MONEY};
pub use work::{block_work, compact_to_target, hash_meets_target, target_to_compact, U256};

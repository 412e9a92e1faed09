//! Network-adjusted time
//!
//! Peers report their clocks; the median offset from the local clock is
//! applied to produce the adjusted time used for the future-timestamp rule.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use tracing::{debug, warn};

/// Maximum number of offsets kept
pub const MAX_MEDIAN_TIME_ENTRIES: usize = 200;

/// Fewer samples than this leave the offset untouched
const MIN_SAMPLES_FOR_MEDIAN: usize = 5;

/// Medians beyond this many seconds are ignored (70 minutes)
const MAX_ALLOWED_OFFSET_SECS: i64 = 70 * 60;

/// A peer within this many seconds counts as agreeing with us (5 minutes)
const SIMILAR_TIME_SECS: i64 = 5 * 60;

/// Source of the adjusted network time used by block validation
pub trait MedianTimeSource: Send + Sync {
    /// Local time plus the current median offset, in unix seconds
    fn adjusted_time(&self) -> i64;

    /// Record a peer's reported time. Only the first sample per source counts.
    fn add_time_sample(&self, source_id: &str, time: i64);

    /// Current offset applied to the local clock, in seconds
    fn offset(&self) -> i64;
}

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

struct State {
    known_sources: HashSet<String>,
    offsets: VecDeque<i64>,
    offset_secs: i64,
    invalid_time_checked: bool,
}

/// Median of peer clock offsets, bounded and filtered
pub struct MedianTime {
    state: Mutex<State>,
    clock: Clock,
}

impl MedianTime {
    pub fn new() -> Self {
        Self::with_clock(Box::new(|| Utc::now().timestamp()))
    }

    /// Use a custom local clock (unix seconds)
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            state: Mutex::new(State {
                known_sources: HashSet::new(),
                offsets: VecDeque::with_capacity(MAX_MEDIAN_TIME_ENTRIES),
                offset_secs: 0,
                invalid_time_checked: false,
            }),
            clock,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.state.lock().offsets.len()
    }
}

impl Default for MedianTime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MedianTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MedianTime")
            .field("samples", &state.offsets.len())
            .field("offset_secs", &state.offset_secs)
            .finish()
    }
}

impl MedianTimeSource for MedianTime {
    fn adjusted_time(&self) -> i64 {
        (self.clock)() + self.state.lock().offset_secs
    }

    fn add_time_sample(&self, source_id: &str, time: i64) {
        let mut state = self.state.lock();
        if !state.known_sources.insert(source_id.to_string()) {
            return;
        }

        let offset = time - (self.clock)();
        if state.offsets.len() == MAX_MEDIAN_TIME_ENTRIES {
            state.offsets.pop_front();
        }
        state.offsets.push_back(offset);

        let count = state.offsets.len();
        debug!("Added time sample from {} (offset {}s, {} samples)", source_id, offset, count);

        // An even count has no single middle element; wait for the next sample.
        if count < MIN_SAMPLES_FOR_MEDIAN || count % 2 == 0 {
            return;
        }

        let mut sorted: Vec<i64> = state.offsets.iter().copied().collect();
        sorted.sort_unstable();
        let median = sorted[count / 2];

        if median.abs() < MAX_ALLOWED_OFFSET_SECS {
            state.offset_secs = median;
        } else {
            state.offset_secs = 0;
            if !state.invalid_time_checked {
                state.invalid_time_checked = true;
                let peer_agrees = sorted.iter().any(|o| o.abs() < SIMILAR_TIME_SECS);
                if !peer_agrees {
                    warn!("Please check your date and time are correct! Adjusted time is off by more than {} minutes from all peers", MAX_ALLOWED_OFFSET_SECS / 60);
                }
            }
        }
        debug!("New time offset: {}s", state.offset_secs);
    }

    fn offset(&self) -> i64 {
        self.state.lock().offset_secs
    }
}

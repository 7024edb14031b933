//! Network-adjusted time from peer clock samples.
//!
//! Each peer contributes the offset between its clock and ours. Once enough
//! samples exist, the median offset is applied to the local clock. Offsets
//! beyond the skew bound never enter the sample set.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Samples further than this from local time are discarded.
pub const MAX_ALLOWED_OFFSET_SECS: i64 = 70 * 60;

/// Samples needed before any offset is applied.
pub const MIN_SAMPLES: usize = 5;

/// Samples retained; the oldest is evicted beyond this.
pub const MAX_SAMPLES: usize = 200;

/// Source of adjusted time for timestamp validation.
pub trait MedianTimeSource: Send + Sync {
    /// Local clock plus the current offset, in Unix seconds.
    fn adjusted_time(&self) -> i64;

    /// Record that peer `source` reported `time`. One sample is kept per
    /// source; a new report replaces the old one.
    fn add_time_sample(&self, source: &str, time: i64);

    /// Current offset in seconds.
    fn offset(&self) -> i64;
}

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

struct Samples {
    entries: VecDeque<(String, i64)>,
    offset: i64,
    warned: bool,
}

/// Default [`MedianTimeSource`].
pub struct MedianTime {
    samples: Mutex<Samples>,
    clock: Clock,
}

impl Default for MedianTime {
    fn default() -> Self {
        Self::new()
    }
}

impl MedianTime {
    /// Source backed by the system clock.
    pub fn new() -> Self {
        Self::with_clock(|| time::OffsetDateTime::now_utc().unix_timestamp())
    }

    /// Source backed by a custom clock.
    pub fn with_clock(clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        Self {
            samples: Mutex::new(Samples {
                entries: VecDeque::new(),
                offset: 0,
                warned: false,
            }),
            clock: Box::new(clock),
        }
    }

    /// Number of retained samples.
    pub fn sample_count(&self) -> usize {
        self.samples.lock().entries.len()
    }
}

impl MedianTimeSource for MedianTime {
    fn adjusted_time(&self) -> i64 {
        (self.clock)().saturating_add(self.samples.lock().offset)
    }

    fn add_time_sample(&self, source: &str, time: i64) {
        let delta = time.saturating_sub((self.clock)());
        let mut s = self.samples.lock();

        if delta.abs() > MAX_ALLOWED_OFFSET_SECS {
            if !s.warned {
                s.warned = true;
                warn!(
                    source,
                    delta,
                    "peer clock differs from ours by more than {} minutes; check system time",
                    MAX_ALLOWED_OFFSET_SECS / 60
                );
            }
            return;
        }

        if let Some(pos) = s.entries.iter().position(|(id, _)| id == source) {
            s.entries.remove(pos);
        }
        if s.entries.len() >= MAX_SAMPLES {
            s.entries.pop_front();
        }
        s.entries.push_back((source.to_owned(), delta));

        if s.entries.len() < MIN_SAMPLES {
            s.offset = 0;
            return;
        }

        let mut sorted: Vec<i64> = s.entries.iter().map(|(_, d)| *d).collect();
        sorted.sort_unstable();
        s.offset = sorted[sorted.len() / 2];
        debug!(offset = s.offset, samples = sorted.len(), "time offset updated");
    }

    fn offset(&self) -> i64 {
        self.samples.lock().offset
    }
}

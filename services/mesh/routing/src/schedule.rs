//! Jittered periodic flush timing.

use rand::Rng;
use std::time::Duration;

/// Computes the delay until the next periodic flush.
///
/// The base is the shortest interval any bound accumulator asks for; up to a
/// quarter of it is added at random so siblings do not flush in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct FlushSchedule {
    enabled: bool,
}

impl FlushSchedule {
    /// Schedule for a node; the sink never flushes on a timer
    pub fn new(is_sink: bool) -> Self {
        Self { enabled: !is_sink }
    }

    /// Whether periodic flushing is on
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Unjittered base interval, `None` if disabled or nothing is bound
    pub fn base<I>(&self, intervals: I) -> Option<Duration>
    where
        I: IntoIterator<Item = Duration>,
    {
        if !self.enabled {
            return None;
        }
        intervals.into_iter().min()
    }

    /// Base interval plus up to a quarter of it in jitter
    pub fn next_delay<I, R>(&self, intervals: I, rng: &mut R) -> Option<Duration>
    where
        I: IntoIterator<Item = Duration>,
        R: Rng + ?Sized,
    {
        let base = self.base(intervals)?;
        let spread = base / 4;
        if spread.is_zero() {
            return Some(base);
        }
        let jitter = rng.gen_range(Duration::ZERO..=spread);
        Some(base + jitter)
    }
}

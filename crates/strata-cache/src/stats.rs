//! Per-section cache statistics.
//!
//! Hit/miss/access counters are atomics so the hot fetch path never
//! takes a lock for counting; the running service-time averages are
//! updated under a small mutex because they are read-modify-write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

#[derive(Debug, Default, Clone, Copy)]
struct Timings {
    avg_hit_us: f64,
    hit_samples: u64,
    avg_miss_us: f64,
    miss_samples: u64,
}

fn running_average(avg: f64, samples: u64, elapsed: Duration) -> f64 {
    let us = elapsed.as_secs_f64() * 1_000_000.0;
    avg + (us - avg) / samples as f64
}

/// Live statistics for one cache section.
#[derive(Debug, Default)]
pub struct SectionStats {
    accesses: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    timings: Mutex<Timings>,
}

impl SectionStats {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a hit together with its service time.
    pub fn record_hit(&self, elapsed: Duration) {
        self.accesses.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
        let mut t = self.timings.lock();
        t.hit_samples += 1;
        t.avg_hit_us = running_average(t.avg_hit_us, t.hit_samples, elapsed);
    }

    /// Records a miss. The service time is reported separately once
    /// the load completes, via [`SectionStats::record_miss_time`].
    pub fn record_miss(&self) {
        self.accesses.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the end-to-end service time of a completed miss.
    pub fn record_miss_time(&self, elapsed: Duration) {
        let mut t = self.timings.lock();
        t.miss_samples += 1;
        t.avg_miss_us = running_average(t.avg_miss_us, t.miss_samples, elapsed);
    }

    /// Total accesses.
    pub fn accesses(&self) -> u64 {
        self.accesses.load(Ordering::Relaxed)
    }

    /// Total hits.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total misses.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Takes a consistent copy of the counters and averages.
    pub fn snapshot(&self) -> SectionStatsSnapshot {
        let t = *self.timings.lock();
        SectionStatsSnapshot {
            accesses: self.accesses(),
            hits: self.hits(),
            misses: self.misses(),
            avg_hit_time_us: t.avg_hit_us,
            avg_miss_time_us: t.avg_miss_us,
        }
    }

    /// Resets every counter and average to zero.
    pub fn reset(&self) {
        let mut t = self.timings.lock();
        *t = Timings::default();
        self.accesses.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time copy of a section's statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SectionStatsSnapshot {
    /// Total completed accesses.
    pub accesses: u64,
    /// Accesses served from the section.
    pub hits: u64,
    /// Accesses that required a load from the backing store.
    pub misses: u64,
    /// Running average hit service time in microseconds.
    pub avg_hit_time_us: f64,
    /// Running average miss service time in microseconds.
    pub avg_miss_time_us: f64,
}

impl SectionStatsSnapshot {
    /// The miss rate in `[0, 1]`; zero when there were no accesses.
    pub fn miss_rate(&self) -> f64 {
        if self.accesses == 0 {
            0.0
        } else {
            self.misses as f64 / self.accesses as f64
        }
    }

    /// The hit rate in `[0, 1]`.
    pub fn hit_rate(&self) -> f64 {
        if self.accesses == 0 {
            0.0
        } else {
            self.hits as f64 / self.accesses as f64
        }
    }
}

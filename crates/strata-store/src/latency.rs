//! Far-memory latency injection.
//!
//! Every read and write against the simulated store pays a base
//! latency plus an optional uniform jitter, modeling the network hop
//! to disaggregated memory.

use std::thread;
use std::time::Duration;

use rand::Rng;

/// Latency profile applied to simulated store accesses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyProfile {
    /// Base latency in microseconds. Zero disables the simulation.
    pub base_latency_us: u32,
    /// Uniform jitter in microseconds, applied as `base ± jitter`.
    pub jitter_us: u32,
}

impl LatencyProfile {
    /// A profile that injects no delay.
    pub const NONE: Self = Self {
        base_latency_us: 0,
        jitter_us: 0,
    };

    /// Creates a profile with the given base latency and jitter.
    pub const fn new(base_latency_us: u32, jitter_us: u32) -> Self {
        Self {
            base_latency_us,
            jitter_us,
        }
    }

    /// Sleeps for `base ± jitter` microseconds, clamped at zero.
    pub fn simulate(&self) {
        if self.base_latency_us == 0 {
            return;
        }

        let mut delay = i64::from(self.base_latency_us);
        if self.jitter_us > 0 {
            let jitter = i64::from(self.jitter_us);
            delay += rand::thread_rng().gen_range(-jitter..=jitter);
        }

        if delay > 0 {
            thread::sleep(Duration::from_micros(delay as u64));
        }
    }
}

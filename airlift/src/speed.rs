//! Sliding-window transfer rate sampling

use std::time::{Duration, Instant};

/// Per-transfer byte-rate estimate over a fixed sampling window.
///
/// The first window is backdated so short transfers report a rate almost
/// immediately instead of showing zero until the first full period elapses.
/// Aggregate batch rates are formed by summing the cached rates of all
/// active samplers, which is an approximation rather than a true global
/// window.
pub struct SpeedSampler {
    sampling_period: Duration,
    last: Instant,
    bytes_since_last: u64,
    cached: u64,
}

impl SpeedSampler {
    pub fn new(sampling_period_ms: u64, first_sampling_interval_ms: u64) -> Self {
        let backdate = Duration::from_millis(first_sampling_interval_ms.saturating_sub(100));
        let now = Instant::now();
        Self {
            sampling_period: Duration::from_millis(sampling_period_ms),
            last: now.checked_sub(backdate).unwrap_or(now),
            bytes_since_last: 0,
            cached: 0,
        }
    }

    /// Feed bytes into the current window.
    ///
    /// Returns whether the cached rate advanced; repeated calls inside one
    /// window only accumulate.
    pub fn sample(&mut self, bytes: u64) -> bool {
        self.bytes_since_last += bytes;

        let elapsed = self.last.elapsed();
        if elapsed <= self.sampling_period {
            return false;
        }

        let elapsed_ms = elapsed.as_millis().max(1) as f64;
        let period_ms = self.sampling_period.as_millis() as f64;
        self.cached = (self.bytes_since_last as f64 / elapsed_ms * period_ms) as u64;
        self.last = Instant::now();
        self.bytes_since_last = 0;
        true
    }

    /// Last cached rate in bytes per sampling period; no side effects.
    pub fn speed(&self) -> u64 {
        self.cached
    }
}

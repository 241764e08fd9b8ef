//! Logical simulation time.
//!
//! The simulator never looks at the wall clock. Time is a plain count of
//! nanoseconds since simulation start and only advances when the event queue
//! hands out the next due event.

use rand::Rng;
use rand::rngs::StdRng;
use serde::Deserialize;

/// Simulated time in nanoseconds.
pub type SimTime = u64;

pub const NANOS_PER_MICRO: u64 = 1_000;
pub const NANOS_PER_MILLI: u64 = 1_000_000;

pub fn micros(us: u64) -> SimTime {
    us * NANOS_PER_MICRO
}

pub fn millis(ms: u64) -> SimTime {
    ms * NANOS_PER_MILLI
}

/// Render a timestamp as fractional milliseconds for log lines and summaries.
pub fn format_time(t: SimTime) -> String {
    format!("{:.3} ms", t as f64 / NANOS_PER_MILLI as f64)
}

/// Inclusive interval a processing delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DelayRange {
    pub min_ns: u64,
    pub max_ns: u64,
}

impl DelayRange {
    pub const ZERO: DelayRange = DelayRange { min_ns: 0, max_ns: 0 };

    pub fn new(min_ns: u64, max_ns: u64) -> Self {
        Self { min_ns, max_ns }
    }

    /// Draw a delay uniformly from `[min_ns, max_ns]`.
    ///
    /// A reversed range is treated as the fixed value `min_ns`; the settings
    /// validator rejects such ranges before a simulation is built.
    pub fn sample(&self, rng: &mut StdRng) -> u64 {
        if self.max_ns <= self.min_ns {
            return self.min_ns;
        }
        rng.gen_range(self.min_ns..=self.max_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn unit_conversions() {
        assert_eq!(micros(58), 58_000);
        assert_eq!(millis(3), 3_000_000);
    }

    #[test]
    fn delay_samples_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let range = DelayRange::new(1_000, 5_000);
        for _ in 0..1000 {
            let d = range.sample(&mut rng);
            assert!((1_000..=5_000).contains(&d));
        }
    }

    #[test]
    fn degenerate_range_is_fixed() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(DelayRange::ZERO.sample(&mut rng), 0);
        assert_eq!(DelayRange::new(9, 3).sample(&mut rng), 9);
    }

    #[test]
    fn format_time_uses_milliseconds() {
        assert_eq!(format_time(1_500_000), "1.500 ms");
    }
}

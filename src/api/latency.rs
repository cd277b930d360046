//! In-memory histogram of acquisition attempt durations, fetch through commit.

use std::sync::Mutex;
use std::time::Duration;

/// Shared latency stats. Engine records, API reads.
/// Values stored in milliseconds.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

impl LatencyStats {
    /// Tracks 1ms to 1h, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 3_600_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record_ms(&self, ms: u64) {
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(ms.clamp(1, 3_600_000));
        }
    }

    pub fn record(&self, d: Duration) {
        let ms = d.as_millis().min(u128::from(u64::MAX)) as u64;
        self.record_ms(ms);
    }

    /// Return (p50_ms, p95_ms, p99_ms, max_ms). None if no samples.
    pub fn percentiles(&self) -> Option<(u64, u64, u64, u64)> {
        let h = self.inner.lock().ok()?;
        if h.len() == 0 {
            return None;
        }
        Some((
            h.value_at_quantile(0.5),
            h.value_at_quantile(0.95),
            h.value_at_quantile(0.99),
            h.max(),
        ))
    }

    pub fn len(&self) -> u64 {
        self.inner.lock().map(|h| h.len()).unwrap_or(0)
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        assert!(LatencyStats::new().percentiles().is_none());
    }

    #[test]
    fn records_attempt_durations() {
        let stats = LatencyStats::new();
        for ms in [1_000, 2_000, 3_000, 40_000] {
            stats.record(Duration::from_millis(ms));
        }
        assert_eq!(stats.len(), 4);
        let (p50, _, _, max) = stats.percentiles().unwrap();
        assert!((1_990..=2_010).contains(&p50), "p50 {p50}");
        assert!(max >= 39_000);
    }
}

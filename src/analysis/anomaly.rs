use serde::Serialize;

use crate::analysis::stats;
use crate::config::AnomalyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnomalyVerdict {
    pub is_suspicious: bool,
    /// Median of the reference window, when enough history existed to judge.
    pub median: Option<f64>,
}

impl AnomalyVerdict {
    fn insufficient() -> Self {
        Self { is_suspicious: false, median: None }
    }
}

/// Flags prices implausibly far from the recent median. Suspicious prices are
/// still stored, just never analysed or notified.
#[derive(Debug, Clone)]
pub struct AnomalyGuard {
    cfg: AnomalyConfig,
}

impl AnomalyGuard {
    pub fn new(cfg: AnomalyConfig) -> Self {
        Self { cfg }
    }

    pub fn window_days(&self) -> i64 {
        self.cfg.window_days
    }

    /// `history` is the window's stored prices, suspicious ones included.
    pub fn evaluate(&self, price: f64, history: &[f64]) -> AnomalyVerdict {
        if history.len() < self.cfg.min_samples {
            return AnomalyVerdict::insufficient();
        }
        let Some(median) = stats::median(history).filter(|m| *m > 0.0) else {
            return AnomalyVerdict::insufficient();
        };
        let is_suspicious = price > median * self.cfg.spike_ratio || price < median * self.cfg.crash_ratio;
        AnomalyVerdict { is_suspicious, median: Some(median) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> AnomalyGuard {
        AnomalyGuard::new(AnomalyConfig::default())
    }

    #[test]
    fn spike_is_suspicious_normal_is_not() {
        let history = [980.0, 1000.0, 1000.0, 1020.0, 1000.0];
        assert!(guard().evaluate(3500.0, &history).is_suspicious);
        let normal = guard().evaluate(950.0, &history);
        assert!(!normal.is_suspicious);
        assert_eq!(normal.median, Some(1000.0));
    }

    #[test]
    fn crash_is_suspicious() {
        let history = [1000.0; 6];
        assert!(guard().evaluate(150.0, &history).is_suspicious);
        assert!(!guard().evaluate(250.0, &history).is_suspicious);
    }

    #[test]
    fn thin_history_never_suspicious() {
        let history = [1000.0; 4];
        let v = guard().evaluate(40_000.0, &history);
        assert!(!v.is_suspicious);
        assert_eq!(v.median, None);
    }

    #[test]
    fn ratio_thresholds_are_exclusive() {
        let history = [1000.0; 5];
        assert!(!guard().evaluate(3000.0, &history).is_suspicious);
        assert!(!guard().evaluate(200.0, &history).is_suspicious);
    }
}

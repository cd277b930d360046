use tracing::debug;

use crate::analysis::stats;
use crate::config::{AnalysisConfig, MAD_SCALE};
use crate::types::DealVerdict;

/// The price being judged, with the annotations that gate it.
#[derive(Debug, Clone, Copy)]
pub struct CandidatePrice {
    pub price: f64,
    pub confidence: f64,
    pub is_suspicious: bool,
}

/// Decides whether a price is a deal worth notifying about, relative to the
/// search's own trusted history.
#[derive(Debug, Clone)]
pub struct PriceAnalyzer {
    cfg: AnalysisConfig,
}

impl PriceAnalyzer {
    pub fn new(cfg: AnalysisConfig) -> Self {
        Self { cfg }
    }

    pub fn window_days(&self) -> i64 {
        self.cfg.window_days
    }

    pub fn min_confidence(&self) -> f64 {
        self.cfg.min_confidence
    }

    /// `history` must already be filtered to non-suspicious observations at or
    /// above the confidence threshold, and must not contain the candidate.
    pub fn analyze(&self, search_id: i64, candidate: CandidatePrice, history: &[f64]) -> DealVerdict {
        let median = stats::median(history);
        let mad = stats::mad(history);
        let robust_z_score = self.robust_z(candidate.price, history);
        let is_absolute_new_low = stats::min(history)
            .is_some_and(|low| candidate.price <= low * (1.0 + self.cfg.new_low_tolerance));

        let trusted = candidate.confidence >= self.cfg.min_confidence && !candidate.is_suspicious;
        let unusual = robust_z_score.is_some_and(|z| z <= self.cfg.z_threshold) || is_absolute_new_low;
        let significant = trusted && unusual;

        debug!(
            search_id,
            price = candidate.price,
            z = ?robust_z_score,
            new_low = is_absolute_new_low,
            trusted,
            significant,
            "[ANALYZER] verdict"
        );

        DealVerdict {
            search_id,
            price: candidate.price,
            significant,
            robust_z_score,
            median,
            mad,
            percentile: stats::percentile_rank(history, candidate.price),
            is_absolute_new_low,
            sample_count: history.len(),
        }
    }

    /// None below the sample floor or when the history has no spread.
    pub fn robust_z(&self, price: f64, history: &[f64]) -> Option<f64> {
        if history.len() < self.cfg.min_samples {
            return None;
        }
        let median = stats::median(history)?;
        let mad = stats::mad(history)?;
        if mad == 0.0 {
            return None;
        }
        Some((price - median) / (mad * MAD_SCALE))
    }
}

pub mod analyzer;
pub mod anomaly;
pub mod stats;

pub use analyzer::{CandidatePrice, PriceAnalyzer};
pub use anomaly::{AnomalyGuard, AnomalyVerdict};

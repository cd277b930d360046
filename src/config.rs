use std::path::PathBuf;

use crate::error::{AppError, Result};

pub const SEARCH_BASE_URL: &str = "https://www.google.com/travel/flights";

/// Consecutive failures that open a search's circuit.
pub const CIRCUIT_OPEN_THRESHOLD: u32 = 5;

/// `is_healthy` requires fewer consecutive failures than this.
pub const UNHEALTHY_CONSECUTIVE_FAILURES: u32 = 3;

/// Below this many attempts the success-rate check fails open.
pub const MIN_ATTEMPTS_FOR_SUCCESS_RATE: i64 = 10;

/// Scale factor turning MAD into a standard-deviation estimate for normal data.
pub const MAD_SCALE: f64 = 1.4826;

/// Channel capacity for deal verdicts handed to the notification consumer.
pub const CHANNEL_CAPACITY: usize = 256;

/// Hard bounds used by the field validators.
pub mod field_bounds {
    pub const PRICE_MIN: f64 = 50.0;
    pub const PRICE_MAX: f64 = 50_000.0;
    pub const STOPS_MAX: u8 = 4;
    pub const DURATION_MIN_MINUTES: u32 = 30;
    pub const DURATION_MAX_MINUTES: u32 = 48 * 60;
    /// Confidence lost for each fallback level an extraction strategy sits at.
    pub const FALLBACK_PENALTY: f64 = 0.05;
}

/// Correlation confidence assigned per extraction path.
pub mod correlation {
    pub const SPECIFIC_SELECTOR: f64 = 0.95;
    pub const ACCESSIBILITY: f64 = 0.85;
    pub const DYNAMIC_ANCESTOR: f64 = 0.70;
    pub const PAGE_LEVEL: f64 = 0.30;
    /// Page-level pairing is trivially correct when every field found exactly one value.
    pub const PAGE_LEVEL_SINGLE: f64 = 0.80;
    /// Page-level results never exceed this unless the single-candidate case applies.
    pub const PAGE_LEVEL_CEILING: f64 = 0.70;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Screenshots / HTML snapshots from failed attempts land here (ARTIFACT_DIR).
    pub artifact_dir: PathBuf,
    /// Optional JSON catalog of named searches synced at startup (SEARCHES_FILE).
    pub searches_file: Option<PathBuf>,
    /// How often the scheduler looks for due searches (SCHEDULER_TICK_SECS).
    pub scheduler_tick_secs: u64,
    /// Hard ceiling on a single acquisition attempt (ATTEMPT_TIMEOUT_SECS).
    pub attempt_timeout_secs: u64,
    /// Open circuits are probed at most this often (CIRCUIT_PROBE_INTERVAL_MINS).
    pub circuit_probe_interval_mins: i64,
    /// Concurrent attempts across all searches (MAX_CONCURRENT_ATTEMPTS).
    pub max_concurrent_attempts: usize,
    pub user_agent: String,
    pub search_base_url: String,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "sentinel.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            artifact_dir: std::env::var("ARTIFACT_DIR")
                .unwrap_or_else(|_| "artifacts".to_string())
                .into(),
            searches_file: std::env::var("SEARCHES_FILE").ok().map(PathBuf::from),
            scheduler_tick_secs: std::env::var("SCHEDULER_TICK_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse::<u64>()
                .unwrap_or(60),
            attempt_timeout_secs: std::env::var("ATTEMPT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "90".to_string())
                .parse::<u64>()
                .map_err(|_| AppError::Config("ATTEMPT_TIMEOUT_SECS must be an integer".to_string()))?,
            circuit_probe_interval_mins: std::env::var("CIRCUIT_PROBE_INTERVAL_MINS")
                .unwrap_or_else(|_| "360".to_string())
                .parse::<i64>()
                .unwrap_or(360),
            max_concurrent_attempts: std::env::var("MAX_CONCURRENT_ATTEMPTS")
                .unwrap_or_else(|_| "4".to_string())
                .parse::<usize>()
                .unwrap_or(4)
                .max(1),
            user_agent: std::env::var("USER_AGENT").unwrap_or_else(|_| {
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                 Chrome/126.0 Safari/537.36"
                    .to_string()
            }),
            search_base_url: std::env::var("SEARCH_BASE_URL")
                .unwrap_or_else(|_| SEARCH_BASE_URL.to_string()),
            engine: EngineConfig::from_env()?,
        })
    }
}

// ---------------------------------------------------------------------------
// EngineConfig — every tunable threshold the pipeline reads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub extraction: ExtractionConfig,
    pub anomaly: AnomalyConfig,
    pub analysis: AnalysisConfig,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(v) = env_f64("MIN_CONFIDENCE")? {
            cfg.analysis.min_confidence = v;
        }
        if let Some(v) = env_f64("ANOMALY_SPIKE_RATIO")? {
            cfg.anomaly.spike_ratio = v;
        }
        if let Some(v) = env_f64("ANOMALY_CRASH_RATIO")? {
            cfg.anomaly.crash_ratio = v;
        }
        if let Some(v) = env_f64("DEAL_Z_THRESHOLD")? {
            cfg.analysis.z_threshold = v;
        }
        Ok(cfg)
    }
}

fn env_f64(key: &str) -> Result<Option<f64>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| AppError::Config(format!("{key} must be a number"))),
        Err(_) => Ok(None),
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Weight of correlation confidence in the overall blend; fields get the rest.
    pub correlation_weight: f64,
    /// Candidates below this overall confidence are dropped before storage.
    pub min_overall_confidence: f64,
    pub nonstop_max_minutes: u32,
    pub multi_stop_min_minutes: u32,
    pub cross_validation_penalty: f64,
    pub complete_candidate_bonus: f64,
    /// Price above `median * route_spike_ratio` is penalized.
    pub route_spike_ratio: f64,
    /// Price below `median * route_crash_ratio` is penalized.
    pub route_crash_ratio: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            correlation_weight: 0.6,
            min_overall_confidence: 0.35,
            nonstop_max_minutes: 24 * 60,
            multi_stop_min_minutes: 3 * 60,
            cross_validation_penalty: 0.25,
            complete_candidate_bonus: 0.05,
            route_spike_ratio: 3.0,
            route_crash_ratio: 0.2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    pub window_days: i64,
    pub min_samples: usize,
    pub spike_ratio: f64,
    pub crash_ratio: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            min_samples: 5,
            spike_ratio: 3.0,
            crash_ratio: 0.2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub window_days: i64,
    pub min_confidence: f64,
    /// z-scores need at least this much history.
    pub min_samples: usize,
    pub z_threshold: f64,
    /// Within this fraction of the historical minimum counts as a new low.
    pub new_low_tolerance: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_days: 90,
            min_confidence: 0.60,
            min_samples: 10,
            z_threshold: -1.5,
            new_low_tolerance: 0.02,
        }
    }
}

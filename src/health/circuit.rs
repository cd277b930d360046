//! Per-search scrape health and its two-state circuit breaker.
//!
//! Only the two terminal outcomes of an acquisition attempt mutate this
//! state: `record_success` and `record_failure`. Analysis code reads it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{CIRCUIT_OPEN_THRESHOLD, MIN_ATTEMPTS_FOR_SUCCESS_RATE, UNHEALTHY_CONSECUTIVE_FAILURES};
use crate::types::{DebugArtifacts, FailureReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Monitoring paused; only periodic probes are attempted.
    Open,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "open" {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitTransition {
    Opened,
    Closed,
}

/// What a dashboard shows for a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    CircuitOpen,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeHealth {
    pub search_id: i64,
    pub total_attempts: i64,
    pub total_successes: i64,
    pub total_failures: i64,
    pub consecutive_failures: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_failure_reason: Option<FailureReason>,
    pub last_failure_message: Option<String>,
    pub last_screenshot_path: Option<String>,
    pub last_html_path: Option<String>,
    pub circuit_state: CircuitState,
    pub circuit_opened_at: Option<DateTime<Utc>>,
}

impl ScrapeHealth {
    pub fn new(search_id: i64) -> Self {
        Self {
            search_id,
            total_attempts: 0,
            total_successes: 0,
            total_failures: 0,
            consecutive_failures: 0,
            last_attempt_at: None,
            last_success_at: None,
            last_failure_at: None,
            last_failure_reason: None,
            last_failure_message: None,
            last_screenshot_path: None,
            last_html_path: None,
            circuit_state: CircuitState::Closed,
            circuit_opened_at: None,
        }
    }

    pub fn record_success(&mut self, at: DateTime<Utc>) -> Option<CircuitTransition> {
        self.total_attempts += 1;
        self.total_successes += 1;
        self.consecutive_failures = 0;
        self.last_attempt_at = Some(at);
        self.last_success_at = Some(at);

        if self.circuit_state == CircuitState::Open {
            self.circuit_state = CircuitState::Closed;
            self.circuit_opened_at = None;
            return Some(CircuitTransition::Closed);
        }
        None
    }

    pub fn record_failure(
        &mut self,
        reason: FailureReason,
        message: impl Into<String>,
        artifacts: &DebugArtifacts,
        at: DateTime<Utc>,
    ) -> Option<CircuitTransition> {
        self.total_attempts += 1;
        self.total_failures += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_attempt_at = Some(at);
        self.last_failure_at = Some(at);
        self.last_failure_reason = Some(reason);
        self.last_failure_message = Some(message.into());
        self.last_screenshot_path = artifacts.screenshot_path.clone();
        self.last_html_path = artifacts.html_path.clone();

        if self.circuit_state == CircuitState::Closed && self.consecutive_failures >= CIRCUIT_OPEN_THRESHOLD {
            self.circuit_state = CircuitState::Open;
            self.circuit_opened_at = Some(at);
            return Some(CircuitTransition::Opened);
        }
        None
    }

    pub fn is_open(&self) -> bool {
        self.circuit_state == CircuitState::Open
    }

    /// None until the first attempt.
    pub fn success_rate(&self) -> Option<f64> {
        (self.total_attempts > 0).then(|| self.total_successes as f64 / self.total_attempts as f64)
    }

    /// Closed circuit, few consecutive failures, and a majority success rate.
    /// Fails open while there are too few attempts to judge the rate.
    pub fn is_healthy(&self) -> bool {
        let rate_ok = self.total_attempts < MIN_ATTEMPTS_FOR_SUCCESS_RATE
            || self.success_rate().is_some_and(|r| r > 0.5);
        !self.is_open() && self.consecutive_failures < UNHEALTHY_CONSECUTIVE_FAILURES && rate_ok
    }

    pub fn status(&self) -> HealthStatus {
        if self.is_open() {
            HealthStatus::CircuitOpen
        } else if self.is_healthy() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        }
    }

    /// Whether an open circuit has waited long enough since its last attempt
    /// to be probed again. Always true for a closed circuit.
    pub fn probe_due(&self, now: DateTime<Utc>, probe_interval: Duration) -> bool {
        if !self.is_open() {
            return true;
        }
        match self.last_attempt_at.or(self.circuit_opened_at) {
            Some(last) => now - last >= probe_interval,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn fail(h: &mut ScrapeHealth) -> Option<CircuitTransition> {
        h.record_failure(FailureReason::Blocked, "403", &DebugArtifacts::default(), Utc::now())
    }

    #[test]
    fn counters_stay_balanced_under_random_sequences() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..200 {
            let mut h = ScrapeHealth::new(1);
            let len = rng.gen_range(0..60);
            for _ in 0..len {
                if rng.gen_bool(0.4) {
                    h.record_success(Utc::now());
                } else {
                    fail(&mut h);
                }
                assert_eq!(h.total_attempts, h.total_successes + h.total_failures);
            }
        }
    }

    #[test]
    fn circuit_opens_exactly_at_threshold() {
        let mut h = ScrapeHealth::new(1);
        for i in 1..CIRCUIT_OPEN_THRESHOLD {
            assert_eq!(fail(&mut h), None, "failure {i} must not open the circuit");
            assert_eq!(h.circuit_state, CircuitState::Closed);
        }
        assert_eq!(fail(&mut h), Some(CircuitTransition::Opened));
        assert!(h.is_open());
        assert!(h.circuit_opened_at.is_some());

        // Further failures keep it open without re-triggering the transition.
        assert_eq!(fail(&mut h), None);
        assert!(h.is_open());
    }

    #[test]
    fn only_success_closes_the_circuit() {
        let mut h = ScrapeHealth::new(1);
        for _ in 0..CIRCUIT_OPEN_THRESHOLD {
            fail(&mut h);
        }
        assert!(h.is_open());
        assert_eq!(h.record_success(Utc::now()), Some(CircuitTransition::Closed));
        assert_eq!(h.circuit_state, CircuitState::Closed);
        assert_eq!(h.consecutive_failures, 0);
        assert!(h.circuit_opened_at.is_none());
    }

    #[test]
    fn success_resets_streak_before_threshold() {
        let mut h = ScrapeHealth::new(1);
        for _ in 0..4 {
            fail(&mut h);
        }
        h.record_success(Utc::now());
        for _ in 0..4 {
            fail(&mut h);
        }
        assert!(!h.is_open());
    }

    #[test]
    fn healthy_fails_open_with_little_data() {
        let mut h = ScrapeHealth::new(1);
        assert!(h.is_healthy());
        fail(&mut h);
        fail(&mut h);
        // 0% success but only 2 attempts and streak below 3.
        assert!(h.is_healthy());
        fail(&mut h);
        assert!(!h.is_healthy(), "3 consecutive failures");
        assert_eq!(h.status(), HealthStatus::Degraded);
    }

    #[test]
    fn low_success_rate_is_unhealthy_once_data_suffices() {
        let mut h = ScrapeHealth::new(1);
        for _ in 0..6 {
            fail(&mut h);
            fail(&mut h);
            h.record_success(Utc::now());
        }
        assert_eq!(h.total_attempts, 18);
        assert!(h.consecutive_failures < 3);
        assert!(!h.is_healthy());
    }

    #[test]
    fn failure_keeps_artifact_paths() {
        let mut h = ScrapeHealth::new(1);
        let artifacts = DebugArtifacts {
            screenshot_path: None,
            html_path: Some("artifacts/1/attempt.html".to_string()),
        };
        h.record_failure(FailureReason::LayoutChange, "no selectors matched", &artifacts, Utc::now());
        assert_eq!(h.last_html_path.as_deref(), Some("artifacts/1/attempt.html"));
        assert_eq!(h.last_failure_reason, Some(FailureReason::LayoutChange));
    }

    #[test]
    fn open_circuit_probes_on_interval() {
        let mut h = ScrapeHealth::new(1);
        let t0 = Utc::now();
        for _ in 0..CIRCUIT_OPEN_THRESHOLD {
            h.record_failure(FailureReason::Captcha, "captcha", &DebugArtifacts::default(), t0);
        }
        let interval = Duration::hours(6);
        assert!(!h.probe_due(t0 + Duration::hours(1), interval));
        assert!(h.probe_due(t0 + Duration::hours(6), interval));
        assert_eq!(h.status(), HealthStatus::CircuitOpen);
    }
}

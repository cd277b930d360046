//! Process-level engine health for the /health/summary endpoint.
//! Updated by the scheduler, the engine and the verdict consumer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Default)]
pub struct EngineHealth {
    /// True while the scheduler loop is ticking.
    pub scheduler_running: AtomicBool,
    pub attempts_in_flight: AtomicU64,
    /// Epoch millis of the last finished attempt (0 = none).
    pub last_attempt_at_ms: AtomicU64,
    /// Significant verdicts queued for the notification consumer.
    pub verdicts_pending: AtomicU64,
}

impl EngineHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_scheduler_running(&self, v: bool) {
        self.scheduler_running.store(v, Ordering::Relaxed);
    }

    pub fn attempt_started(&self) {
        self.attempts_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attempt_finished(&self, at_ms: u64) {
        self.attempts_in_flight.fetch_sub(1, Ordering::Relaxed);
        self.last_attempt_at_ms.store(at_ms, Ordering::Relaxed);
    }

    pub fn inc_verdicts_pending(&self) {
        self.verdicts_pending.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_verdicts_pending(&self) {
        self.verdicts_pending.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn scheduler_running(&self) -> bool {
        self.scheduler_running.load(Ordering::Relaxed)
    }

    pub fn attempts_in_flight(&self) -> u64 {
        self.attempts_in_flight.load(Ordering::Relaxed)
    }

    pub fn last_attempt_at_ms(&self) -> u64 {
        self.last_attempt_at_ms.load(Ordering::Relaxed)
    }

    pub fn verdicts_pending(&self) -> u64 {
        self.verdicts_pending.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_counts_balance() {
        let h = EngineHealth::new();
        h.attempt_started();
        h.attempt_started();
        assert_eq!(h.attempts_in_flight(), 2);
        h.attempt_finished(1_000);
        assert_eq!(h.attempts_in_flight(), 1);
        assert_eq!(h.last_attempt_at_ms(), 1_000);
    }
}

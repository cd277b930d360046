use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::api::health::EngineHealth;
use crate::db::repo;
use crate::engine::Engine;
use crate::error::{AppError, Result};
use crate::health::ScrapeHealth;
use crate::search::SearchDefinition;

/// Periodically starts an attempt for every active search whose cadence has
/// elapsed. Open circuits are only probed every `probe_interval`.
pub struct Scheduler {
    engine: Arc<Engine>,
    tick: Duration,
    probe_interval: chrono::Duration,
    permits: Arc<Semaphore>,
    health: Arc<EngineHealth>,
}

impl Scheduler {
    pub fn new(
        engine: Arc<Engine>,
        tick: Duration,
        probe_interval: chrono::Duration,
        max_concurrent: usize,
        health: Arc<EngineHealth>,
    ) -> Self {
        Self {
            engine,
            tick,
            probe_interval,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            health,
        }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.tick);
        self.health.set_scheduler_running(true);
        info!(tick_secs = self.tick.as_secs(), "[SCHEDULER] started");

        loop {
            ticker.tick().await;
            match self.dispatch_due().await {
                Ok(0) => {}
                Ok(started) => debug!(started, "[SCHEDULER] attempts dispatched"),
                Err(e) => error!("[SCHEDULER] tick failed: {e}"),
            }
        }
    }

    /// Spawns attempts for due searches until the concurrency limit is hit.
    /// Searches left over are picked up on a later tick.
    async fn dispatch_due(&self) -> Result<usize> {
        let definitions = repo::list_definitions(self.engine.pool(), true).await?;
        let health: HashMap<i64, ScrapeHealth> = repo::list_health(self.engine.pool())
            .await?
            .into_iter()
            .map(|h| (h.search_id, h))
            .collect();
        let now = Utc::now();

        let mut started = 0;
        for def in &definitions {
            let Some(h) = health.get(&def.id) else {
                continue;
            };
            if !is_due(def, h, now, self.probe_interval) || self.engine.is_busy(def.id) {
                continue;
            }
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                debug!("[SCHEDULER] concurrency limit reached");
                break;
            };

            let engine = Arc::clone(&self.engine);
            let search_id = def.id;
            let probing = h.is_open();
            tokio::spawn(async move {
                let _permit = permit;
                if probing {
                    info!(search_id, "[SCHEDULER] probing open circuit");
                }
                match engine.trigger_one(search_id).await {
                    Ok(_) | Err(AppError::Busy(_)) => {}
                    Err(e) => error!(search_id, "[SCHEDULER] attempt error: {e}"),
                }
            });
            started += 1;
        }
        Ok(started)
    }
}

/// Whether `def` should be attempted at `now`.
pub fn is_due(def: &SearchDefinition, health: &ScrapeHealth, now: DateTime<Utc>, probe_interval: chrono::Duration) -> bool {
    if !def.is_active || def.spec.is_expired(now.date_naive()) {
        return false;
    }
    if health.is_open() {
        return health.probe_due(now, probe_interval);
    }
    match health.last_attempt_at {
        Some(last) => now - last >= chrono::Duration::hours(i64::from(def.spec.scrape_frequency_hours)),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::fixed::StaticPageSource;
    use crate::acquire::ArtifactStore;
    use crate::api::latency::LatencyStats;
    use crate::config::EngineConfig;
    use crate::db::repo::tests::memory_pool;
    use crate::search::definition::tests::sample_spec;
    use crate::types::{DebugArtifacts, FailureReason};
    use tokio::sync::mpsc;

    fn definition() -> SearchDefinition {
        SearchDefinition {
            id: 1,
            spec: sample_spec(),
            version: 1,
            parent_id: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn never_attempted_is_due() {
        assert!(is_due(&definition(), &ScrapeHealth::new(1), Utc::now(), chrono::Duration::hours(6)));
    }

    #[test]
    fn cadence_gates_closed_circuits() {
        let now = Utc::now();
        let mut h = ScrapeHealth::new(1);
        h.record_success(now - chrono::Duration::hours(2));
        assert!(!is_due(&definition(), &h, now, chrono::Duration::hours(1)));
        h.record_success(now - chrono::Duration::hours(6));
        assert!(is_due(&definition(), &h, now, chrono::Duration::hours(1)));
    }

    #[test]
    fn open_circuits_wait_for_probe_interval() {
        let now = Utc::now();
        let mut h = ScrapeHealth::new(1);
        for _ in 0..5 {
            h.record_failure(
                FailureReason::Blocked,
                "403",
                &DebugArtifacts::default(),
                now - chrono::Duration::hours(7),
            );
        }
        assert!(h.is_open());
        // Cadence (6h) has elapsed but the probe interval (12h) has not.
        assert!(!is_due(&definition(), &h, now, chrono::Duration::hours(12)));
        assert!(is_due(&definition(), &h, now, chrono::Duration::hours(6)));
    }

    #[test]
    fn inactive_is_never_due() {
        let mut def = definition();
        def.is_active = false;
        assert!(!is_due(&def, &ScrapeHealth::new(1), Utc::now(), chrono::Duration::hours(1)));
    }

    #[tokio::test]
    async fn dispatch_respects_concurrency_limit() {
        let pool = memory_pool().await;
        for _ in 0..3 {
            repo::create_definition(&pool, &sample_spec()).await.unwrap();
        }
        let (tx, _rx) = mpsc::channel(8);
        let health = Arc::new(EngineHealth::new());
        let source = StaticPageSource::html("<p>nothing</p>").with_delay(Duration::from_millis(200));
        let engine = Arc::new(Engine::new(
            pool,
            Arc::new(source),
            ArtifactStore::new(std::env::temp_dir().join("sentinel-scheduler-tests")),
            &EngineConfig::default(),
            Duration::from_secs(5),
            tx,
            Arc::new(LatencyStats::new()),
            Arc::clone(&health),
        ));
        let scheduler = Scheduler::new(engine, Duration::from_secs(60), chrono::Duration::hours(6), 2, health);
        assert_eq!(scheduler.dispatch_due().await.unwrap(), 2);
    }
}

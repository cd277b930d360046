use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::acquire::{AcquisitionFailure, ArtifactStore, PageSource};
use crate::analysis::{stats, AnomalyGuard, CandidatePrice, PriceAnalyzer};
use crate::api::health::EngineHealth;
use crate::api::latency::LatencyStats;
use crate::config::EngineConfig;
use crate::db::models::{HistoryPoint, NewObservation};
use crate::db::repo;
use crate::error::{AppError, Result};
use crate::extract::{ExtractionContext, UnifiedExtractor};
use crate::health::CircuitTransition;
use crate::search::SearchDefinition;
use crate::types::{AttemptOutcome, DealVerdict, FailureReason, FlightData};

/// Runs acquisition attempts end to end: fetch, extract, guard, store, analyse.
/// One instance is shared by the scheduler and the API.
pub struct Engine {
    pool: SqlitePool,
    source: Arc<dyn PageSource>,
    artifacts: ArtifactStore,
    extractor: UnifiedExtractor,
    guard: AnomalyGuard,
    analyzer: PriceAnalyzer,
    attempt_timeout: Duration,
    /// search_id → in-process attempt lock
    locks: DashMap<i64, Arc<Mutex<()>>>,
    verdict_tx: mpsc::Sender<DealVerdict>,
    latency: Arc<LatencyStats>,
    health: Arc<EngineHealth>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        source: Arc<dyn PageSource>,
        artifacts: ArtifactStore,
        cfg: &EngineConfig,
        attempt_timeout: Duration,
        verdict_tx: mpsc::Sender<DealVerdict>,
        latency: Arc<LatencyStats>,
        health: Arc<EngineHealth>,
    ) -> Self {
        Self {
            pool,
            source,
            artifacts,
            extractor: UnifiedExtractor::new(cfg.extraction.clone()),
            guard: AnomalyGuard::new(cfg.anomaly.clone()),
            analyzer: PriceAnalyzer::new(cfg.analysis.clone()),
            attempt_timeout,
            locks: DashMap::new(),
            verdict_tx,
            latency,
            health,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// True while an attempt for `search_id` holds the in-process lock.
    pub fn is_busy(&self, search_id: i64) -> bool {
        self.locks
            .get(&search_id)
            .is_some_and(|l| l.try_lock().is_err())
    }

    /// One acquisition attempt for one search. Acquisition and extraction
    /// failures come back as `Ok(Failed(..))`; only unknown or inactive
    /// searches, concurrent attempts and storage errors are `Err`.
    pub async fn trigger_one(&self, search_id: i64) -> Result<AttemptOutcome> {
        let definition = repo::get_definition(&self.pool, search_id).await?;
        if !definition.is_active {
            return Err(AppError::InvalidDefinition(format!("search {search_id} is inactive")));
        }

        let lock = self
            .locks
            .entry(search_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let Ok(_guard) = lock.try_lock() else {
            return Err(AppError::Busy(search_id));
        };
        if !repo::try_mark_in_progress(&self.pool, search_id).await? {
            return Err(AppError::Busy(search_id));
        }

        self.health.attempt_started();
        let started = Instant::now();
        let result = self.attempt(&definition).await;
        let elapsed = started.elapsed();
        self.latency.record(elapsed);
        self.health.attempt_finished(Utc::now().timestamp_millis().max(0) as u64);

        if let Err(e) = repo::clear_in_progress(&self.pool, search_id).await {
            error!(search_id, "[ENGINE] failed to clear in_progress flag: {e}");
        }

        match &result {
            Ok(outcome) => info!(
                search_id,
                outcome = %outcome,
                elapsed_ms = elapsed.as_millis() as u64,
                "[ENGINE] attempt finished"
            ),
            Err(e) => error!(search_id, "[ENGINE] attempt aborted: {e}"),
        }
        result
    }

    async fn attempt(&self, definition: &SearchDefinition) -> Result<AttemptOutcome> {
        let now = Utc::now();
        let today = now.date_naive();
        if definition.spec.is_expired(today) {
            return Err(AppError::InvalidDefinition(format!(
                "search {} date window has passed",
                definition.id
            )));
        }

        let acquisition = match tokio::time::timeout(self.attempt_timeout, self.source.fetch(definition, today)).await {
            Ok(a) => a,
            Err(_) => {
                let message = format!("attempt exceeded {}s", self.attempt_timeout.as_secs_f64());
                let mut failure = AcquisitionFailure::new(FailureReason::Timeout, message.clone());
                let note = format!("<!-- {message} -->");
                failure.artifacts.html_path = self.artifacts.save_html(definition.id, now, &note).await;
                Err(failure)
            }
        };

        let html = match acquisition {
            Ok(html) => html,
            Err(failure) => return self.record_failure(definition.id, failure, now).await,
        };

        let anomaly_since = now - chrono::Duration::days(self.guard.window_days());
        let recent = repo::price_history(&self.pool, definition.id, anomaly_since).await?;
        let recent_prices: Vec<f64> = recent.iter().map(|h| h.price).collect();

        let report = self.extractor.extract(&html, &ExtractionContext { route_median: trusted_median(&recent) });
        let candidates: Vec<FlightData> = report
            .candidates
            .into_iter()
            .filter(|c| definition.spec.admits(c))
            .collect();

        if candidates.is_empty() {
            let reason = if report.structure_found {
                FailureReason::NoResults
            } else {
                FailureReason::LayoutChange
            };
            let mut failure = AcquisitionFailure::new(
                reason,
                format!("{} low-confidence candidates dropped", report.dropped_low_confidence),
            );
            failure.artifacts.html_path = self.artifacts.save_html(definition.id, now, &html).await;
            return self.record_failure(definition.id, failure, now).await;
        }

        // Baseline is read before this attempt's rows exist.
        let analysis_since = now - chrono::Duration::days(self.analyzer.window_days());
        let baseline =
            repo::trusted_prices(&self.pool, definition.id, analysis_since, self.analyzer.min_confidence()).await?;

        let (depart, ret) = definition.spec.travel_dates(today);
        let observations: Vec<NewObservation> = candidates
            .iter()
            .map(|c| NewObservation {
                departure_date: depart.to_string(),
                return_date: ret.map(|d| d.to_string()),
                price: c.price,
                currency: definition.spec.currency.clone(),
                airline: c.airline.clone(),
                stops: c.stops,
                duration_minutes: c.duration_minutes,
                confidence: c.overall_confidence,
                is_suspicious: self.guard.evaluate(c.price, &recent_prices).is_suspicious,
                extraction_method: c.extraction_method.to_string(),
                row_method: c.row_method.map(|m| m.to_string()),
            })
            .collect();

        let mut health = repo::load_health(&self.pool, definition.id).await?;
        let transition = health.record_success(now);
        repo::commit_attempt(&self.pool, &health, &observations, now).await?;
        if transition == Some(CircuitTransition::Closed) {
            info!(search_id = definition.id, "[HEALTH] circuit closed after successful probe");
        }

        let flipped = repo::reclassify_suspicious(&self.pool, definition.id, anomaly_since, &self.guard).await?;
        if flipped > 0 {
            debug!(search_id = definition.id, flipped, "[ENGINE] suspicious flags updated");
        }

        let suspicious = observations.iter().filter(|o| o.is_suspicious).count();
        debug!(
            search_id = definition.id,
            stored = observations.len(),
            suspicious,
            method = ?report.method,
            "[ENGINE] observations stored"
        );

        self.analyze(definition.id, &observations, &baseline);
        Ok(AttemptOutcome::Success)
    }

    async fn record_failure(
        &self,
        search_id: i64,
        failure: AcquisitionFailure,
        at: DateTime<Utc>,
    ) -> Result<AttemptOutcome> {
        let mut health = repo::load_health(&self.pool, search_id).await?;
        let transition = health.record_failure(failure.reason, failure.message.clone(), &failure.artifacts, at);
        repo::commit_attempt(&self.pool, &health, &[], at).await?;

        warn!(
            search_id,
            reason = %failure.reason,
            consecutive = health.consecutive_failures,
            html = ?failure.artifacts.html_path,
            "[ENGINE] attempt failed: {}",
            failure.message
        );
        if transition == Some(CircuitTransition::Opened) {
            warn!(
                search_id,
                consecutive = health.consecutive_failures,
                "[HEALTH] circuit opened; only probes until a success"
            );
        }
        Ok(AttemptOutcome::Failed(failure.reason))
    }

    /// Judges the cheapest trusted observation and forwards significant verdicts.
    fn analyze(&self, search_id: i64, observations: &[NewObservation], baseline: &[f64]) {
        let best = observations
            .iter()
            .filter(|o| !o.is_suspicious && o.confidence >= self.analyzer.min_confidence())
            .min_by(|a, b| a.price.total_cmp(&b.price));
        let Some(best) = best else {
            return;
        };

        let verdict = self.analyzer.analyze(
            search_id,
            CandidatePrice {
                price: best.price,
                confidence: best.confidence,
                is_suspicious: best.is_suspicious,
            },
            baseline,
        );
        if !verdict.significant {
            return;
        }
        // Counted before the send so the consumer can never decrement first.
        self.health.inc_verdicts_pending();
        if let Err(e) = self.verdict_tx.try_send(verdict) {
            self.health.dec_verdicts_pending();
            warn!(search_id, "[ENGINE] verdict channel full, dropping deal: {e}");
        }
    }
}

/// Median of the recent non-suspicious prices, for cross-validation.
fn trusted_median(history: &[HistoryPoint]) -> Option<f64> {
    let prices: Vec<f64> = history.iter().filter(|h| !h.is_suspicious).map(|h| h.price).collect();
    stats::median(&prices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::fixed::StaticPageSource;
    use crate::db::repo::tests::{memory_pool, observation};
    use crate::search::definition::tests::sample_spec;
    use crate::types::DebugArtifacts;

    const ROW_700: &str = r#"<ul><li class="flight-result">
        <span class="price">$700</span><span class="airline">Delta</span>
        <span class="stops">Nonstop</span><span class="duration">7 hr 5 min</span>
    </li></ul>"#;

    struct Harness {
        engine: Engine,
        rx: mpsc::Receiver<DealVerdict>,
        health: Arc<EngineHealth>,
        search_id: i64,
    }

    async fn harness(source: StaticPageSource, timeout: Duration) -> Harness {
        harness_with_capacity(source, timeout, 16).await
    }

    async fn harness_with_capacity(source: StaticPageSource, timeout: Duration, capacity: usize) -> Harness {
        let pool = memory_pool().await;
        let def = repo::create_definition(&pool, &sample_spec()).await.unwrap();
        let (tx, rx) = mpsc::channel(capacity);
        let health = Arc::new(EngineHealth::new());
        let engine = Engine::new(
            pool,
            Arc::new(source),
            ArtifactStore::new(std::env::temp_dir().join("sentinel-engine-tests")),
            &EngineConfig::default(),
            timeout,
            tx,
            Arc::new(LatencyStats::new()),
            Arc::clone(&health),
        );
        Harness { engine, rx, health, search_id: def.id }
    }

    async fn seed(h: &Harness, prices: impl IntoIterator<Item = f64>) {
        let health = repo::load_health(h.engine.pool(), h.search_id).await.unwrap();
        let batch: Vec<NewObservation> = prices.into_iter().map(observation).collect();
        repo::commit_attempt(h.engine.pool(), &health, &batch, Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn success_stores_observation_and_health() {
        let h = harness(StaticPageSource::html(ROW_700), Duration::from_secs(5)).await;
        let outcome = h.engine.trigger_one(h.search_id).await.unwrap();
        assert_eq!(outcome, AttemptOutcome::Success);

        let stored = repo::recent_observations(h.engine.pool(), h.search_id, 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].price, 700.0);
        assert_eq!(stored[0].extraction_method, "per_row");
        assert!(!stored[0].is_suspicious);

        let health = repo::load_health(h.engine.pool(), h.search_id).await.unwrap();
        assert_eq!(health.total_successes, 1);
        assert!(!h.engine.is_busy(h.search_id));
    }

    #[tokio::test]
    async fn unrecognised_page_is_layout_change() {
        let h = harness(StaticPageSource::html("<html><body><p>Loading…</p></body></html>"), Duration::from_secs(5)).await;
        let outcome = h.engine.trigger_one(h.search_id).await.unwrap();
        assert_eq!(outcome, AttemptOutcome::Failed(FailureReason::LayoutChange));
        let health = repo::load_health(h.engine.pool(), h.search_id).await.unwrap();
        assert!(health.last_html_path.is_some());
    }

    #[tokio::test]
    async fn empty_result_list_is_no_results() {
        let page = r#"<ul><li class="flight-result"><span>Sold out</span></li></ul>"#;
        let h = harness(StaticPageSource::html(page), Duration::from_secs(5)).await;
        let outcome = h.engine.trigger_one(h.search_id).await.unwrap();
        assert_eq!(outcome, AttemptOutcome::Failed(FailureReason::NoResults));
        assert!(repo::recent_observations(h.engine.pool(), h.search_id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn filtered_out_airline_is_no_results() {
        let page = ROW_700.replace("Delta", "Spirit");
        let h = harness(StaticPageSource::html(&page), Duration::from_secs(5)).await;
        let outcome = h.engine.trigger_one(h.search_id).await.unwrap();
        assert_eq!(outcome, AttemptOutcome::Failed(FailureReason::NoResults));
    }

    #[tokio::test]
    async fn source_failures_are_recorded_and_open_the_circuit() {
        let captcha = AcquisitionFailure {
            reason: FailureReason::Captcha,
            message: "captcha page served".into(),
            artifacts: DebugArtifacts { screenshot_path: None, html_path: Some("snap.html".into()) },
        };
        let h = harness(StaticPageSource::new(vec![Err(captcha)]), Duration::from_secs(5)).await;
        for _ in 0..5 {
            let outcome = h.engine.trigger_one(h.search_id).await.unwrap();
            assert_eq!(outcome, AttemptOutcome::Failed(FailureReason::Captcha));
        }
        let health = repo::load_health(h.engine.pool(), h.search_id).await.unwrap();
        assert!(health.is_open());
        assert_eq!(health.total_failures, 5);
        assert_eq!(health.last_html_path.as_deref(), Some("snap.html"));
    }

    #[tokio::test]
    async fn slow_source_times_out() {
        let source = StaticPageSource::html(ROW_700).with_delay(Duration::from_millis(500));
        let h = harness(source, Duration::from_millis(50)).await;
        let outcome = h.engine.trigger_one(h.search_id).await.unwrap();
        assert_eq!(outcome, AttemptOutcome::Failed(FailureReason::Timeout));

        let health = repo::load_health(h.engine.pool(), h.search_id).await.unwrap();
        let snapshot = health.last_html_path.expect("timeout leaves a snapshot");
        let body = tokio::fs::read_to_string(&snapshot).await.unwrap();
        assert!(body.contains("attempt exceeded"), "{body}");
    }

    #[tokio::test]
    async fn busy_search_is_rejected() {
        let h = harness(StaticPageSource::html(ROW_700), Duration::from_secs(5)).await;
        assert!(repo::try_mark_in_progress(h.engine.pool(), h.search_id).await.unwrap());
        assert!(matches!(h.engine.trigger_one(h.search_id).await, Err(AppError::Busy(_))));
    }

    #[tokio::test]
    async fn unknown_and_inactive_searches_are_errors() {
        let h = harness(StaticPageSource::html(ROW_700), Duration::from_secs(5)).await;
        assert!(matches!(h.engine.trigger_one(999).await, Err(AppError::NotFound(_))));
        repo::deactivate_definition(h.engine.pool(), h.search_id).await.unwrap();
        assert!(matches!(
            h.engine.trigger_one(h.search_id).await,
            Err(AppError::InvalidDefinition(_))
        ));
    }

    #[tokio::test]
    async fn spike_is_stored_suspicious_and_never_notified() {
        let page = ROW_700.replace("$700", "$3,500");
        let mut h = harness(StaticPageSource::html(&page), Duration::from_secs(5)).await;
        seed(&h, [1000.0; 12]).await;

        assert_eq!(h.engine.trigger_one(h.search_id).await.unwrap(), AttemptOutcome::Success);
        let latest = repo::latest_observation(h.engine.pool(), h.search_id).await.unwrap().unwrap();
        assert_eq!(latest.price, 3500.0);
        assert!(latest.is_suspicious);
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn deal_against_history_is_forwarded() {
        let mut h = harness(StaticPageSource::html(ROW_700), Duration::from_secs(5)).await;
        seed(&h, (0..20).map(|i| 900.0 + 10.0 * i as f64)).await;

        assert_eq!(h.engine.trigger_one(h.search_id).await.unwrap(), AttemptOutcome::Success);
        let verdict = h.rx.try_recv().expect("significant verdict");
        assert_eq!(verdict.search_id, h.search_id);
        assert_eq!(verdict.price, 700.0);
        assert!(verdict.significant);
        assert!(verdict.is_absolute_new_low);
        assert_eq!(verdict.sample_count, 20);
        assert_eq!(h.health.verdicts_pending(), 1);
    }

    #[tokio::test]
    async fn dropped_verdict_is_not_left_pending() {
        let h = harness_with_capacity(StaticPageSource::html(ROW_700), Duration::from_secs(5), 1).await;
        seed(&h, (0..20).map(|i| 900.0 + 10.0 * i as f64)).await;

        // Both attempts are deals; the second finds the channel still full.
        h.engine.trigger_one(h.search_id).await.unwrap();
        h.engine.trigger_one(h.search_id).await.unwrap();
        assert_eq!(h.health.verdicts_pending(), 1);
    }

    #[tokio::test]
    async fn first_ever_price_is_not_a_deal() {
        let mut h = harness(StaticPageSource::html(ROW_700), Duration::from_secs(5)).await;
        h.engine.trigger_one(h.search_id).await.unwrap();
        assert!(h.rx.try_recv().is_err());
    }
}

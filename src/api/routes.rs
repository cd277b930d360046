use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::analysis::{stats, CandidatePrice, PriceAnalyzer};
use crate::api::health::EngineHealth;
use crate::api::latency::LatencyStats;
use crate::config::AnalysisConfig;
use crate::db::models::PriceObservationRow;
use crate::db::repo;
use crate::error::AppError;
use crate::health::{CircuitState, HealthStatus, ScrapeHealth};
use crate::search::SearchDefinition;
use crate::types::DealVerdict;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub engine_health: Arc<EngineHealth>,
    pub latency: Arc<LatencyStats>,
    pub analysis: AnalysisConfig,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/searches", get(get_searches))
        .route("/searches/:id", get(get_search))
        .route("/searches/:id/health", get(get_search_health))
        .route("/searches/:id/prices", get(get_search_prices))
        .route("/searches/:id/stats", get(get_search_stats))
        .route("/health/summary", get(get_health_summary))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
pub struct SearchesQuery {
    /// Include deactivated and superseded versions.
    pub all: Option<bool>,
}

#[derive(Deserialize, Default)]
pub struct PricesQuery {
    pub limit: Option<i64>,
    pub include_suspicious: Option<bool>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct SearchSummaryResponse {
    pub id: i64,
    pub name: Option<String>,
    pub origin: String,
    pub destination: String,
    pub version: i64,
    pub is_active: bool,
    pub status: HealthStatus,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub success_rate: Option<f64>,
    pub latest_price: Option<f64>,
    pub latest_at: Option<i64>,
    pub currency: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub health: ScrapeHealth,
    pub is_healthy: bool,
    pub status: HealthStatus,
    pub success_rate: Option<f64>,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub search_id: i64,
    pub window_days: i64,
    pub sample_count: usize,
    pub median: Option<f64>,
    pub mad: Option<f64>,
    pub min: Option<f64>,
    /// Latest trusted price judged against the rest of the window.
    pub latest: Option<DealVerdict>,
}

#[derive(Serialize)]
pub struct HealthSummaryResponse {
    pub scheduler_running: bool,
    pub attempts_in_flight: u64,
    pub last_attempt_at_ms: Option<u64>,
    pub verdicts_pending: u64,
    pub searches_total: usize,
    pub searches_healthy: usize,
    pub searches_degraded: usize,
    pub searches_circuit_open: usize,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_searches(
    State(state): State<ApiState>,
    Query(params): Query<SearchesQuery>,
) -> Result<Json<Vec<SearchSummaryResponse>>, AppError> {
    let definitions = repo::list_definitions(&state.pool, !params.all.unwrap_or(false)).await?;

    let mut out = Vec::with_capacity(definitions.len());
    for def in definitions {
        let health = repo::load_health(&state.pool, def.id).await?;
        let latest = repo::latest_observation(&state.pool, def.id).await?;
        out.push(summarize(def, &health, latest.as_ref()));
    }
    Ok(Json(out))
}

fn summarize(def: SearchDefinition, health: &ScrapeHealth, latest: Option<&PriceObservationRow>) -> SearchSummaryResponse {
    SearchSummaryResponse {
        id: def.id,
        name: def.spec.name,
        origin: def.spec.origin,
        destination: def.spec.destination,
        version: def.version,
        is_active: def.is_active,
        status: health.status(),
        circuit_state: health.circuit_state,
        consecutive_failures: health.consecutive_failures,
        success_rate: health.success_rate(),
        latest_price: latest.map(|o| o.price),
        latest_at: latest.map(|o| o.scraped_at),
        currency: def.spec.currency,
    }
}

async fn get_search(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<SearchDefinition>, AppError> {
    Ok(Json(repo::get_definition(&state.pool, id).await?))
}

async fn get_search_health(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<HealthResponse>, AppError> {
    // 404 for unknown searches rather than an empty health record.
    repo::get_definition(&state.pool, id).await?;
    let health = repo::load_health(&state.pool, id).await?;
    Ok(Json(HealthResponse {
        is_healthy: health.is_healthy(),
        status: health.status(),
        success_rate: health.success_rate(),
        health,
    }))
}

async fn get_search_prices(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Query(params): Query<PricesQuery>,
) -> Result<Json<Vec<PriceObservationRow>>, AppError> {
    repo::get_definition(&state.pool, id).await?;
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    let mut rows = repo::recent_observations(&state.pool, id, limit).await?;
    if !params.include_suspicious.unwrap_or(false) {
        rows.retain(|r| !r.is_suspicious);
    }
    Ok(Json(rows))
}

async fn get_search_stats(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<StatsResponse>, AppError> {
    repo::get_definition(&state.pool, id).await?;
    let cfg = &state.analysis;
    let since = Utc::now() - chrono::Duration::days(cfg.window_days);
    let prices = repo::trusted_prices(&state.pool, id, since, cfg.min_confidence).await?;

    // Prices come back oldest first; the last one is judged against the rest.
    let latest = prices.split_last().map(|(last, rest)| {
        PriceAnalyzer::new(cfg.clone()).analyze(
            id,
            CandidatePrice { price: *last, confidence: 1.0, is_suspicious: false },
            rest,
        )
    });

    Ok(Json(StatsResponse {
        search_id: id,
        window_days: cfg.window_days,
        sample_count: prices.len(),
        median: stats::median(&prices),
        mad: stats::mad(&prices),
        min: stats::min(&prices),
        latest,
    }))
}

async fn get_health_summary(
    State(state): State<ApiState>,
) -> Result<Json<HealthSummaryResponse>, AppError> {
    let active: Vec<i64> = repo::list_definitions(&state.pool, true)
        .await?
        .into_iter()
        .map(|d| d.id)
        .collect();
    let health: Vec<ScrapeHealth> = repo::list_health(&state.pool)
        .await?
        .into_iter()
        .filter(|h| active.contains(&h.search_id))
        .collect();
    let count = |s: HealthStatus| health.iter().filter(|h| h.status() == s).count();

    let eh = &state.engine_health;
    let last = eh.last_attempt_at_ms();
    Ok(Json(HealthSummaryResponse {
        scheduler_running: eh.scheduler_running(),
        attempts_in_flight: eh.attempts_in_flight(),
        last_attempt_at_ms: (last > 0).then_some(last),
        verdicts_pending: eh.verdicts_pending(),
        searches_total: health.len(),
        searches_healthy: count(HealthStatus::Healthy),
        searches_degraded: count(HealthStatus::Degraded),
        searches_circuit_open: count(HealthStatus::CircuitOpen),
    }))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let p = state.latency.percentiles();
    Json(LatencyResponse {
        samples: state.latency.len(),
        p50_ms: p.map(|p| p.0),
        p95_ms: p.map(|p| p.1),
        p99_ms: p.map(|p| p.2),
        max_ms: p.map(|p| p.3),
    })
}

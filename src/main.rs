mod acquire;
mod analysis;
mod api;
mod catalog;
mod config;
mod db;
mod engine;
mod error;
mod extract;
mod health;
mod scheduler;
mod search;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::acquire::{ArtifactStore, HttpPageSource};
use crate::api::health::EngineHealth;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, CHANNEL_CAPACITY};
use crate::db::repo;
use crate::engine::Engine;
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::types::DealVerdict;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = repo::open_pool(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    let cleared = repo::clear_stale_locks(&pool).await?;
    if cleared > 0 {
        info!(cleared, "[DB] cleared in_progress flags left by a previous run");
    }

    if let Some(path) = &cfg.searches_file {
        let specs = catalog::load_catalog(path).await?;
        catalog::sync_catalog(&pool, specs).await?;
    }

    let active = repo::list_definitions(&pool, true).await?;
    info!(searches = active.len(), "Monitoring {} active searches", active.len());

    // --- Shared instrumentation ---
    let engine_health = Arc::new(EngineHealth::new());
    let latency = Arc::new(LatencyStats::new());

    // --- Channels ---
    let (verdict_tx, verdict_rx) = mpsc::channel::<DealVerdict>(CHANNEL_CAPACITY);

    // --- Engine ---
    let artifacts = ArtifactStore::new(cfg.artifact_dir.clone());
    let source = HttpPageSource::new(&cfg, artifacts.clone())?;
    let engine = Arc::new(Engine::new(
        pool.clone(),
        Arc::new(source),
        artifacts,
        &cfg.engine,
        Duration::from_secs(cfg.attempt_timeout_secs),
        verdict_tx,
        Arc::clone(&latency),
        Arc::clone(&engine_health),
    ));

    // --- Spawn tasks ---

    // Scheduler (background, every SCHEDULER_TICK_SECS)
    let scheduler = Scheduler::new(
        Arc::clone(&engine),
        Duration::from_secs(cfg.scheduler_tick_secs),
        chrono::Duration::minutes(cfg.circuit_probe_interval_mins),
        cfg.max_concurrent_attempts,
        Arc::clone(&engine_health),
    );
    tokio::spawn(async move { scheduler.run().await });

    // Verdict consumer: the hand-off point to notification delivery
    let consumer_health = Arc::clone(&engine_health);
    tokio::spawn(async move {
        verdict_consumer(verdict_rx, consumer_health).await;
    });

    // HTTP API server
    let api_state = ApiState {
        pool: pool.clone(),
        engine_health,
        latency,
        analysis: cfg.engine.analysis.clone(),
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Consumes significant DealVerdicts. Delivery transport lives outside this
/// process; here each deal is logged as a structured event.
async fn verdict_consumer(mut rx: mpsc::Receiver<DealVerdict>, health: Arc<EngineHealth>) {
    while let Some(verdict) = rx.recv().await {
        health.dec_verdicts_pending();
        log_deal(&verdict);
    }
}

fn log_deal(v: &DealVerdict) {
    let why = match (v.is_absolute_new_low, v.robust_z_score) {
        (true, Some(_)) => "new low, well below typical",
        (true, None) => "new low",
        (false, Some(_)) => "well below typical",
        (false, None) => "n/a",
    };
    let z = v
        .robust_z_score
        .map(|z| format!("{z:.2}"))
        .unwrap_or_else(|| "n/a".to_string());
    let median = v
        .median
        .map(|m| format!("{m:.0}"))
        .unwrap_or_else(|| "n/a".to_string());

    info!(
        event = "DEAL",
        search_id = v.search_id,
        price = v.price,
        robust_z = ?v.robust_z_score,
        median = ?v.median,
        percentile = ?v.percentile,
        new_low = v.is_absolute_new_low,
        samples = v.sample_count,
        "DEAL | price: {:.0} | median: {} | z: {} | samples: {} | {}",
        v.price, median, z, v.sample_count, why,
    );
}

//! Storage access for definitions, health and observations.
//!
//! Queries are checked at runtime (`sqlx::query`) so the crate builds without
//! a live `DATABASE_URL`.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::analysis::AnomalyGuard;
use crate::db::models::{
    to_millis, HistoryPoint, NewObservation, PriceObservationRow, ScrapeHealthRow,
    SearchDefinitionRow,
};
use crate::error::{AppError, Result};
use crate::health::ScrapeHealth;
use crate::search::{Revision, SearchDefinition, SearchSpec};

const DEFINITION_COLUMNS: &str =
    "id, spec_json, version, parent_id, is_active, created_at";

/// Opens (creating if needed) the database file and applies migrations.
pub async fn open_pool(db_path: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

// ---------------------------------------------------------------------------
// Search definitions
// ---------------------------------------------------------------------------

pub async fn create_definition(pool: &SqlitePool, spec: &SearchSpec) -> Result<SearchDefinition> {
    spec.validate()?;
    let mut tx = pool.begin().await?;
    let id = insert_definition(&mut tx, spec, 1, None).await?;
    tx.commit().await?;
    info!(search_id = id, route = %format!("{}-{}", spec.origin, spec.destination), "[DB] search created");
    get_definition(pool, id).await
}

async fn insert_definition(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    spec: &SearchSpec,
    version: i64,
    parent_id: Option<i64>,
) -> Result<i64> {
    let spec_json = serde_json::to_string(spec)?;
    let id = sqlx::query(
        r#"
        INSERT INTO search_definitions (
            name, spec_json, origin, destination, currency,
            scrape_frequency_hours, version, parent_id, is_active, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
        "#,
    )
    .bind(&spec.name)
    .bind(&spec_json)
    .bind(spec.origin.to_ascii_uppercase())
    .bind(spec.destination.to_ascii_uppercase())
    .bind(spec.currency.to_ascii_uppercase())
    .bind(i64::from(spec.scrape_frequency_hours))
    .bind(version)
    .bind(parent_id)
    .bind(to_millis(Utc::now()))
    .execute(&mut **tx)
    .await?
    .last_insert_rowid();

    sqlx::query("INSERT INTO scrape_health (search_id) VALUES (?)")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(id)
}

pub async fn get_definition(pool: &SqlitePool, id: i64) -> Result<SearchDefinition> {
    let row: Option<SearchDefinitionRow> = sqlx::query_as(&format!(
        "SELECT {DEFINITION_COLUMNS} FROM search_definitions WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.ok_or_else(|| AppError::NotFound(format!("search {id}")))?
        .into_definition()
}

pub async fn list_definitions(pool: &SqlitePool, active_only: bool) -> Result<Vec<SearchDefinition>> {
    let sql = if active_only {
        format!("SELECT {DEFINITION_COLUMNS} FROM search_definitions WHERE is_active = 1 ORDER BY id")
    } else {
        format!("SELECT {DEFINITION_COLUMNS} FROM search_definitions ORDER BY id")
    };
    let rows: Vec<SearchDefinitionRow> = sqlx::query_as(&sql).fetch_all(pool).await?;
    rows.into_iter().map(SearchDefinitionRow::into_definition).collect()
}

/// Applies an edit. Comparability-affecting edits create a child version and
/// deactivate the parent; the returned definition is the one now active.
pub async fn revise_definition(pool: &SqlitePool, id: i64, updated: SearchSpec) -> Result<SearchDefinition> {
    let current = get_definition(pool, id).await?;
    if !current.is_active {
        return Err(AppError::InvalidDefinition(format!("search {id} is inactive")));
    }

    match current.revise(updated)? {
        Revision::InPlace(spec) => {
            let spec_json = serde_json::to_string(&spec)?;
            sqlx::query(
                "UPDATE search_definitions SET name = ?, spec_json = ?, scrape_frequency_hours = ? WHERE id = ?",
            )
            .bind(&spec.name)
            .bind(&spec_json)
            .bind(i64::from(spec.scrape_frequency_hours))
            .bind(id)
            .execute(pool)
            .await?;
            debug!(search_id = id, "[DB] search updated in place");
            get_definition(pool, id).await
        }
        Revision::NewVersion { parent_id, version, spec } => {
            let mut tx = pool.begin().await?;
            sqlx::query("UPDATE search_definitions SET is_active = 0 WHERE id = ?")
                .bind(parent_id)
                .execute(&mut *tx)
                .await?;
            let child = insert_definition(&mut tx, &spec, version, Some(parent_id)).await?;
            tx.commit().await?;
            info!(parent_id, search_id = child, version, "[DB] search versioned");
            get_definition(pool, child).await
        }
    }
}

/// Soft delete. In-flight attempts finish; nothing new is scheduled.
pub async fn deactivate_definition(pool: &SqlitePool, id: i64) -> Result<()> {
    let affected = sqlx::query("UPDATE search_definitions SET is_active = 0 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?
        .rows_affected();
    if affected == 0 {
        return Err(AppError::NotFound(format!("search {id}")));
    }
    info!(search_id = id, "[DB] search deactivated");
    Ok(())
}

// ---------------------------------------------------------------------------
// Attempt locks
// ---------------------------------------------------------------------------

/// Claims the persisted attempt flag. False when the search is busy or inactive.
pub async fn try_mark_in_progress(pool: &SqlitePool, id: i64) -> Result<bool> {
    let affected = sqlx::query(
        "UPDATE search_definitions SET in_progress = 1 WHERE id = ? AND is_active = 1 AND in_progress = 0",
    )
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected == 1)
}

pub async fn clear_in_progress(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE search_definitions SET in_progress = 0 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Flags left behind by a crashed process. Run once at startup.
pub async fn clear_stale_locks(pool: &SqlitePool) -> Result<u64> {
    let cleared = sqlx::query("UPDATE search_definitions SET in_progress = 0 WHERE in_progress = 1")
        .execute(pool)
        .await?
        .rows_affected();
    Ok(cleared)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub async fn load_health(pool: &SqlitePool, search_id: i64) -> Result<ScrapeHealth> {
    let row: Option<ScrapeHealthRow> = sqlx::query_as("SELECT * FROM scrape_health WHERE search_id = ?")
        .bind(search_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(ScrapeHealth::from).unwrap_or_else(|| ScrapeHealth::new(search_id)))
}

pub async fn list_health(pool: &SqlitePool) -> Result<Vec<ScrapeHealth>> {
    let rows: Vec<ScrapeHealthRow> = sqlx::query_as("SELECT * FROM scrape_health ORDER BY search_id")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(ScrapeHealth::from).collect())
}

/// Persists one attempt: its observations and the resulting health, in one
/// transaction. Returns the new observation ids.
pub async fn commit_attempt(
    pool: &SqlitePool,
    health: &ScrapeHealth,
    observations: &[NewObservation],
    scraped_at: DateTime<Utc>,
) -> Result<Vec<i64>> {
    let mut tx = pool.begin().await?;
    let mut ids = Vec::with_capacity(observations.len());

    for o in observations {
        let id = sqlx::query(
            r#"
            INSERT INTO price_observations (
                search_id, scraped_at, departure_date, return_date, price, currency,
                airline, stops, duration_minutes, confidence, is_suspicious,
                extraction_method, row_method
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(health.search_id)
        .bind(to_millis(scraped_at))
        .bind(&o.departure_date)
        .bind(&o.return_date)
        .bind(o.price)
        .bind(&o.currency)
        .bind(&o.airline)
        .bind(o.stops.map(i64::from))
        .bind(o.duration_minutes.map(i64::from))
        .bind(o.confidence)
        .bind(o.is_suspicious)
        .bind(&o.extraction_method)
        .bind(&o.row_method)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        ids.push(id);
    }

    sqlx::query(
        r#"
        INSERT INTO scrape_health (
            search_id, total_attempts, total_successes, total_failures, consecutive_failures,
            last_attempt_at, last_success_at, last_failure_at,
            last_failure_reason, last_failure_message, last_screenshot_path, last_html_path,
            circuit_state, circuit_opened_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(search_id) DO UPDATE SET
            total_attempts = excluded.total_attempts,
            total_successes = excluded.total_successes,
            total_failures = excluded.total_failures,
            consecutive_failures = excluded.consecutive_failures,
            last_attempt_at = excluded.last_attempt_at,
            last_success_at = excluded.last_success_at,
            last_failure_at = excluded.last_failure_at,
            last_failure_reason = excluded.last_failure_reason,
            last_failure_message = excluded.last_failure_message,
            last_screenshot_path = excluded.last_screenshot_path,
            last_html_path = excluded.last_html_path,
            circuit_state = excluded.circuit_state,
            circuit_opened_at = excluded.circuit_opened_at
        "#,
    )
    .bind(health.search_id)
    .bind(health.total_attempts)
    .bind(health.total_successes)
    .bind(health.total_failures)
    .bind(i64::from(health.consecutive_failures))
    .bind(health.last_attempt_at.map(to_millis))
    .bind(health.last_success_at.map(to_millis))
    .bind(health.last_failure_at.map(to_millis))
    .bind(health.last_failure_reason.map(|r| r.as_str()))
    .bind(&health.last_failure_message)
    .bind(&health.last_screenshot_path)
    .bind(&health.last_html_path)
    .bind(health.circuit_state.as_str())
    .bind(health.circuit_opened_at.map(to_millis))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(ids)
}

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

/// Every stored price since `since`, suspicious ones included.
pub async fn price_history(pool: &SqlitePool, search_id: i64, since: DateTime<Utc>) -> Result<Vec<HistoryPoint>> {
    let rows = sqlx::query_as(
        "SELECT id, price, is_suspicious FROM price_observations WHERE search_id = ? AND scraped_at >= ? ORDER BY scraped_at, id",
    )
    .bind(search_id)
    .bind(to_millis(since))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Prices eligible as an analysis baseline: non-suspicious and confident enough.
pub async fn trusted_prices(
    pool: &SqlitePool,
    search_id: i64,
    since: DateTime<Utc>,
    min_confidence: f64,
) -> Result<Vec<f64>> {
    let prices: Vec<(f64,)> = sqlx::query_as(
        r#"
        SELECT price FROM price_observations
        WHERE search_id = ? AND scraped_at >= ? AND is_suspicious = 0 AND confidence >= ?
        ORDER BY scraped_at, id
        "#,
    )
    .bind(search_id)
    .bind(to_millis(since))
    .bind(min_confidence)
    .fetch_all(pool)
    .await?;
    Ok(prices.into_iter().map(|(p,)| p).collect())
}

pub async fn recent_observations(pool: &SqlitePool, search_id: i64, limit: i64) -> Result<Vec<PriceObservationRow>> {
    let rows = sqlx::query_as(
        "SELECT * FROM price_observations WHERE search_id = ? ORDER BY scraped_at DESC, id DESC LIMIT ?",
    )
    .bind(search_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn latest_observation(pool: &SqlitePool, search_id: i64) -> Result<Option<PriceObservationRow>> {
    Ok(recent_observations(pool, search_id, 1).await?.into_iter().next())
}

/// Re-evaluates the window against its current median, flipping only
/// `is_suspicious`. Returns how many rows changed.
pub async fn reclassify_suspicious(
    pool: &SqlitePool,
    search_id: i64,
    since: DateTime<Utc>,
    guard: &AnomalyGuard,
) -> Result<u64> {
    let history = price_history(pool, search_id, since).await?;
    let prices: Vec<f64> = history.iter().map(|h| h.price).collect();

    let flips: Vec<(i64, bool)> = history
        .iter()
        .filter_map(|point| {
            let verdict = guard.evaluate(point.price, &prices);
            (verdict.is_suspicious != point.is_suspicious).then_some((point.id, verdict.is_suspicious))
        })
        .collect();
    if flips.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    for (id, suspicious) in &flips {
        sqlx::query("UPDATE price_observations SET is_suspicious = ? WHERE id = ?")
            .bind(*suspicious)
            .bind(*id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    debug!(search_id, flipped = flips.len(), "[DB] suspicious flags reclassified");
    Ok(flips.len() as u64)
}

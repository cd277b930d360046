//! Database row types for the schema in `migrations/0001_init.sql`.
//! Timestamps are epoch milliseconds.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::health::{CircuitState, ScrapeHealth};
use crate::search::{SearchDefinition, SearchSpec};
use crate::types::FailureReason;

pub fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[derive(Debug, sqlx::FromRow)]
pub struct SearchDefinitionRow {
    pub id: i64,
    pub spec_json: String,
    pub version: i64,
    pub parent_id: Option<i64>,
    pub is_active: bool,
    pub created_at: i64,
}

impl SearchDefinitionRow {
    pub fn into_definition(self) -> Result<SearchDefinition> {
        let spec: SearchSpec = serde_json::from_str(&self.spec_json)?;
        Ok(SearchDefinition {
            id: self.id,
            spec,
            version: self.version,
            parent_id: self.parent_id,
            is_active: self.is_active,
            created_at: from_millis(self.created_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ScrapeHealthRow {
    pub search_id: i64,
    pub total_attempts: i64,
    pub total_successes: i64,
    pub total_failures: i64,
    pub consecutive_failures: i64,
    pub last_attempt_at: Option<i64>,
    pub last_success_at: Option<i64>,
    pub last_failure_at: Option<i64>,
    pub last_failure_reason: Option<String>,
    pub last_failure_message: Option<String>,
    pub last_screenshot_path: Option<String>,
    pub last_html_path: Option<String>,
    pub circuit_state: String,
    pub circuit_opened_at: Option<i64>,
}

impl From<ScrapeHealthRow> for ScrapeHealth {
    fn from(r: ScrapeHealthRow) -> Self {
        Self {
            search_id: r.search_id,
            total_attempts: r.total_attempts,
            total_successes: r.total_successes,
            total_failures: r.total_failures,
            consecutive_failures: u32::try_from(r.consecutive_failures).unwrap_or(u32::MAX),
            last_attempt_at: r.last_attempt_at.map(from_millis),
            last_success_at: r.last_success_at.map(from_millis),
            last_failure_at: r.last_failure_at.map(from_millis),
            last_failure_reason: r.last_failure_reason.as_deref().and_then(FailureReason::parse),
            last_failure_message: r.last_failure_message,
            last_screenshot_path: r.last_screenshot_path,
            last_html_path: r.last_html_path,
            circuit_state: CircuitState::parse(&r.circuit_state),
            circuit_opened_at: r.circuit_opened_at.map(from_millis),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PriceObservationRow {
    pub id: i64,
    pub search_id: i64,
    pub scraped_at: i64,
    pub departure_date: String,
    pub return_date: Option<String>,
    pub price: f64,
    pub currency: String,
    pub airline: Option<String>,
    pub stops: Option<i64>,
    pub duration_minutes: Option<i64>,
    pub confidence: f64,
    pub is_suspicious: bool,
    pub extraction_method: String,
    pub row_method: Option<String>,
}

/// Observation about to be inserted; `id` is assigned by the database.
#[derive(Debug, Clone)]
pub struct NewObservation {
    pub departure_date: String,
    pub return_date: Option<String>,
    pub price: f64,
    pub currency: String,
    pub airline: Option<String>,
    pub stops: Option<u8>,
    pub duration_minutes: Option<u32>,
    pub confidence: f64,
    pub is_suspicious: bool,
    pub extraction_method: String,
    pub row_method: Option<String>,
}

/// A stored price as the anomaly guard and analyzer see it.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct HistoryPoint {
    pub id: i64,
    pub price: f64,
    pub is_suspicious: bool,
}

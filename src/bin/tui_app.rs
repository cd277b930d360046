use serde::Deserialize;

// ---------------------------------------------------------------------------
// API response types (mirror routes.rs shapes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct SearchSummary {
    pub id: i64,
    pub name: Option<String>,
    pub origin: String,
    pub destination: String,
    pub version: i64,
    pub status: String,
    pub circuit_state: String,
    pub consecutive_failures: u32,
    pub success_rate: Option<f64>,
    pub latest_price: Option<f64>,
    pub latest_at: Option<i64>,
    pub currency: String,
}

impl SearchSummary {
    pub fn label(&self) -> String {
        match &self.name {
            Some(n) if !n.is_empty() => format!("{}-{} {}", self.origin, self.destination, n),
            _ => format!("{}-{} v{}", self.origin, self.destination, self.version),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[allow(dead_code)]
pub struct HealthSummary {
    pub scheduler_running: bool,
    pub attempts_in_flight: u64,
    pub last_attempt_at_ms: Option<i64>,
    pub verdicts_pending: u64,
    pub searches_total: usize,
    pub searches_healthy: usize,
    pub searches_degraded: usize,
    pub searches_circuit_open: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[allow(dead_code)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct PriceRow {
    pub scraped_at: i64,
    pub price: f64,
    pub currency: String,
    pub airline: Option<String>,
    pub stops: Option<i64>,
    pub duration_minutes: Option<i64>,
    pub confidence: f64,
    pub is_suspicious: bool,
    pub extraction_method: String,
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Error(String),
    Connecting,
}

/// Price history for one search (from GET /searches/:id/prices).
#[derive(Debug, Clone, Default)]
pub struct SearchPricesState {
    pub search_id: Option<i64>,
    pub label: Option<String>,
    pub prices: Vec<PriceRow>,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub status: ConnectionStatus,
    pub summary: HealthSummary,
    pub searches: Vec<SearchSummary>,
    pub selected_prices: SearchPricesState,
    pub latency: LatencyResponse,
    pub last_refresh: std::time::Instant,
    pub base_url: String,
}

impl AppState {
    pub fn new(base_url: String) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            summary: HealthSummary::default(),
            searches: Vec::new(),
            selected_prices: SearchPricesState::default(),
            latency: LatencyResponse::default(),
            last_refresh: std::time::Instant::now(),
            base_url,
        }
    }

    /// Fetch price history for one search, suspicious rows included so they
    /// can be shown flagged.
    pub async fn fetch_prices(&mut self, client: &reqwest::Client, search_id: i64) {
        let url = format!(
            "{}/searches/{}/prices?limit=100&include_suspicious=true",
            self.base_url, search_id
        );
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                if let Ok(prices) = resp.json::<Vec<PriceRow>>().await {
                    let label = self.searches.iter().find(|s| s.id == search_id).map(|s| s.label());
                    self.selected_prices = SearchPricesState {
                        search_id: Some(search_id),
                        label,
                        prices,
                    };
                }
            }
        }
    }

    pub fn clear_prices(&mut self) {
        self.selected_prices = SearchPricesState::default();
    }

    pub fn showing_prices(&self) -> bool {
        self.selected_prices.search_id.is_some()
    }

    pub async fn refresh(&mut self, client: &reqwest::Client) {
        let searches_url = format!("{}/searches", self.base_url);
        let summary_url = format!("{}/health/summary", self.base_url);
        let latency_url = format!("{}/stats/latency", self.base_url);

        let (searches_res, summary_res, latency_res) = tokio::join!(
            client.get(&searches_url).send(),
            client.get(&summary_url).send(),
            client.get(&latency_url).send(),
        );

        let (searches_resp, summary_resp) = match (searches_res, summary_res) {
            (Ok(s), Ok(h)) => (s, h),
            (Err(e), _) | (_, Err(e)) => {
                self.status = ConnectionStatus::Error(format!("{e}"));
                return;
            }
        };

        let (searches, summary) = tokio::join!(
            searches_resp.json::<Vec<SearchSummary>>(),
            summary_resp.json::<HealthSummary>(),
        );

        match (searches, summary) {
            (Ok(s), Ok(h)) => {
                self.searches = s;
                self.summary = h;
                self.status = ConnectionStatus::Connected;
                self.last_refresh = std::time::Instant::now();

                if let Ok(l) = latency_res {
                    if let Ok(latency) = l.json::<LatencyResponse>().await {
                        self.latency = latency;
                    }
                }
                if let Some(id) = self.selected_prices.search_id {
                    self.fetch_prices(client, id).await;
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                self.status = ConnectionStatus::Error(format!("parse error: {e}"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

pub fn format_price(price: Option<f64>, currency: &str) -> String {
    match price {
        Some(p) => format!("{p:.0} {currency}"),
        None => "—".to_string(),
    }
}

pub fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{:.0}%", r * 100.0),
        None => "—".to_string(),
    }
}

pub fn format_duration_minutes(minutes: Option<i64>) -> String {
    match minutes {
        Some(m) => format!("{}h{:02}", m / 60, m % 60),
        None => "—".to_string(),
    }
}

/// Convert millisecond epoch timestamp to an HH:MM:SS (UTC) string.
pub fn format_time_ms(ms: i64) -> String {
    let secs = (ms / 1_000).max(0) as u64;
    let h = (secs / 3600) % 24;
    let m = (secs / 60) % 60;
    let s = secs % 60;
    format!("{h:02}:{m:02}:{s:02}")
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::{StatusCode, Url};
use tracing::debug;

use crate::acquire::{classify_page_content, Acquisition, AcquisitionFailure, ArtifactStore, PageSource};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::search::definition::TripType;
use crate::search::SearchDefinition;
use crate::types::FailureReason;

/// Plain HTTP GET of the results page. Works only against sites that render
/// results server-side; anything else surfaces as `layout_change`.
pub struct HttpPageSource {
    client: reqwest::Client,
    base_url: Url,
    artifacts: ArtifactStore,
}

impl HttpPageSource {
    pub fn new(cfg: &Config, artifacts: ArtifactStore) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.attempt_timeout_secs))
            .user_agent(cfg.user_agent.clone())
            .build()?;
        let base_url = Url::parse(&cfg.search_base_url)
            .map_err(|e| AppError::Config(format!("SEARCH_BASE_URL is not a valid URL: {e}")))?;
        Ok(Self { client, base_url, artifacts })
    }

    pub fn search_url(&self, definition: &SearchDefinition, today: NaiveDate) -> Url {
        let spec = &definition.spec;
        let (depart, ret) = spec.travel_dates(today);

        let mut q = format!("Flights from {} to {} on {depart}", spec.origin, spec.destination);
        match (spec.trip_type, ret) {
            (TripType::RoundTrip, Some(r)) => q.push_str(&format!(" through {r}")),
            _ => q.push_str(" one way"),
        }
        q.push_str(&format!(" {} {} passengers", spec.cabin, spec.passengers.total()));
        match spec.stops_filter.max_stops() {
            Some(0) => q.push_str(" nonstop"),
            Some(n) => q.push_str(&format!(" max {n} stops")),
            None => {}
        }

        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("q", &q)
            .append_pair("curr", &spec.currency)
            .append_pair("hl", &spec.locale);
        url
    }

    async fn fail(&self, search_id: i64, reason: FailureReason, message: String, body: &str) -> AcquisitionFailure {
        let mut failure = AcquisitionFailure::new(reason, message);
        failure.artifacts.html_path = self.artifacts.save_html(search_id, Utc::now(), body).await;
        failure
    }
}

/// Statuses that mean we were refused rather than that something broke.
pub fn classify_status(status: StatusCode) -> Option<FailureReason> {
    match status {
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            Some(FailureReason::Blocked)
        }
        s if !s.is_success() => Some(FailureReason::Unknown),
        _ => None,
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, definition: &SearchDefinition, today: NaiveDate) -> Acquisition {
        let url = self.search_url(definition, today);
        debug!(search_id = definition.id, %url, "[ACQUIRE] requesting results page");

        let resp = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                let reason = if e.is_timeout() { FailureReason::Timeout } else { FailureReason::Unknown };
                let note = format!("<!-- request failed: {e} -->");
                return Err(self.fail(definition.id, reason, e.to_string(), &note).await);
            }
        };

        let status = resp.status();
        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => {
                let reason = if e.is_timeout() { FailureReason::Timeout } else { FailureReason::Unknown };
                let note = format!("<!-- body read failed: {e} -->");
                return Err(self.fail(definition.id, reason, e.to_string(), &note).await);
            }
        };

        if let Some(reason) = classify_status(status) {
            return Err(self.fail(definition.id, reason, format!("HTTP {}", status.as_u16()), &body).await);
        }
        if let Some(reason) = classify_page_content(&body) {
            return Err(self.fail(definition.id, reason, format!("{reason} page served"), &body).await);
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::definition::tests::sample_spec;

    fn source() -> HttpPageSource {
        HttpPageSource {
            client: reqwest::Client::new(),
            base_url: Url::parse("https://flights.example.test/search").unwrap(),
            artifacts: ArtifactStore::new(std::env::temp_dir()),
        }
    }

    #[test]
    fn url_carries_route_dates_and_currency() {
        let def = SearchDefinition {
            id: 1,
            spec: sample_spec(),
            version: 1,
            parent_id: None,
            is_active: true,
            created_at: Utc::now(),
        };
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let url = source().search_url(&def, today);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let q = &pairs.iter().find(|(k, _)| k == "q").unwrap().1;
        assert!(q.contains("JFK to LHR on 2026-11-18 through 2026-11-25"), "{q}");
        assert!(q.contains("max 1 stops"));
        assert!(pairs.contains(&("curr".to_string(), "USD".to_string())));
    }

    #[test]
    fn refusal_statuses_are_blocked() {
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), Some(FailureReason::Blocked));
        assert_eq!(classify_status(StatusCode::FORBIDDEN), Some(FailureReason::Blocked));
        assert_eq!(classify_status(StatusCode::SERVICE_UNAVAILABLE), Some(FailureReason::Blocked));
        assert_eq!(classify_status(StatusCode::INTERNAL_SERVER_ERROR), Some(FailureReason::Unknown));
        assert_eq!(classify_status(StatusCode::OK), None);
    }
}

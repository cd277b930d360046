use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Acquisition outcomes
// ---------------------------------------------------------------------------

/// Why an acquisition attempt produced no usable observations. Mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Captcha,
    Timeout,
    /// Nothing on the page matched the expected result structure.
    LayoutChange,
    /// Page structure was recognised but no valid result rows survived.
    NoResults,
    /// Explicit block page or blocking HTTP status.
    Blocked,
    Unknown,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Captcha => "captcha",
            FailureReason::Timeout => "timeout",
            FailureReason::LayoutChange => "layout_change",
            FailureReason::NoResults => "no_results",
            FailureReason::Blocked => "blocked",
            FailureReason::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "captcha" => Some(FailureReason::Captcha),
            "timeout" => Some(FailureReason::Timeout),
            "layout_change" => Some(FailureReason::LayoutChange),
            "no_results" => Some(FailureReason::NoResults),
            "blocked" => Some(FailureReason::Blocked),
            "unknown" => Some(FailureReason::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal outcome of one `trigger_one` call, as reported to the scheduler.
/// Serialized as a flat string: `"success"` or the failure reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failed(FailureReason),
}

impl AttemptOutcome {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(AttemptOutcome::Success),
            other => FailureReason::parse(other).map(AttemptOutcome::Failed),
        }
    }
}

impl Serialize for AttemptOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AttemptOutcome::Success => serializer.serialize_str("success"),
            AttemptOutcome::Failed(reason) => serializer.serialize_str(reason.as_str()),
        }
    }
}

impl<'de> Deserialize<'de> for AttemptOutcome {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        AttemptOutcome::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown attempt outcome {raw:?}")))
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptOutcome::Success => write!(f, "success"),
            AttemptOutcome::Failed(reason) => write!(f, "{reason}"),
        }
    }
}

/// Evidence left behind by a failed attempt for offline diagnosis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugArtifacts {
    pub screenshot_path: Option<String>,
    pub html_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Every field came from one result container.
    PerRow,
    /// Independent page-wide lists paired by position.
    PageLevel,
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionMethod::PerRow => write!(f, "per_row"),
            ExtractionMethod::PageLevel => write!(f, "page_level"),
        }
    }
}

/// Which Row Locator strategy tier produced a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowMethod {
    SpecificSelector,
    Accessibility,
    DynamicAncestor,
}

impl RowMethod {
    pub fn correlation_confidence(&self) -> f64 {
        use crate::config::correlation::*;
        match self {
            RowMethod::SpecificSelector => SPECIFIC_SELECTOR,
            RowMethod::Accessibility => ACCESSIBILITY,
            RowMethod::DynamicAncestor => DYNAMIC_ANCESTOR,
        }
    }
}

impl std::fmt::Display for RowMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RowMethod::SpecificSelector => "specific_selector",
            RowMethod::Accessibility => "accessibility",
            RowMethod::DynamicAncestor => "dynamic_ancestor",
        };
        write!(f, "{s}")
    }
}

/// Per-field confidences. `None` means the field was not extracted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldConfidences {
    pub price: f64,
    pub airline: Option<f64>,
    pub stops: Option<f64>,
    pub duration: Option<f64>,
}

impl FieldConfidences {
    pub fn mean(&self) -> f64 {
        let present: Vec<f64> = [Some(self.price), self.airline, self.stops, self.duration]
            .into_iter()
            .flatten()
            .collect();
        present.iter().sum::<f64>() / present.len() as f64
    }
}

/// One candidate observation produced by an extraction pass. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightData {
    pub price: f64,
    pub airline: Option<String>,
    pub stops: Option<u8>,
    pub duration_minutes: Option<u32>,
    pub field_confidence: FieldConfidences,
    pub correlation_confidence: f64,
    pub extraction_method: ExtractionMethod,
    pub row_method: Option<RowMethod>,
    pub overall_confidence: f64,
}

impl FlightData {
    pub fn is_complete(&self) -> bool {
        self.airline.is_some() && self.stops.is_some() && self.duration_minutes.is_some()
    }
}

// ---------------------------------------------------------------------------
// Analysis output
// ---------------------------------------------------------------------------

/// Deal-significance verdict. This, not a raw price, is what notification consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealVerdict {
    pub search_id: i64,
    pub price: f64,
    pub significant: bool,
    pub robust_z_score: Option<f64>,
    pub median: Option<f64>,
    pub mad: Option<f64>,
    /// Share of history at or below this price, 0–100.
    pub percentile: Option<f64>,
    pub is_absolute_new_low: bool,
    pub sample_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_outcome_is_a_flat_string() {
        let failed = AttemptOutcome::Failed(FailureReason::Captcha);
        assert_eq!(serde_json::to_string(&failed).unwrap(), "\"captcha\"");
        assert_eq!(serde_json::to_string(&AttemptOutcome::Success).unwrap(), "\"success\"");

        let back: AttemptOutcome = serde_json::from_str("\"layout_change\"").unwrap();
        assert_eq!(back, AttemptOutcome::Failed(FailureReason::LayoutChange));
        assert!(serde_json::from_str::<AttemptOutcome>("{\"failed\":\"captcha\"}").is_err());
        assert!(serde_json::from_str::<AttemptOutcome>("\"melted\"").is_err());
    }
}

//! Field-local, stateless plausibility checks.
//!
//! Each validator parses the raw text a strategy produced and either rejects it
//! or accepts it with a confidence. Confidence drops by the strategy's fallback
//! penalty, so a value found by a last-resort strategy is trusted less than the
//! same value found by a specific selector.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::field_bounds::*;
use crate::config::ExtractionConfig;
use crate::extract::strategy::StrategyDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Unparseable,
    OutOfRange,
    /// A round placeholder value pages use for skeleton rows and ads.
    Decoy,
    /// UI label text that looks like a value but is not one.
    Noise,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Validation<T> {
    Accepted { value: T, confidence: f64 },
    Rejected(Rejection),
}

impl<T> Validation<T> {
    pub fn accepted(self) -> Option<(T, f64)> {
        match self {
            Validation::Accepted { value, confidence } => Some((value, confidence)),
            Validation::Rejected(_) => None,
        }
    }
}

pub trait FieldValidator {
    type Value;

    fn validate(&self, raw: &str, strategy: &StrategyDescriptor) -> Validation<Self::Value>;
}

fn accept<T>(value: T, base: f64, strategy: &StrategyDescriptor) -> Validation<T> {
    Validation::Accepted {
        value,
        confidence: (base - strategy.penalty()).clamp(0.0, 1.0),
    }
}

// ---------------------------------------------------------------------------
// Price
// ---------------------------------------------------------------------------

static CURRENCY_PREFIX_PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[$€£¥₹]|\b(?:USD|EUR|GBP|CAD|AUD|CHF)\b)\s?(\d{1,3}(?:,\d{3})+|\d+)(?:\.(\d{1,2}))?")
        .expect("valid regex")
});

/// Suffix-currency prices follow locale grouping: `.`, `,` or a non-breaking
/// space between thousands, and either `.` or `,` before the cents. The
/// number must not continue a longer digit run, so "1.234 €" is never read
/// as 234.
static CURRENCY_SUFFIX_PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:^|[^\d.,])(\d{1,3}(?:[.,\u{00A0}\u{202F}]\d{3})+|\d+)(?:[.,](\d{1,2}))?\s?(?:us dollars|dollars|euros|pounds|usd|eur|gbp|€)",
    )
    .expect("valid regex")
});

static BARE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,3}(?:,\d{3})+|\d{2,6})(?:\.(\d{1,2}))?\b").expect("valid regex")
});

/// Values pages render in placeholder rows; never a real fare.
pub const DECOY_PRICES: &[f64] = &[
    9_999.0, 10_000.0, 11_111.0, 12_345.0, 22_222.0, 33_333.0, 44_444.0, 49_999.0,
];

fn number_from_captures(caps: &regex::Captures<'_>) -> Option<f64> {
    let whole: String = caps.get(1)?.as_str().chars().filter(char::is_ascii_digit).collect();
    let value = match caps.get(2) {
        Some(frac) => format!("{whole}.{}", frac.as_str()),
        None => whole,
    };
    value.parse::<f64>().ok()
}

/// Parse a displayed price. Without `lenient`, a currency marker is required.
pub fn parse_price(raw: &str, lenient: bool) -> Option<f64> {
    if let Some(caps) = CURRENCY_PREFIX_PRICE.captures(raw) {
        return number_from_captures(&caps);
    }
    if let Some(caps) = CURRENCY_SUFFIX_PRICE.captures(raw) {
        return number_from_captures(&caps);
    }
    if lenient {
        if let Some(caps) = BARE_NUMBER.captures(raw) {
            return number_from_captures(&caps);
        }
    }
    None
}

/// Counts currency-anchored prices in a block of text. Repeated amounts count
/// once per occurrence; "$500 USD" is one price, keyed by where its digits start.
pub fn count_currency_prices(text: &str) -> usize {
    let starts: BTreeSet<usize> = CURRENCY_PREFIX_PRICE
        .captures_iter(text)
        .chain(CURRENCY_SUFFIX_PRICE.captures_iter(text))
        .filter_map(|caps| caps.get(1).map(|m| m.start()))
        .collect();
    starts.len()
}

#[derive(Debug, Clone, Default)]
pub struct PriceValidator;

impl FieldValidator for PriceValidator {
    type Value = f64;

    fn validate(&self, raw: &str, strategy: &StrategyDescriptor) -> Validation<f64> {
        let Some(price) = parse_price(raw, strategy.lenient) else {
            return Validation::Rejected(Rejection::Unparseable);
        };
        if !(PRICE_MIN..=PRICE_MAX).contains(&price) {
            return Validation::Rejected(Rejection::OutOfRange);
        }
        if DECOY_PRICES.iter().any(|d| (d - price).abs() < f64::EPSILON) {
            return Validation::Rejected(Rejection::Decoy);
        }
        accept(price, 0.95, strategy)
    }
}

// ---------------------------------------------------------------------------
// Airline
// ---------------------------------------------------------------------------

pub const KNOWN_AIRLINES: &[&str] = &[
    "Aer Lingus", "Aeromexico", "Air Canada", "Air France", "Air India", "Air New Zealand",
    "Alaska", "Alaska Airlines", "All Nippon Airways", "ANA", "American", "American Airlines",
    "Asiana", "Austrian", "Avianca", "British Airways", "Cathay Pacific", "Condor", "Copa",
    "Delta", "Delta Air Lines", "easyJet", "Emirates", "Ethiopian", "Etihad", "EVA Air",
    "Finnair", "Frontier", "Hawaiian", "Iberia", "Icelandair", "Japan Airlines", "JetBlue",
    "KLM", "Korean Air", "LATAM", "Lufthansa", "Norse Atlantic", "Qantas", "Qatar Airways",
    "Ryanair", "SAS", "Singapore Airlines", "Southwest", "Spirit", "Sun Country", "SWISS",
    "TAP Air Portugal", "Turkish Airlines", "United", "Virgin Atlantic", "Vueling", "WestJet",
    "Wizz Air",
];

const AIRLINE_NOISE: &[&str] = &[
    "nonstop", "non-stop", "direct", "select", "price", "prices", "stop", "stops", "economy",
    "premium economy", "business", "first", "round trip", "one way", "total", "best",
    "cheapest", "departing", "returning", "more details", "details", "view", "flights",
    "sort", "filter", "separate tickets", "layover", "overnight", "book", "travel",
];

static AIRLINE_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z][A-Za-z&'.\-]+(?:\s+[A-Za-z&'.\-]+){0,4}$").expect("valid regex")
});

static AIRLINE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:air|airlines?|airways|aviation|aero|jet|express|wings)\b").expect("valid regex")
});

/// Strips "Operated by" prefixes and partner lists down to the marketing carrier.
fn primary_carrier(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("Operated by")
        .map(str::trim)
        .unwrap_or(trimmed);
    trimmed
        .split([',', '·', '•'])
        .next()
        .unwrap_or("")
        .trim()
        .trim_end_matches('.')
}

#[derive(Debug, Clone, Default)]
pub struct AirlineValidator;

impl FieldValidator for AirlineValidator {
    type Value = String;

    fn validate(&self, raw: &str, strategy: &StrategyDescriptor) -> Validation<String> {
        let name = primary_carrier(raw);
        if name.is_empty() || name.len() > 40 {
            return Validation::Rejected(Rejection::Unparseable);
        }
        if let Some(known) = KNOWN_AIRLINES.iter().find(|a| a.eq_ignore_ascii_case(name)) {
            return accept((*known).to_string(), 0.95, strategy);
        }
        if AIRLINE_NOISE.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            return Validation::Rejected(Rejection::Noise);
        }
        if !AIRLINE_SHAPE.is_match(name) {
            return Validation::Rejected(Rejection::Unparseable);
        }
        // Bare upper-case triples are airport codes, not carriers.
        if name.len() == 3 && name.chars().all(|c| c.is_ascii_uppercase()) {
            return Validation::Rejected(Rejection::Noise);
        }
        let base = if AIRLINE_SUFFIX.is_match(name) { 0.85 } else { 0.65 };
        accept(name.to_string(), base, strategy)
    }
}

// ---------------------------------------------------------------------------
// Stops
// ---------------------------------------------------------------------------

static NONSTOP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:non-?stop|direct)\b").expect("valid regex"));

static N_STOPS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d+)\s*stops?\b").expect("valid regex"));

pub fn parse_stops(raw: &str) -> Option<u8> {
    if let Some(caps) = N_STOPS.captures(raw) {
        return caps.get(1)?.as_str().parse::<u8>().ok();
    }
    NONSTOP.is_match(raw).then_some(0)
}

#[derive(Debug, Clone, Default)]
pub struct StopsValidator;

impl StopsValidator {
    /// Cross-validation hook: does a stop count agree with a total travel time?
    pub fn consistent_with_duration(stops: u8, duration_minutes: u32, cfg: &ExtractionConfig) -> bool {
        let slow_nonstop = stops == 0 && duration_minutes > cfg.nonstop_max_minutes;
        let fast_multi_stop = stops >= 2 && duration_minutes < cfg.multi_stop_min_minutes;
        !(slow_nonstop || fast_multi_stop)
    }
}

impl FieldValidator for StopsValidator {
    type Value = u8;

    fn validate(&self, raw: &str, strategy: &StrategyDescriptor) -> Validation<u8> {
        let Some(stops) = parse_stops(raw) else {
            return Validation::Rejected(Rejection::Unparseable);
        };
        if stops > STOPS_MAX {
            return Validation::Rejected(Rejection::OutOfRange);
        }
        accept(stops, 0.95, strategy)
    }
}

// ---------------------------------------------------------------------------
// Duration
// ---------------------------------------------------------------------------

static HOURS_MINUTES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})\s*(?:hours?|hrs?|h)\b\.?(?:\s*(\d{1,2})\s*(?:minutes?|mins?|m)\b)?")
        .expect("valid regex")
});

static MINUTES_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,3})\s*(?:minutes?|mins?|m)\b").expect("valid regex")
});

pub fn parse_duration_minutes(raw: &str) -> Option<u32> {
    if let Some(caps) = HOURS_MINUTES.captures(raw) {
        let hours: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minutes: u32 = match caps.get(2) {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };
        return Some(hours * 60 + minutes);
    }
    let caps = MINUTES_ONLY.captures(raw)?;
    caps.get(1)?.as_str().parse().ok()
}

#[derive(Debug, Clone, Default)]
pub struct DurationValidator;

impl FieldValidator for DurationValidator {
    type Value = u32;

    fn validate(&self, raw: &str, strategy: &StrategyDescriptor) -> Validation<u32> {
        let Some(minutes) = parse_duration_minutes(raw) else {
            return Validation::Rejected(Rejection::Unparseable);
        };
        if !(DURATION_MIN_MINUTES..=DURATION_MAX_MINUTES).contains(&minutes) {
            return Validation::Rejected(Rejection::OutOfRange);
        }
        accept(minutes, 0.90, strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::strategy::{Matcher, PRICE_STRATEGIES};

    fn strategy(level: u8) -> StrategyDescriptor {
        StrategyDescriptor::new("test", Matcher::ScopeText, level)
    }

    #[test]
    fn price_parses_grouped_dollars() {
        assert_eq!(parse_price("$1,234", false), Some(1234.0));
        assert_eq!(parse_price("from $ 512.40 round trip", false), Some(512.4));
        assert_eq!(parse_price("1,234 US dollars", false), Some(1234.0));
        assert_eq!(parse_price("€899", false), Some(899.0));
    }

    #[test]
    fn suffix_prices_honour_locale_grouping() {
        assert_eq!(parse_price("1.234 €", false), Some(1234.0));
        assert_eq!(parse_price("1.234,50 €", false), Some(1234.5));
        assert_eq!(parse_price("1\u{202F}234 EUR", false), Some(1234.0));
        assert_eq!(parse_price("ab 899,00 €", false), Some(899.0));
        assert_eq!(parse_price("1.2345 €", false), None);

        let v = PriceValidator.validate("1.234 €", &strategy(0));
        assert!(matches!(v, Validation::Accepted { value, .. } if value == 1234.0), "{v:?}");
    }

    #[test]
    fn every_price_occurrence_is_counted() {
        assert_eq!(count_currency_prices("$500 Alpha Air $500 Bravo Airways"), 2);
        assert_eq!(count_currency_prices("500 US dollars Alpha 650 US dollars Bravo"), 2);
        assert_eq!(count_currency_prices("$500 USD nonstop 6 hr"), 1);
        assert_eq!(count_currency_prices("Nonstop 6 hr"), 0);
    }

    #[test]
    fn bare_numbers_need_lenient_mode() {
        assert_eq!(parse_price("1234", false), None);
        assert_eq!(parse_price("1234", true), Some(1234.0));
    }

    #[test]
    fn price_bounds_and_decoys_reject() {
        let v = PriceValidator;
        assert_eq!(v.validate("$49", &strategy(0)), Validation::Rejected(Rejection::OutOfRange));
        assert_eq!(v.validate("$60,000", &strategy(0)), Validation::Rejected(Rejection::OutOfRange));
        assert_eq!(v.validate("$12,345", &strategy(0)), Validation::Rejected(Rejection::Decoy));
        assert!(v.validate("$50", &strategy(0)).accepted().is_some());
    }

    #[test]
    fn price_confidence_drops_per_fallback_level() {
        let v = PriceValidator;
        let (_, c0) = v.validate("$800", &strategy(0)).accepted().unwrap();
        let (_, c2) = v.validate("$800", &strategy(2)).accepted().unwrap();
        assert!((c0 - c2 - 0.10).abs() < 1e-9, "c0={c0} c2={c2}");
    }

    #[test]
    fn lenient_price_strategy_accepts_bare_context_number() {
        let v = PriceValidator;
        let bare = PRICE_STRATEGIES.iter().find(|s| s.lenient).unwrap();
        let (price, _) = v.validate("742", bare).accepted().unwrap();
        assert_eq!(price, 742.0);
    }

    #[test]
    fn airline_known_beats_shaped() {
        let v = AirlineValidator;
        let (name, known_conf) = v.validate("delta", &strategy(0)).accepted().unwrap();
        assert_eq!(name, "Delta");
        let (name, shaped_conf) = v.validate("Example Air", &strategy(0)).accepted().unwrap();
        assert_eq!(name, "Example Air");
        assert!(known_conf > shaped_conf);
    }

    #[test]
    fn airline_rejects_ui_noise_and_airport_codes() {
        let v = AirlineValidator;
        assert_eq!(v.validate("Nonstop", &strategy(0)), Validation::Rejected(Rejection::Noise));
        assert_eq!(v.validate("JFK", &strategy(0)), Validation::Rejected(Rejection::Noise));
        assert!(v.validate("13 hr 45 min", &strategy(0)).accepted().is_none());
    }

    #[test]
    fn airline_strips_operated_by_and_partners() {
        let v = AirlineValidator;
        let (name, _) = v.validate("Operated by Example Air, Partner Jet", &strategy(1)).accepted().unwrap();
        assert_eq!(name, "Example Air");
    }

    #[test]
    fn stops_parse_variants() {
        assert_eq!(parse_stops("Nonstop"), Some(0));
        assert_eq!(parse_stops("Non-stop flight"), Some(0));
        assert_eq!(parse_stops("1 stop"), Some(1));
        assert_eq!(parse_stops("2 stops LHR, FRA"), Some(2));
        assert_eq!(parse_stops("13 hr 45 min"), None);
        assert_eq!(
            StopsValidator.validate("5 stops", &strategy(0)),
            Validation::Rejected(Rejection::OutOfRange)
        );
    }

    #[test]
    fn duration_parse_variants() {
        assert_eq!(parse_duration_minutes("13 hr 45 min"), Some(825));
        assert_eq!(parse_duration_minutes("13h 45m"), Some(825));
        assert_eq!(parse_duration_minutes("2 hr"), Some(120));
        assert_eq!(parse_duration_minutes("45 min"), Some(45));
        assert_eq!(parse_duration_minutes("Nonstop"), None);
    }

    #[test]
    fn duration_bounds() {
        let v = DurationValidator;
        assert_eq!(v.validate("20 min", &strategy(0)), Validation::Rejected(Rejection::OutOfRange));
        assert_eq!(v.validate("49 hr", &strategy(0)), Validation::Rejected(Rejection::OutOfRange));
        assert!(v.validate("48 hr", &strategy(0)).accepted().is_some());
    }

    #[test]
    fn stops_duration_cross_check() {
        let cfg = ExtractionConfig::default();
        assert!(!StopsValidator::consistent_with_duration(0, 25 * 60, &cfg));
        assert!(!StopsValidator::consistent_with_duration(2, 150, &cfg));
        assert!(StopsValidator::consistent_with_duration(0, 825, &cfg));
        assert!(StopsValidator::consistent_with_duration(2, 600, &cfg));
    }
}

//! Versioned search definitions.
//!
//! A definition is the unit of comparability for a price series. Editing a
//! field that changes what is being priced produces a new version row linked
//! to its parent; editing anything else updates the row in place.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::types::FlightData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripType {
    OneWay,
    RoundTrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CabinClass {
    Economy,
    PremiumEconomy,
    Business,
    First,
}

impl std::fmt::Display for CabinClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CabinClass::Economy => "economy",
            CabinClass::PremiumEconomy => "premium_economy",
            CabinClass::Business => "business",
            CabinClass::First => "first",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopsFilter {
    Any,
    NonstopOnly,
    OneStopOrFewer,
    TwoStopsOrFewer,
}

impl StopsFilter {
    pub fn max_stops(&self) -> Option<u8> {
        match self {
            StopsFilter::Any => None,
            StopsFilter::NonstopOnly => Some(0),
            StopsFilter::OneStopOrFewer => Some(1),
            StopsFilter::TwoStopsOrFewer => Some(2),
        }
    }
}

/// Either a fixed departure window or one that rolls forward with the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DateMode {
    Fixed { depart_from: NaiveDate, depart_until: NaiveDate },
    Rolling { start_days_from_now: u32, end_days_from_now: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripDuration {
    pub min_nights: u32,
    pub max_nights: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passengers {
    pub adults: u8,
    pub children: u8,
    pub infants_in_seat: u8,
    pub infants_on_lap: u8,
}

impl Passengers {
    pub fn total(&self) -> u32 {
        u32::from(self.adults)
            + u32::from(self.children)
            + u32::from(self.infants_in_seat)
            + u32::from(self.infants_on_lap)
    }
}

impl Default for Passengers {
    fn default() -> Self {
        Self { adults: 1, children: 0, infants_in_seat: 0, infants_on_lap: 0 }
    }
}

/// Everything a user specifies about a monitored search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpec {
    pub name: Option<String>,
    pub origin: String,
    pub destination: String,
    pub trip_type: TripType,
    pub date_mode: DateMode,
    /// Round trips only.
    pub trip_duration: Option<TripDuration>,
    pub passengers: Passengers,
    pub cabin: CabinClass,
    pub stops_filter: StopsFilter,
    #[serde(default)]
    pub airlines_include: Vec<String>,
    #[serde(default)]
    pub airlines_exclude: Vec<String>,
    pub currency: String,
    pub locale: String,
    #[serde(default)]
    pub carry_on_bags: u8,
    #[serde(default)]
    pub checked_bags: u8,
    pub scrape_frequency_hours: u32,
}

/// The subset of a spec that decides whether two price series are comparable.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparabilityKey {
    origin: String,
    destination: String,
    trip_type: TripType,
    date_mode: DateMode,
    trip_duration: Option<TripDuration>,
    passengers: Passengers,
    cabin: CabinClass,
    stops_filter: StopsFilter,
    currency: String,
}

impl SearchSpec {
    pub fn comparability_key(&self) -> ComparabilityKey {
        ComparabilityKey {
            origin: self.origin.to_ascii_uppercase(),
            destination: self.destination.to_ascii_uppercase(),
            trip_type: self.trip_type,
            date_mode: self.date_mode,
            trip_duration: self.trip_duration,
            passengers: self.passengers,
            cabin: self.cabin,
            stops_filter: self.stops_filter,
            currency: self.currency.to_ascii_uppercase(),
        }
    }

    /// Configuration errors here propagate to the caller; they are never
    /// recorded as acquisition failures.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(AppError::InvalidDefinition(msg)) };

        for (label, code) in [("origin", &self.origin), ("destination", &self.destination)] {
            if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                return invalid(format!("{label} must be a 3-letter airport code, got {code:?}"));
            }
        }
        if self.origin.eq_ignore_ascii_case(&self.destination) {
            return invalid("origin and destination must differ".to_string());
        }
        if self.passengers.adults == 0 {
            return invalid("at least one adult is required".to_string());
        }
        if self.passengers.infants_on_lap > self.passengers.adults {
            return invalid("each lap infant needs an adult".to_string());
        }
        if self.passengers.total() > 9 {
            return invalid("at most 9 passengers per search".to_string());
        }
        match self.date_mode {
            DateMode::Fixed { depart_from, depart_until } if depart_from > depart_until => {
                return invalid("fixed date range ends before it starts".to_string());
            }
            DateMode::Rolling { start_days_from_now, end_days_from_now } if start_days_from_now > end_days_from_now => {
                return invalid("rolling window ends before it starts".to_string());
            }
            _ => {}
        }
        match (self.trip_type, self.trip_duration) {
            (TripType::RoundTrip, None) => {
                return invalid("round trips need a trip duration".to_string());
            }
            (TripType::RoundTrip, Some(d)) if d.min_nights > d.max_nights => {
                return invalid("trip duration min exceeds max".to_string());
            }
            _ => {}
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return invalid(format!("currency must be a 3-letter code, got {:?}", self.currency));
        }
        if self.scrape_frequency_hours == 0 {
            return invalid("scrape frequency must be at least one hour".to_string());
        }
        Ok(())
    }

    /// Departure (and return, for round trips) dates to search on `today`.
    /// Uses the earliest departure in the window and the shortest stay.
    pub fn travel_dates(&self, today: NaiveDate) -> (NaiveDate, Option<NaiveDate>) {
        let depart = match self.date_mode {
            DateMode::Fixed { depart_from, .. } => depart_from.max(today),
            DateMode::Rolling { start_days_from_now, .. } => {
                today + Duration::days(i64::from(start_days_from_now))
            }
        };
        let return_date = match (self.trip_type, self.trip_duration) {
            (TripType::RoundTrip, Some(d)) => Some(depart + Duration::days(i64::from(d.min_nights))),
            _ => None,
        };
        (depart, return_date)
    }

    /// True once a fixed window lies entirely in the past.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        matches!(self.date_mode, DateMode::Fixed { depart_until, .. } if depart_until < today)
    }

    /// Whether a candidate fits this search's filters. A candidate that does
    /// not fit belongs to a different series and is not stored.
    pub fn admits(&self, candidate: &FlightData) -> bool {
        if let (Some(max), Some(stops)) = (self.stops_filter.max_stops(), candidate.stops) {
            if stops > max {
                return false;
            }
        }
        let Some(airline) = candidate.airline.as_deref() else {
            return self.airlines_include.is_empty();
        };
        if self.airlines_exclude.iter().any(|a| a.eq_ignore_ascii_case(airline)) {
            return false;
        }
        self.airlines_include.is_empty()
            || self.airlines_include.iter().any(|a| a.eq_ignore_ascii_case(airline))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDefinition {
    pub id: i64,
    pub spec: SearchSpec,
    pub version: i64,
    pub parent_id: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// How an edit must be applied to storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Revision {
    /// Nothing comparability-affecting changed: overwrite the spec in place.
    InPlace(SearchSpec),
    /// A new row with `version + 1` and `parent_id = parent`; the parent is deactivated.
    NewVersion { parent_id: i64, version: i64, spec: SearchSpec },
}

impl SearchDefinition {
    pub fn revise(&self, updated: SearchSpec) -> Result<Revision> {
        updated.validate()?;
        if updated.comparability_key() == self.spec.comparability_key() {
            Ok(Revision::InPlace(updated))
        } else {
            Ok(Revision::NewVersion {
                parent_id: self.id,
                version: self.version + 1,
                spec: updated,
            })
        }
    }
}

//! Page-level fallback used only when no row container can be located.
//!
//! Each field is collected as an independent page-wide list and lists are
//! paired by position. That pairing is unreliable, so results carry a low
//! correlation confidence unless every list holds exactly one value.

use scraper::Html;

use crate::config::correlation::{PAGE_LEVEL, PAGE_LEVEL_SINGLE};
use crate::config::ExtractionConfig;
use crate::extract::rows::all_accepted;
use crate::extract::strategy::{
    CompiledStrategy, PAGE_AIRLINE_STRATEGIES, PAGE_DURATION_STRATEGIES, PAGE_PRICE_STRATEGIES,
    PAGE_STOPS_STRATEGIES,
};
use crate::extract::unified::blend_overall;
use crate::extract::validators::{AirlineValidator, DurationValidator, PriceValidator, StopsValidator};
use crate::types::{ExtractionMethod, FieldConfidences, FlightData};

pub struct PageLevelExtractor {
    price: Vec<CompiledStrategy>,
    airline: Vec<CompiledStrategy>,
    stops: Vec<CompiledStrategy>,
    duration: Vec<CompiledStrategy>,
    correlation_weight: f64,
}

impl PageLevelExtractor {
    pub fn new(cfg: &ExtractionConfig) -> Self {
        Self {
            price: CompiledStrategy::compile_chain(PAGE_PRICE_STRATEGIES),
            airline: CompiledStrategy::compile_chain(PAGE_AIRLINE_STRATEGIES),
            stops: CompiledStrategy::compile_chain(PAGE_STOPS_STRATEGIES),
            duration: CompiledStrategy::compile_chain(PAGE_DURATION_STRATEGIES),
            correlation_weight: cfg.correlation_weight,
        }
    }

    pub fn extract(&self, doc: &Html) -> Vec<FlightData> {
        let root = doc.root_element();
        let prices = all_accepted(&self.price, &PriceValidator, root);
        if prices.is_empty() {
            return Vec::new();
        }
        let airlines = all_accepted(&self.airline, &AirlineValidator, root);
        let stops = all_accepted(&self.stops, &StopsValidator, root);
        let durations = all_accepted(&self.duration, &DurationValidator, root);

        let single = prices.len() == 1 && airlines.len() == 1 && stops.len() == 1 && durations.len() == 1;
        let correlation_confidence = if single { PAGE_LEVEL_SINGLE } else { PAGE_LEVEL };

        prices
            .into_iter()
            .enumerate()
            .map(|(i, (price, price_conf))| {
                let airline = airlines.get(i).cloned();
                let stop = stops.get(i).copied();
                let duration = durations.get(i).copied();
                let field_confidence = FieldConfidences {
                    price: price_conf,
                    airline: airline.as_ref().map(|(_, c)| *c),
                    stops: stop.map(|(_, c)| c),
                    duration: duration.map(|(_, c)| c),
                };
                FlightData {
                    price,
                    airline: airline.map(|(name, _)| name),
                    stops: stop.map(|(n, _)| n),
                    duration_minutes: duration.map(|(m, _)| m),
                    field_confidence,
                    correlation_confidence,
                    extraction_method: ExtractionMethod::PageLevel,
                    row_method: None,
                    overall_confidence: blend_overall(
                        &field_confidence,
                        correlation_confidence,
                        self.correlation_weight,
                    ),
                }
            })
            .collect()
    }
}

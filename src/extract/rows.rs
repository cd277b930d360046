//! Row Locator and Row Extractor.
//!
//! A row is one result container in the parsed page. Every field of a
//! candidate is read from inside the same container, so price, airline, stops
//! and duration are correlated by construction instead of by list position.

use std::collections::HashSet;

use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, warn};

use crate::config::ExtractionConfig;
use crate::extract::strategy::{
    element_text, CompiledStrategy, ACCESSIBILITY_ROW_SELECTORS, AIRLINE_STRATEGIES,
    DURATION_STRATEGIES, PRICE_CONTEXT_SELECTOR, PRICE_STRATEGIES, SPECIFIC_ROW_SELECTORS,
    STOPS_STRATEGIES,
};
use crate::extract::unified::blend_overall;
use crate::extract::validators::{
    count_currency_prices, parse_duration_minutes, parse_price, parse_stops, AirlineValidator,
    DurationValidator, FieldValidator, PriceValidator, StopsValidator,
};
use crate::types::{ExtractionMethod, FieldConfidences, FlightData, RowMethod};

/// Opaque handle to one result container inside a parsed document.
#[derive(Debug, Clone, Copy)]
pub struct RowScope<'a> {
    element: ElementRef<'a>,
    pub method: RowMethod,
}

#[derive(Debug)]
pub struct LocatedRows<'a> {
    /// Valid rows only: each one has an extractable price.
    pub rows: Vec<RowScope<'a>>,
    /// True if the page showed any recognisable results structure at all,
    /// whether or not valid rows came out of it.
    pub structure_found: bool,
}

// ---------------------------------------------------------------------------
// Field extraction shared by rows and the page-level fallback
// ---------------------------------------------------------------------------

/// First value any strategy in `chain` yields that `validator` accepts.
pub fn first_accepted<V: FieldValidator>(
    chain: &[CompiledStrategy],
    validator: &V,
    scope: ElementRef<'_>,
) -> Option<(V::Value, f64)> {
    for strategy in chain {
        for raw in strategy.raw_values(scope) {
            if let Some(hit) = validator.validate(&raw, &strategy.descriptor).accepted() {
                return Some(hit);
            }
        }
    }
    None
}

/// Every accepted value from the first strategy in `chain` that yields any.
/// Lists are never mixed across strategies.
pub fn all_accepted<V: FieldValidator>(
    chain: &[CompiledStrategy],
    validator: &V,
    scope: ElementRef<'_>,
) -> Vec<(V::Value, f64)> {
    for strategy in chain {
        let hits: Vec<_> = strategy
            .raw_values(scope)
            .iter()
            .filter_map(|raw| validator.validate(raw, &strategy.descriptor).accepted())
            .collect();
        if !hits.is_empty() {
            return hits;
        }
    }
    Vec::new()
}

// ---------------------------------------------------------------------------
// RowExtractor
// ---------------------------------------------------------------------------

pub struct RowExtractor {
    price: Vec<CompiledStrategy>,
    airline: Vec<CompiledStrategy>,
    stops: Vec<CompiledStrategy>,
    duration: Vec<CompiledStrategy>,
    correlation_weight: f64,
}

impl RowExtractor {
    pub fn new(cfg: &ExtractionConfig) -> Self {
        Self {
            price: CompiledStrategy::compile_chain(PRICE_STRATEGIES),
            airline: CompiledStrategy::compile_chain(AIRLINE_STRATEGIES),
            stops: CompiledStrategy::compile_chain(STOPS_STRATEGIES),
            duration: CompiledStrategy::compile_chain(DURATION_STRATEGIES),
            correlation_weight: cfg.correlation_weight,
        }
    }

    fn extract_price(&self, scope: ElementRef<'_>) -> Option<(f64, f64)> {
        first_accepted(&self.price, &PriceValidator, scope)
    }

    fn has_price(&self, scope: ElementRef<'_>) -> bool {
        self.extract_price(scope).is_some()
    }

    /// One candidate per row, or None when the row has no extractable price.
    pub fn extract(&self, row: RowScope<'_>) -> Option<FlightData> {
        let (price, price_conf) = self.extract_price(row.element)?;
        let airline = first_accepted(&self.airline, &AirlineValidator, row.element);
        let stops = first_accepted(&self.stops, &StopsValidator, row.element);
        let duration = first_accepted(&self.duration, &DurationValidator, row.element);

        let field_confidence = FieldConfidences {
            price: price_conf,
            airline: airline.as_ref().map(|(_, c)| *c),
            stops: stops.map(|(_, c)| c),
            duration: duration.map(|(_, c)| c),
        };
        let correlation_confidence = row.method.correlation_confidence();

        Some(FlightData {
            price,
            airline: airline.map(|(name, _)| name),
            stops: stops.map(|(n, _)| n),
            duration_minutes: duration.map(|(m, _)| m),
            field_confidence,
            correlation_confidence,
            extraction_method: ExtractionMethod::PerRow,
            row_method: Some(row.method),
            overall_confidence: blend_overall(&field_confidence, correlation_confidence, self.correlation_weight),
        })
    }
}

// ---------------------------------------------------------------------------
// RowLocator
// ---------------------------------------------------------------------------

pub struct RowLocator {
    specific: Vec<Selector>,
    accessibility: Vec<Selector>,
    price_context: Option<Selector>,
}

const NO_RESULTS_MARKERS: &[&str] = &[
    "no results",
    "no flights found",
    "no matching flights",
    "no options matching",
];

fn compile_selectors(raw: &[&str]) -> Vec<Selector> {
    raw.iter()
        .filter_map(|s| match Selector::parse(s) {
            Ok(sel) => Some(sel),
            Err(e) => {
                warn!(selector = s, "row selector failed to parse: {e:?}");
                None
            }
        })
        .collect()
}

impl RowLocator {
    pub fn new() -> Self {
        Self {
            specific: compile_selectors(SPECIFIC_ROW_SELECTORS),
            accessibility: compile_selectors(ACCESSIBILITY_ROW_SELECTORS),
            price_context: Selector::parse(PRICE_CONTEXT_SELECTOR).ok(),
        }
    }

    /// Walks the tiers in priority order and returns the rows of the first
    /// tier that yields at least one valid row.
    pub fn locate<'a>(&self, doc: &'a Html, extractor: &RowExtractor) -> LocatedRows<'a> {
        let root = doc.root_element();
        let mut structure_found = false;

        for (selectors, method) in [
            (&self.specific, RowMethod::SpecificSelector),
            (&self.accessibility, RowMethod::Accessibility),
        ] {
            let matched: Vec<ElementRef<'a>> = selectors.iter().flat_map(|sel| root.select(sel)).collect();
            if matched.is_empty() {
                continue;
            }
            structure_found = true;
            let valid = innermost(matched.into_iter().filter(|el| extractor.has_price(*el)).collect());
            if !valid.is_empty() {
                debug!(tier = %method, rows = valid.len(), "[EXTRACT] rows located");
                return LocatedRows {
                    rows: valid.into_iter().map(|element| RowScope { element, method }).collect(),
                    structure_found,
                };
            }
        }

        let dynamic = self.dynamic_rows(doc);
        let dynamic = innermost(dynamic.into_iter().filter(|el| extractor.has_price(*el)).collect());
        if !dynamic.is_empty() {
            debug!(tier = %RowMethod::DynamicAncestor, rows = dynamic.len(), "[EXTRACT] rows located");
            return LocatedRows {
                rows: dynamic
                    .into_iter()
                    .map(|element| RowScope { element, method: RowMethod::DynamicAncestor })
                    .collect(),
                structure_found: true,
            };
        }

        if let Some(sel) = &self.price_context {
            structure_found |= root.select(sel).next().is_some();
        }
        if !structure_found {
            let text = element_text(root).to_lowercase();
            structure_found = NO_RESULTS_MARKERS.iter().any(|m| text.contains(m));
        }

        LocatedRows { rows: Vec::new(), structure_found }
    }

    /// Last-resort tier: start at every text node carrying a currency price and
    /// walk up to the nearest ancestor that also carries duration or stops text.
    /// The walk stops once an ancestor holds more than one price, since at
    /// that point it has grown past a single result.
    fn dynamic_rows<'a>(&self, doc: &'a Html) -> Vec<ElementRef<'a>> {
        let mut seen = HashSet::new();
        let mut rows = Vec::new();

        for node in doc.root_element().descendants() {
            let Node::Text(text) = node.value() else {
                continue;
            };
            if parse_price(text, false).is_none() {
                continue;
            }
            for ancestor in node.ancestors() {
                let Some(el) = ElementRef::wrap(ancestor) else {
                    continue;
                };
                if matches!(el.value().name(), "body" | "html") {
                    break;
                }
                let block = element_text(el);
                if count_currency_prices(&block) > 1 {
                    break;
                }
                if parse_duration_minutes(&block).is_some() || parse_stops(&block).is_some() {
                    if seen.insert(el.id()) {
                        rows.push(el);
                    }
                    break;
                }
            }
        }
        rows
    }
}

impl Default for RowLocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Drops any element that contains another element of the set, so a section
/// wrapping several rows never stands in for the rows themselves.
fn innermost(elements: Vec<ElementRef<'_>>) -> Vec<ElementRef<'_>> {
    let ids: HashSet<_> = elements.iter().map(|e| e.id()).collect();
    let mut containers = HashSet::new();
    for el in &elements {
        for ancestor in el.ancestors() {
            if ids.contains(&ancestor.id()) {
                containers.insert(ancestor.id());
            }
        }
    }
    let mut seen = HashSet::new();
    elements
        .into_iter()
        .filter(|e| !containers.contains(&e.id()) && seen.insert(e.id()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locate_and_extract(html: &str) -> (Vec<FlightData>, bool) {
        let doc = Html::parse_document(html);
        let extractor = RowExtractor::new(&ExtractionConfig::default());
        let located = RowLocator::new().locate(&doc, &extractor);
        let rows = located.rows.iter().filter_map(|r| extractor.extract(*r)).collect();
        (rows, located.structure_found)
    }

    #[test]
    fn each_row_keeps_its_own_fields() {
        // Row 2 has no stops element: its stops must come from its own text, never from row 1 or 3.
        let html = r#"
            <ul>
              <li class="flight-result">
                <span class="price">$1,111</span><span class="airline">Alpha Air</span>
                <span class="stops">Nonstop</span><span class="duration">7 hr 5 min</span>
              </li>
              <li class="flight-result">
                <span class="price">$2,222</span><span class="airline">Bravo Airways</span>
                <span>2 stops</span><span class="duration">19 hr 10 min</span>
              </li>
              <li class="flight-result">
                <span class="price">$3,333</span><span class="airline">Charlie Jet</span>
                <span class="stops">1 stop</span><span class="duration">12 hr 15 min</span>
              </li>
            </ul>"#;
        let (rows, _) = locate_and_extract(html);
        assert_eq!(rows.len(), 3);

        let expected = [
            (1111.0, "Alpha Air", 0, 425),
            (2222.0, "Bravo Airways", 2, 1150),
            (3333.0, "Charlie Jet", 1, 735),
        ];
        for (row, (price, airline, stops, minutes)) in rows.iter().zip(expected) {
            assert_eq!(row.price, price);
            assert_eq!(row.airline.as_deref(), Some(airline));
            assert_eq!(row.stops, Some(stops));
            assert_eq!(row.duration_minutes, Some(minutes));
            assert_eq!(row.row_method, Some(RowMethod::SpecificSelector));
        }
    }

    #[test]
    fn rows_without_price_are_discarded() {
        let html = r#"
            <div class="result-row"><span class="airline">Ad Air</span><span>Sponsored 4 hr</span></div>
            <div class="result-row"><span class="price">$640</span><span class="airline">Delta</span></div>"#;
        let (rows, structure_found) = locate_and_extract(html);
        assert!(structure_found);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, 640.0);
        assert_eq!(rows[0].airline.as_deref(), Some("Delta"));
    }

    #[test]
    fn accessibility_tier_used_when_no_specific_rows() {
        let html = r#"
            <div role="list">
              <div role="listitem"><span aria-label="812 US dollars">812</span><span>United</span><span>1 stop</span><span>9 hr</span></div>
            </div>"#;
        let (rows, _) = locate_and_extract(html);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, 812.0);
        assert_eq!(rows[0].row_method, Some(RowMethod::Accessibility));
        assert_eq!(rows[0].correlation_confidence, crate::config::correlation::ACCESSIBILITY);
    }

    #[test]
    fn section_wrapping_rows_is_not_a_row() {
        let html = r#"
            <div role="listitem" id="section">
              <div role="listitem"><b>$500</b> Nonstop 5 hr</div>
              <div role="listitem"><b>$700</b> 1 stop 8 hr</div>
            </div>"#;
        let (rows, _) = locate_and_extract(html);
        let prices: Vec<f64> = rows.iter().map(|r| r.price).collect();
        assert_eq!(prices, vec![500.0, 700.0]);
    }

    #[test]
    fn dynamic_ancestor_walk_finds_unmarked_rows() {
        let html = r#"
            <main>
              <div><div><p>$430</p></div><p>Example Air</p><p>Nonstop</p><p>6 hr 20 min</p></div>
              <div><div><p>$515</p></div><p>Other Airways</p><p>1 stop</p><p>9 hr</p></div>
            </main>"#;
        let (rows, _) = locate_and_extract(html);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.row_method == Some(RowMethod::DynamicAncestor)));
        assert_eq!(rows[0].stops, Some(0));
        assert_eq!(rows[1].stops, Some(1));
        assert_eq!(rows[1].duration_minutes, Some(540));
    }

    #[test]
    fn dynamic_rows_never_borrow_fields_from_a_neighbour() {
        // The first result has no stops or duration of its own; the walk must
        // not climb into <main> and hand it the second result's values.
        let html = r#"
            <main>
              <div><p>500 US dollars</p><span>Alpha Air</span></div>
              <div><p>650 US dollars</p><span>Bravo Airways</span><p>2 stops</p><p>15 hr</p></div>
            </main>"#;
        let (rows, _) = locate_and_extract(html);
        assert!(rows.iter().all(|r| r.airline.as_deref() != Some("Alpha Air")), "{rows:?}");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, 650.0);
        assert_eq!(rows[0].airline.as_deref(), Some("Bravo Airways"));
        assert_eq!(rows[0].stops, Some(2));
        assert_eq!(rows[0].duration_minutes, Some(900));
        assert_eq!(rows[0].row_method, Some(RowMethod::DynamicAncestor));
    }

    #[test]
    fn repeated_amounts_still_bound_the_ancestor_walk() {
        let html = r#"
            <main>
              <div><p>$500</p><span>Alpha Air</span></div>
              <div><p>$500</p><span>Bravo Airways</span><p>Nonstop</p><p>6 hr</p></div>
            </main>"#;
        let (rows, _) = locate_and_extract(html);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].airline.as_deref(), Some("Bravo Airways"));
        assert_eq!(rows[0].stops, Some(0));
    }

    #[test]
    fn empty_results_page_counts_as_structure() {
        let (rows, structure_found) = locate_and_extract("<html><body><h2>No flights found</h2></body></html>");
        assert!(rows.is_empty());
        assert!(structure_found);
    }

    #[test]
    fn unrecognised_page_has_no_structure() {
        let (rows, structure_found) = locate_and_extract("<html><body><h1>Welcome</h1><p>Try again</p></body></html>");
        assert!(rows.is_empty());
        assert!(!structure_found);
    }
}

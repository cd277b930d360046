//! Statically-typed extraction strategy descriptors.
//!
//! Every field is located by an ordered chain of descriptors. The chain is
//! walked uniformly no matter which concrete matcher a descriptor uses; the
//! descriptor's `level` says how far down the fallback chain it sits and costs
//! `level * FALLBACK_PENALTY` confidence.

use scraper::{ElementRef, Selector};
use tracing::warn;

use crate::config::field_bounds::FALLBACK_PENALTY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    /// Text content of elements matching a CSS selector inside the scope.
    Css(&'static str),
    /// An attribute value on elements matching a CSS selector inside the scope.
    Attribute {
        selector: &'static str,
        attr: &'static str,
    },
    /// The scope's own flattened text, handed whole to the field parser.
    ScopeText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyDescriptor {
    pub name: &'static str,
    pub matcher: Matcher,
    pub level: u8,
    /// Allows a price without a currency marker. Only set on price-context matchers.
    pub lenient: bool,
}

impl StrategyDescriptor {
    pub const fn new(name: &'static str, matcher: Matcher, level: u8) -> Self {
        Self { name, matcher, level, lenient: false }
    }

    pub const fn lenient(self) -> Self {
        Self { lenient: true, ..self }
    }

    pub fn penalty(&self) -> f64 {
        f64::from(self.level) * FALLBACK_PENALTY
    }
}

// ---------------------------------------------------------------------------
// Default chains
// ---------------------------------------------------------------------------

/// Elements that are known to carry a price. Lenient parsing is confined to these.
pub const PRICE_CONTEXT_SELECTOR: &str =
    "[data-testid='price'], [data-field='price'], .price, .fare-price, .YMlIz";

const PRICE_CONTEXT: StrategyDescriptor =
    StrategyDescriptor::new("price_context", Matcher::Css(PRICE_CONTEXT_SELECTOR), 0);
const PRICE_ARIA: StrategyDescriptor = StrategyDescriptor::new(
    "price_aria_label",
    Matcher::Attribute { selector: "[aria-label]", attr: "aria-label" },
    1,
);
const PRICE_SCOPE_TEXT: StrategyDescriptor =
    StrategyDescriptor::new("price_scope_text", Matcher::ScopeText, 2);
const PRICE_CONTEXT_BARE: StrategyDescriptor =
    StrategyDescriptor::new("price_context_bare", Matcher::Css(PRICE_CONTEXT_SELECTOR), 3).lenient();

const AIRLINE_FIELD: StrategyDescriptor = StrategyDescriptor::new(
    "airline_field",
    Matcher::Css("[data-testid='airline'], [data-field='airline'], .airline, .carrier, .sSHqwe"),
    0,
);
const AIRLINE_ARIA: StrategyDescriptor = StrategyDescriptor::new(
    "airline_aria_label",
    Matcher::Attribute { selector: "[aria-label*='Operated by'], [aria-label*='airline']", attr: "aria-label" },
    1,
);
const AIRLINE_ANY_TEXT: StrategyDescriptor =
    StrategyDescriptor::new("airline_any_text", Matcher::Css("span, div"), 2);

const STOPS_FIELD: StrategyDescriptor = StrategyDescriptor::new(
    "stops_field",
    Matcher::Css("[data-testid='stops'], [data-field='stops'], .stops, .EfT7Ae"),
    0,
);
const STOPS_ARIA: StrategyDescriptor = StrategyDescriptor::new(
    "stops_aria_label",
    Matcher::Attribute { selector: "[aria-label*='stop'], [aria-label*='Nonstop']", attr: "aria-label" },
    1,
);
const STOPS_SCOPE_TEXT: StrategyDescriptor =
    StrategyDescriptor::new("stops_scope_text", Matcher::ScopeText, 2);

const DURATION_FIELD: StrategyDescriptor = StrategyDescriptor::new(
    "duration_field",
    Matcher::Css("[data-testid='duration'], [data-field='duration'], .duration, .gvkrdb"),
    0,
);
const DURATION_ARIA: StrategyDescriptor = StrategyDescriptor::new(
    "duration_aria_label",
    Matcher::Attribute { selector: "[aria-label*='duration'], [aria-label*='Total']", attr: "aria-label" },
    1,
);
const DURATION_SCOPE_TEXT: StrategyDescriptor =
    StrategyDescriptor::new("duration_scope_text", Matcher::ScopeText, 2);

/// Row-scoped chains, most specific first.
pub const PRICE_STRATEGIES: &[StrategyDescriptor] =
    &[PRICE_CONTEXT, PRICE_ARIA, PRICE_SCOPE_TEXT, PRICE_CONTEXT_BARE];
pub const AIRLINE_STRATEGIES: &[StrategyDescriptor] = &[AIRLINE_FIELD, AIRLINE_ARIA, AIRLINE_ANY_TEXT];
pub const STOPS_STRATEGIES: &[StrategyDescriptor] = &[STOPS_FIELD, STOPS_ARIA, STOPS_SCOPE_TEXT];
pub const DURATION_STRATEGIES: &[StrategyDescriptor] =
    &[DURATION_FIELD, DURATION_ARIA, DURATION_SCOPE_TEXT];

/// Page-wide chains. Whole-scope text and generic element sweeps are excluded:
/// on a full page they match everything.
pub const PAGE_PRICE_STRATEGIES: &[StrategyDescriptor] = &[PRICE_CONTEXT, PRICE_CONTEXT_BARE];
pub const PAGE_AIRLINE_STRATEGIES: &[StrategyDescriptor] = &[AIRLINE_FIELD, AIRLINE_ARIA];
pub const PAGE_STOPS_STRATEGIES: &[StrategyDescriptor] = &[STOPS_FIELD, STOPS_ARIA];
pub const PAGE_DURATION_STRATEGIES: &[StrategyDescriptor] = &[DURATION_FIELD, DURATION_ARIA];

/// Row container selectors, tier 1: structural, page-specific.
pub const SPECIFIC_ROW_SELECTORS: &[&str] = &[
    "li.pIav2d",
    "[data-testid='flight-result']",
    "[data-result-row]",
    ".flight-result",
    ".result-row",
];

/// Row container selectors, tier 2: accessibility attributes survive UI churn better.
pub const ACCESSIBILITY_ROW_SELECTORS: &[&str] =
    &["[role='listitem']", "[role='row']", "li[aria-label]", "[role='article']"];

// ---------------------------------------------------------------------------
// Compiled form
// ---------------------------------------------------------------------------

/// A descriptor with its selector parsed once up front.
#[derive(Debug)]
pub struct CompiledStrategy {
    pub descriptor: StrategyDescriptor,
    selector: Option<Selector>,
}

impl CompiledStrategy {
    /// Returns None when the descriptor's selector does not parse.
    pub fn compile(descriptor: StrategyDescriptor) -> Option<Self> {
        let selector = match descriptor.matcher {
            Matcher::Css(sel) | Matcher::Attribute { selector: sel, .. } => {
                match Selector::parse(sel) {
                    Ok(s) => Some(s),
                    Err(e) => {
                        warn!(strategy = descriptor.name, "selector failed to parse: {e:?}");
                        return None;
                    }
                }
            }
            Matcher::ScopeText => None,
        };
        Some(Self { descriptor, selector })
    }

    pub fn compile_chain(chain: &[StrategyDescriptor]) -> Vec<Self> {
        chain.iter().copied().filter_map(Self::compile).collect()
    }

    /// Raw strings this strategy yields inside `scope`, in document order.
    pub fn raw_values(&self, scope: ElementRef<'_>) -> Vec<String> {
        match (&self.descriptor.matcher, &self.selector) {
            (Matcher::Css(_), Some(sel)) => scope.select(sel).map(element_text).collect(),
            (Matcher::Attribute { attr, .. }, Some(sel)) => scope
                .select(sel)
                .filter_map(|el| el.value().attr(attr).map(normalize_ws))
                .collect(),
            (Matcher::ScopeText, _) => vec![element_text(scope)],
            _ => Vec::new(),
        }
    }
}

/// Flattened, whitespace-normalized text of an element and its descendants.
pub fn element_text(el: ElementRef<'_>) -> String {
    normalize_ws(&el.text().collect::<Vec<_>>().join(" "))
}

pub fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn penalty_scales_with_level() {
        assert_eq!(PRICE_STRATEGIES[0].penalty(), 0.0);
        assert!((PRICE_STRATEGIES[3].penalty() - 0.15).abs() < 1e-9);
    }

    #[test]
    fn only_price_context_fallback_is_lenient() {
        let lenient: Vec<_> = PRICE_STRATEGIES.iter().filter(|s| s.lenient).collect();
        assert_eq!(lenient.len(), 1);
        assert_eq!(lenient[0].matcher, Matcher::Css(PRICE_CONTEXT_SELECTOR));
    }

    #[test]
    fn every_default_chain_compiles() {
        for chain in [
            PRICE_STRATEGIES,
            AIRLINE_STRATEGIES,
            STOPS_STRATEGIES,
            DURATION_STRATEGIES,
            PAGE_PRICE_STRATEGIES,
            PAGE_AIRLINE_STRATEGIES,
            PAGE_STOPS_STRATEGIES,
            PAGE_DURATION_STRATEGIES,
        ] {
            assert_eq!(CompiledStrategy::compile_chain(chain).len(), chain.len());
        }
    }

    #[test]
    fn page_chains_never_sweep_whole_scope() {
        for chain in [PAGE_PRICE_STRATEGIES, PAGE_STOPS_STRATEGIES, PAGE_DURATION_STRATEGIES] {
            assert!(chain.iter().all(|s| s.matcher != Matcher::ScopeText));
        }
    }

    #[test]
    fn attribute_matcher_reads_attribute_not_text() {
        let doc = Html::parse_fragment(r#"<div><span aria-label="1,234 US dollars">ignored</span></div>"#);
        let strategy = CompiledStrategy::compile(PRICE_STRATEGIES[1]).unwrap();
        let values = strategy.raw_values(doc.root_element());
        assert_eq!(values, vec!["1,234 US dollars".to_string()]);
    }
}

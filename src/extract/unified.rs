use scraper::Html;
use tracing::debug;

use crate::config::ExtractionConfig;
use crate::extract::page::PageLevelExtractor;
use crate::extract::rows::{RowExtractor, RowLocator};
use crate::extract::validators::StopsValidator;
use crate::types::{ExtractionMethod, FieldConfidences, FlightData};

/// Route-level facts the cross-validation step may use.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractionContext {
    /// Median of recent stored prices for the search, if any history exists.
    pub route_median: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub candidates: Vec<FlightData>,
    /// False when the page matched nothing that looks like a results page.
    pub structure_found: bool,
    pub method: Option<ExtractionMethod>,
    /// Candidates dropped for falling below the minimum overall confidence.
    pub dropped_low_confidence: usize,
}

/// Weighted blend of the mean field confidence and the correlation confidence.
pub fn blend_overall(fields: &FieldConfidences, correlation: f64, correlation_weight: f64) -> f64 {
    let w = correlation_weight.clamp(0.0, 1.0);
    ((1.0 - w) * fields.mean() + w * correlation).clamp(0.0, 1.0)
}

pub struct UnifiedExtractor {
    cfg: ExtractionConfig,
    locator: RowLocator,
    rows: RowExtractor,
    page: PageLevelExtractor,
}

impl UnifiedExtractor {
    pub fn new(cfg: ExtractionConfig) -> Self {
        Self {
            locator: RowLocator::new(),
            rows: RowExtractor::new(&cfg),
            page: PageLevelExtractor::new(&cfg),
            cfg,
        }
    }

    /// Never fails: a page with nothing plausible yields an empty candidate list.
    pub fn extract(&self, html: &str, ctx: &ExtractionContext) -> ExtractionReport {
        let doc = Html::parse_document(html);
        let located = self.locator.locate(&doc, &self.rows);

        let (mut candidates, method, structure_found) = if located.rows.is_empty() {
            let fallback = self.page.extract(&doc);
            let found = located.structure_found || !fallback.is_empty();
            let method = (!fallback.is_empty()).then_some(ExtractionMethod::PageLevel);
            (fallback, method, found)
        } else {
            let extracted: Vec<FlightData> =
                located.rows.iter().filter_map(|row| self.rows.extract(*row)).collect();
            (extracted, Some(ExtractionMethod::PerRow), true)
        };

        for candidate in &mut candidates {
            self.cross_validate(candidate, ctx);
        }

        let before = candidates.len();
        candidates.retain(|c| c.overall_confidence >= self.cfg.min_overall_confidence);
        let dropped_low_confidence = before - candidates.len();
        let candidates = dedupe(candidates);

        debug!(
            candidates = candidates.len(),
            dropped = dropped_low_confidence,
            method = ?method,
            "[EXTRACT] extraction pass complete"
        );

        ExtractionReport {
            candidates,
            structure_found,
            method,
            dropped_low_confidence,
        }
    }

    fn cross_validate(&self, c: &mut FlightData, ctx: &ExtractionContext) {
        let mut adjustment = 0.0;

        if let (Some(stops), Some(minutes)) = (c.stops, c.duration_minutes) {
            if !StopsValidator::consistent_with_duration(stops, minutes, &self.cfg) {
                adjustment -= self.cfg.cross_validation_penalty;
            }
        }

        if let Some(median) = ctx.route_median.filter(|m| *m > 0.0) {
            if c.price > median * self.cfg.route_spike_ratio || c.price < median * self.cfg.route_crash_ratio {
                adjustment -= self.cfg.cross_validation_penalty;
            }
        }

        if c.is_complete() {
            adjustment += self.cfg.complete_candidate_bonus;
        }

        c.overall_confidence = (c.overall_confidence + adjustment).clamp(0.0, 1.0);
    }
}

/// Identical tuples collapse to the most confident copy, first position kept.
fn dedupe(candidates: Vec<FlightData>) -> Vec<FlightData> {
    let mut out: Vec<FlightData> = Vec::with_capacity(candidates.len());
    for c in candidates {
        let existing = out.iter_mut().find(|o| {
            o.price == c.price
                && o.airline == c.airline
                && o.stops == c.stops
                && o.duration_minutes == c.duration_minutes
        });
        match existing {
            Some(o) if c.overall_confidence > o.overall_confidence => *o = c,
            Some(_) => {}
            None => out.push(c),
        }
    }
    out
}

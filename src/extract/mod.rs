pub mod page;
pub mod rows;
pub mod strategy;
pub mod unified;
pub mod validators;

pub use unified::{ExtractionContext, ExtractionReport, UnifiedExtractor};

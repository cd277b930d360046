pub mod circuit;

pub use circuit::{CircuitState, CircuitTransition, HealthStatus, ScrapeHealth};

pub mod definition;

pub use definition::{Revision, SearchDefinition, SearchSpec};

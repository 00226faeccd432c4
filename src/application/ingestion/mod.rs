pub mod auction;
pub mod engine;

pub use engine::{IngestOptions, IngestionEngine};

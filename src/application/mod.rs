pub mod factors;
pub mod ingestion;
pub mod jobs;
pub mod quality;
pub mod selection;
pub mod strategies;

pub mod errors;
pub mod factors;
pub mod scoring;
pub mod strategy;
pub mod types;

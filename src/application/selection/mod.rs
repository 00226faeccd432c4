pub mod runner;

pub use runner::{SelectionOutcome, SelectionParams, SelectionRunner};

pub mod engine;
pub mod industry;

pub use engine::{FactorEngine, SectorStats, fundamental_score, pe_percentile, sector_heat};
pub use industry::IndustryTables;

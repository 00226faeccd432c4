pub mod collection_history_repository;
pub mod market_data_repository;
pub mod quality_repository;
pub mod selection_history_repository;

pub use collection_history_repository::{CollectionCounts, CollectionHistoryRepository};
pub use market_data_repository::MarketDataRepository;
pub use quality_repository::QualityRepository;
pub use selection_history_repository::{SelectionHistoryRepository, SelectionRecord};

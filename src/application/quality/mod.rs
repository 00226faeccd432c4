pub mod monitor;

pub use monitor::{AlertLevel, MetricType, QualityAlert, QualityMetric, QualityMonitor, QualityReport};

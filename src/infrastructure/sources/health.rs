//! Per-source health ledger folded from individual call samples.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// What one attempt against a source produced. `NoData` is an answered
/// call with an empty row set; it never counts against the success
/// rate, but it is not a success either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Success,
    NoData,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown,
    Healthy,
    Degraded,
    Unavailable,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Unknown => "unknown",
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unavailable => "unavailable",
        }
    }
}

/// Rolling health for one source.
#[derive(Debug, Clone)]
pub struct SourceHealth {
    pub source_name: String,
    pub state: HealthState,
    pub success_rate: f64,
    /// Exponential moving average, seconds.
    pub avg_latency: f64,
    pub last_check_time: Option<DateTime<Utc>>,
    pub error_message: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub no_data_requests: u64,
}

impl SourceHealth {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            state: HealthState::Unknown,
            success_rate: 0.0,
            avg_latency: 0.0,
            last_check_time: None,
            error_message: String::new(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            no_data_requests: 0,
        }
    }

    pub fn update(&mut self, kind: SampleKind, latency_secs: f64, error_msg: &str) {
        self.total_requests += 1;
        match kind {
            SampleKind::Success => self.successful_requests += 1,
            SampleKind::NoData => self.no_data_requests += 1,
            SampleKind::Error => self.failed_requests += 1,
        }

        // no_data excluded from the denominator.
        let effective = self.successful_requests + self.failed_requests;
        self.success_rate = if effective > 0 {
            self.successful_requests as f64 / effective as f64
        } else {
            0.0
        };

        if latency_secs > 0.0 {
            if self.avg_latency == 0.0 {
                self.avg_latency = latency_secs;
            } else {
                self.avg_latency = 0.7 * self.avg_latency + 0.3 * latency_secs;
            }
        }

        if !error_msg.is_empty() {
            self.error_message = error_msg.to_string();
        }
        self.last_check_time = Some(Utc::now());

        self.state = if effective == 0 {
            if self.no_data_requests > 0 {
                HealthState::Degraded
            } else {
                HealthState::Unknown
            }
        } else if self.success_rate >= 0.95 {
            HealthState::Healthy
        } else if self.success_rate >= 0.80 {
            HealthState::Degraded
        } else {
            HealthState::Unavailable
        };
    }

    /// Sort key for the last-resort adapter tier: healthy sources by
    /// success rate, degraded ones handicapped below them.
    pub fn rank(&self) -> Option<f64> {
        match self.state {
            HealthState::Healthy => Some(self.success_rate),
            HealthState::Degraded => Some(self.success_rate - 0.5),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_bands() {
        let mut health = SourceHealth::new("tushare");
        assert_eq!(health.state, HealthState::Unknown);

        for _ in 0..19 {
            health.update(SampleKind::Success, 0.1, "");
        }
        assert_eq!(health.state, HealthState::Healthy);
        assert!((health.success_rate - 1.0).abs() < 1e-9);

        // 19 ok / 1 failed = 0.95 → still healthy.
        health.update(SampleKind::Error, 0.1, "boom");
        assert_eq!(health.state, HealthState::Healthy);

        // 19 ok / 3 failed ≈ 0.86 → degraded.
        health.update(SampleKind::Error, 0.1, "boom");
        health.update(SampleKind::Error, 0.1, "boom");
        assert_eq!(health.state, HealthState::Degraded);

        // Keep failing until below 0.80.
        for _ in 0..5 {
            health.update(SampleKind::Error, 0.1, "boom");
        }
        assert_eq!(health.state, HealthState::Unavailable);
        assert_eq!(health.error_message, "boom");
    }

    #[test]
    fn test_no_data_excluded_from_denominator() {
        let mut health = SourceHealth::new("eastmoney");
        health.update(SampleKind::NoData, 0.2, "");
        // Answered but empty: degraded, not failed.
        assert_eq!(health.state, HealthState::Degraded);
        assert_eq!(health.success_rate, 0.0);

        health.update(SampleKind::Success, 0.2, "");
        assert!((health.success_rate - 1.0).abs() < 1e-9);
        assert_eq!(health.state, HealthState::Healthy);
        assert_eq!(health.no_data_requests, 1);
    }

    #[test]
    fn test_latency_ema() {
        let mut health = SourceHealth::new("tushare");
        health.update(SampleKind::Success, 1.0, "");
        assert!((health.avg_latency - 1.0).abs() < 1e-9);
        health.update(SampleKind::Success, 2.0, "");
        assert!((health.avg_latency - 1.3).abs() < 1e-9);
    }

    #[test]
    fn test_rank_handicaps_degraded() {
        let mut healthy = SourceHealth::new("a");
        healthy.update(SampleKind::Success, 0.1, "");

        let mut degraded = SourceHealth::new("b");
        for _ in 0..9 {
            degraded.update(SampleKind::Success, 0.1, "");
        }
        degraded.update(SampleKind::Error, 0.1, "x");
        degraded.update(SampleKind::Error, 0.1, "x");

        assert!(healthy.rank().unwrap() > degraded.rank().unwrap());

        let mut dead = SourceHealth::new("c");
        dead.update(SampleKind::Error, 0.1, "x");
        assert_eq!(dead.rank(), None);
    }
}

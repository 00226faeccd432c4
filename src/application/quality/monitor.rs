//! Data-quality rubric over the store: coverage, completeness,
//! consistency, timeliness and accuracy metrics with direction-aware
//! health checks, a weighted overall score, and persisted alerts.

use crate::infrastructure::persistence::repositories::{
    CollectionHistoryRepository, QualityRepository,
};
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

/// Curated liquid names that operators expect to be complete every day.
const HOT_STOCKS: &[&str] = &[
    "300474", "002371", "002049", "300750", "600519", "000858", "600118",
    "600879", "000901", "300502", "300394", "300308", "002415", "000001",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Coverage,
    Completeness,
    Consistency,
    Timeliness,
    Accuracy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

/// Whether a bigger reading is better (coverage-style) or worse
/// (rates and delays).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityMetric {
    pub name: &'static str,
    pub value: f64,
    pub metric_type: MetricType,
    pub threshold: f64,
    pub unit: &'static str,
    pub description: &'static str,
    #[serde(skip)]
    direction: Direction,
}

impl QualityMetric {
    fn higher(
        name: &'static str,
        value: f64,
        metric_type: MetricType,
        threshold: f64,
        unit: &'static str,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            value,
            metric_type,
            threshold,
            unit,
            description,
            direction: Direction::HigherIsBetter,
        }
    }

    fn lower(
        name: &'static str,
        value: f64,
        metric_type: MetricType,
        threshold: f64,
        unit: &'static str,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            value,
            metric_type,
            threshold,
            unit,
            description,
            direction: Direction::LowerIsBetter,
        }
    }

    pub fn is_healthy(&self) -> bool {
        match self.direction {
            Direction::HigherIsBetter => self.value >= self.threshold,
            Direction::LowerIsBetter => self.value <= self.threshold,
        }
    }

    /// Severity scales with the relative deviation from the threshold.
    pub fn alert_level(&self) -> AlertLevel {
        if self.is_healthy() || self.threshold == 0.0 {
            return AlertLevel::Info;
        }
        let deviation = (self.value - self.threshold).abs() / self.threshold;
        if deviation > 0.3 {
            AlertLevel::Critical
        } else if deviation > 0.2 {
            AlertLevel::Error
        } else if deviation > 0.1 {
            AlertLevel::Warning
        } else {
            AlertLevel::Info
        }
    }

    /// 0–100 contribution to the overall score.
    fn normalized(&self) -> f64 {
        if self.threshold == 0.0 {
            return if self.is_healthy() { 100.0 } else { 0.0 };
        }
        match self.direction {
            Direction::HigherIsBetter => (self.value / self.threshold * 100.0).min(100.0),
            Direction::LowerIsBetter => {
                if self.value <= self.threshold {
                    100.0
                } else {
                    (100.0 - (self.value - self.threshold) / self.threshold * 100.0).max(0.0)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityAlert {
    pub metric_name: &'static str,
    pub alert_level: AlertLevel,
    pub current_value: f64,
    pub threshold: f64,
    pub message: String,
    pub suggested_action: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub total_metrics: usize,
    pub healthy_metrics: usize,
    pub unhealthy_metrics: usize,
    pub health_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertsSummary {
    pub total_alerts: usize,
    pub critical_alerts: usize,
    pub error_alerts: usize,
    pub warning_alerts: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub report_date: String,
    pub report_range_days: i64,
    pub overall_score: f64,
    pub quality_level: &'static str,
    pub metrics_summary: MetricsSummary,
    pub alerts_summary: AlertsSummary,
    pub metrics: Vec<QualityMetric>,
    pub alerts: Vec<QualityAlert>,
    pub recommendations: Vec<String>,
}

pub struct QualityMonitor {
    repo: QualityRepository,
    history: CollectionHistoryRepository,
}

impl QualityMonitor {
    pub fn new(repo: QualityRepository, history: CollectionHistoryRepository) -> Self {
        Self { repo, history }
    }

    pub async fn calculate_all_metrics(&self, days: i64) -> Result<Vec<QualityMetric>> {
        let mut metrics = Vec::new();

        self.coverage_metrics(days, &mut metrics).await?;
        self.completeness_metrics(days, &mut metrics).await?;
        self.consistency_metrics(days, &mut metrics).await?;
        self.timeliness_metrics(&mut metrics).await?;
        self.accuracy_metrics(days, &mut metrics).await?;

        let overall = overall_score(&metrics);
        metrics.push(QualityMetric::higher(
            "overall_score",
            overall,
            MetricType::Accuracy,
            85.0,
            "分",
            "数据质量总体评分",
        ));

        info!("Computed {} quality metrics", metrics.len());
        Ok(metrics)
    }

    async fn coverage_metrics(&self, days: i64, metrics: &mut Vec<QualityMetric>) -> Result<()> {
        let total_stocks = self.repo.total_stocks().await?;
        if total_stocks > 0 {
            let active = self.repo.active_stocks(days).await?;
            metrics.push(QualityMetric::higher(
                "stock_coverage",
                active as f64 / total_stocks as f64 * 100.0,
                MetricType::Coverage,
                95.0,
                "%",
                "最近活跃股票覆盖率",
            ));
        }

        let expected_days = days.min(7) as f64;

        let klines = self.repo.kline_stats(days).await?;
        if klines.stock_count > 0 {
            let avg_days = klines.record_count as f64 / klines.stock_count as f64;
            metrics.push(QualityMetric::higher(
                "kline_coverage",
                (avg_days / expected_days).min(1.0) * 100.0,
                MetricType::Coverage,
                90.0,
                "%",
                "K线数据时间覆盖率",
            ));
        }

        let flows = self.repo.flow_stats(days).await?;
        if flows.stock_count > 0 {
            let avg_days = flows.record_count as f64 / flows.stock_count as f64;
            metrics.push(QualityMetric::higher(
                "flow_coverage",
                (avg_days / expected_days).min(1.0) * 100.0,
                MetricType::Coverage,
                90.0,
                "%",
                "资金流向数据时间覆盖率",
            ));
        }

        let mut total_coverage = 0.0;
        for code in HOT_STOCKS {
            let (klines, flows) = self.repo.hot_stock_counts(code, days).await?;
            total_coverage += klines.min(flows) as f64 / days as f64;
        }
        metrics.push(QualityMetric::higher(
            "hot_stock_coverage",
            (total_coverage / HOT_STOCKS.len() as f64).min(1.0) * 100.0,
            MetricType::Coverage,
            100.0,
            "%",
            "热门股票数据覆盖率",
        ));

        Ok(())
    }

    async fn completeness_metrics(
        &self,
        days: i64,
        metrics: &mut Vec<QualityMetric>,
    ) -> Result<()> {
        let (total, missing_kline, missing_flow) = self.repo.missing_stats(days).await?;
        if total > 0 {
            metrics.push(QualityMetric::lower(
                "missing_rate",
                (missing_kline + missing_flow) as f64 / (total * 2) as f64 * 100.0,
                MetricType::Completeness,
                5.0,
                "%",
                "数据缺失率",
            ));
        }

        let kline_errors = self.repo.kline_error_stats(days).await?;
        let flow_errors = self.repo.flow_error_stats(days).await?;
        let total_records = kline_errors.total + flow_errors.total;
        let error_rate = if total_records > 0 {
            (kline_errors.flagged + flow_errors.flagged) as f64 / total_records as f64 * 100.0
        } else {
            0.0
        };
        metrics.push(QualityMetric::lower(
            "error_rate",
            error_rate,
            MetricType::Completeness,
            1.0,
            "%",
            "数据错误率",
        ));

        Ok(())
    }

    async fn consistency_metrics(
        &self,
        days: i64,
        metrics: &mut Vec<QualityMetric>,
    ) -> Result<()> {
        let (total, matched) = self.repo.matched_stock_stats(days).await?;
        if total > 0 {
            metrics.push(QualityMetric::higher(
                "data_consistency",
                matched as f64 / total as f64 * 100.0,
                MetricType::Consistency,
                85.0,
                "%",
                "K线和资金流向数据一致性",
            ));
        }

        if let (Some((kline_min, kline_max)), Some((flow_min, flow_max))) = (
            self.repo.kline_date_range(days).await?,
            self.repo.flow_date_range(days).await?,
        ) {
            let start = kline_min.max(flow_min);
            let end = kline_max.min(flow_max);
            let consistency = if start <= end {
                let intersection = (end - start).num_days() + 1;
                let total_days = (kline_max - kline_min).num_days() + 1;
                if total_days > 0 {
                    intersection as f64 / total_days as f64
                } else {
                    0.0
                }
            } else {
                0.0
            };
            metrics.push(QualityMetric::higher(
                "time_range_consistency",
                consistency * 100.0,
                MetricType::Consistency,
                90.0,
                "%",
                "K线和资金流向时间范围一致性",
            ));
        }

        Ok(())
    }

    async fn timeliness_metrics(&self, metrics: &mut Vec<QualityMetric>) -> Result<()> {
        if let Some(last_completed) = self.history.latest_completed_at().await? {
            let delay_hours = (Utc::now() - last_completed).num_seconds() as f64 / 3600.0;
            metrics.push(QualityMetric::lower(
                "collection_delay",
                delay_hours.max(0.0),
                MetricType::Timeliness,
                24.0,
                "小时",
                "距离上次成功采集的时间",
            ));
        }

        let weekly = self.history.completed_count_since(7).await?;
        let frequency = if weekly > 0 { 7.0 / weekly as f64 } else { 7.0 };
        metrics.push(QualityMetric::lower(
            "update_frequency",
            frequency,
            MetricType::Timeliness,
            1.0,
            "天",
            "平均更新间隔",
        ));

        Ok(())
    }

    async fn accuracy_metrics(&self, days: i64, metrics: &mut Vec<QualityMetric>) -> Result<()> {
        let klines = self.repo.kline_accuracy_stats(days).await?;
        let flows = self.repo.flow_accuracy_stats(days).await?;

        let mut components = Vec::new();
        if klines.total > 0 {
            components.push(klines.flagged as f64 / klines.total as f64);
        }
        if flows.total > 0 {
            components.push(flows.flagged as f64 / flows.total as f64);
        }
        let accuracy = if components.is_empty() {
            0.0
        } else {
            components.iter().sum::<f64>() / components.len() as f64
        };

        metrics.push(QualityMetric::higher(
            "data_accuracy",
            accuracy * 100.0,
            MetricType::Accuracy,
            98.0,
            "%",
            "数据准确性（价格与资金流匹配度）",
        ));

        Ok(())
    }

    /// Turn unhealthy metrics into alerts and persist them.
    pub async fn check_and_alert(&self, metrics: &[QualityMetric]) -> Result<Vec<QualityAlert>> {
        let mut alerts = Vec::new();
        let today = Utc::now().date_naive();

        for metric in metrics {
            if metric.is_healthy() {
                continue;
            }
            let (comparator, suggested_action) = match metric.direction {
                Direction::LowerIsBetter => (">", "请检查数据采集任务是否正常运行"),
                Direction::HigherIsBetter => ("<", "请检查数据采集完整性或重新采集数据"),
            };
            let message = format!(
                "{}: {:.1}{} {} 阈值 {}{}",
                metric.description, metric.value, metric.unit, comparator, metric.threshold,
                metric.unit
            );
            warn!("Quality alert: {}", message);

            let alert = QualityAlert {
                metric_name: metric.name,
                alert_level: metric.alert_level(),
                current_value: metric.value,
                threshold: metric.threshold,
                message: message.clone(),
                suggested_action,
                timestamp: Utc::now().to_rfc3339(),
            };

            self.repo
                .record_alert(
                    today,
                    metric.name,
                    metric.value,
                    metric.threshold,
                    alert.alert_level.as_str(),
                    &message,
                )
                .await?;
            alerts.push(alert);
        }

        if !alerts.is_empty() {
            info!("Recorded {} quality alerts", alerts.len());
        }
        Ok(alerts)
    }

    pub async fn generate_report(&self, days: i64) -> Result<QualityReport> {
        let metrics = self.calculate_all_metrics(days).await?;
        let alerts = self.check_and_alert(&metrics).await?;

        let healthy = metrics.iter().filter(|m| m.is_healthy()).count();
        let overall = metrics
            .iter()
            .find(|m| m.name == "overall_score")
            .map(|m| m.value)
            .unwrap_or(0.0);

        let report = QualityReport {
            report_date: Utc::now().to_rfc3339(),
            report_range_days: days,
            overall_score: (overall * 100.0).round() / 100.0,
            quality_level: quality_level(overall),
            metrics_summary: MetricsSummary {
                total_metrics: metrics.len(),
                healthy_metrics: healthy,
                unhealthy_metrics: metrics.len() - healthy,
                health_rate: if metrics.is_empty() {
                    0.0
                } else {
                    healthy as f64 / metrics.len() as f64
                },
            },
            alerts_summary: AlertsSummary {
                total_alerts: alerts.len(),
                critical_alerts: alerts
                    .iter()
                    .filter(|a| a.alert_level == AlertLevel::Critical)
                    .count(),
                error_alerts: alerts
                    .iter()
                    .filter(|a| a.alert_level == AlertLevel::Error)
                    .count(),
                warning_alerts: alerts
                    .iter()
                    .filter(|a| a.alert_level == AlertLevel::Warning)
                    .count(),
            },
            recommendations: recommendations(&alerts, &metrics),
            metrics,
            alerts,
        };

        info!(
            "Quality report: score {:.1}, level {}",
            report.overall_score, report.quality_level
        );
        Ok(report)
    }
}

/// Fixed-weight blend of the normalized metrics, 0–100.
fn overall_score(metrics: &[QualityMetric]) -> f64 {
    let weights: HashMap<&str, f64> = [
        ("stock_coverage", 0.10),
        ("kline_coverage", 0.15),
        ("flow_coverage", 0.15),
        ("hot_stock_coverage", 0.10),
        ("missing_rate", 0.10),
        ("error_rate", 0.10),
        ("data_consistency", 0.10),
        ("time_range_consistency", 0.05),
        ("collection_delay", 0.05),
        ("update_frequency", 0.05),
        ("data_accuracy", 0.05),
    ]
    .into_iter()
    .collect();

    let mut total_score = 0.0;
    let mut total_weight = 0.0;
    for metric in metrics {
        if let Some(weight) = weights.get(metric.name) {
            total_score += metric.normalized() * weight;
            total_weight += weight;
        }
    }
    if total_weight > 0.0 {
        total_score / total_weight
    } else {
        0.0
    }
}

pub fn quality_level(score: f64) -> &'static str {
    if score >= 95.0 {
        "excellent"
    } else if score >= 85.0 {
        "good"
    } else if score >= 70.0 {
        "fair"
    } else if score >= 60.0 {
        "passing"
    } else {
        "failing"
    }
}

fn recommendations(alerts: &[QualityAlert], metrics: &[QualityMetric]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    for alert in alerts {
        let line = match alert.alert_level {
            AlertLevel::Critical | AlertLevel::Error => {
                format!("紧急: {}", alert.suggested_action)
            }
            AlertLevel::Warning => format!("建议: {}", alert.suggested_action),
            AlertLevel::Info => continue,
        };
        if !out.contains(&line) {
            out.push(line);
        }
    }

    for metric in metrics {
        if metric.is_healthy() {
            continue;
        }
        let line = match metric.name {
            "hot_stock_coverage" => "热门股票数据不完整，建议优先采集热门股票数据",
            "collection_delay" => "数据采集延迟过长，建议检查采集任务调度",
            name if name.contains("coverage") => "数据覆盖不足，建议扩大数据采集范围",
            _ => continue,
        }
        .to_string();
        if !out.contains(&line) {
            out.push(line);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Candle, Exchange, FundFlowRow, Stock};
    use crate::infrastructure::persistence::database::Database;
    use crate::infrastructure::persistence::repositories::{
        CollectionCounts, MarketDataRepository,
    };
    use chrono::Duration;

    #[test]
    fn test_direction_aware_health() {
        let coverage =
            QualityMetric::higher("stock_coverage", 97.0, MetricType::Coverage, 95.0, "%", "");
        assert!(coverage.is_healthy());

        let delay =
            QualityMetric::lower("collection_delay", 30.0, MetricType::Timeliness, 24.0, "小时", "");
        assert!(!delay.is_healthy());

        let missing =
            QualityMetric::lower("missing_rate", 0.0, MetricType::Completeness, 5.0, "%", "");
        assert!(missing.is_healthy());
    }

    #[test]
    fn test_alert_level_deviation_bands() {
        let make = |value: f64| {
            QualityMetric::higher("kline_coverage", value, MetricType::Coverage, 90.0, "%", "")
        };
        // 13% below threshold → warning; 22% → error; 40% → critical.
        assert_eq!(make(78.0).alert_level(), AlertLevel::Warning);
        assert_eq!(make(70.0).alert_level(), AlertLevel::Error);
        assert_eq!(make(54.0).alert_level(), AlertLevel::Critical);
        assert_eq!(make(95.0).alert_level(), AlertLevel::Info);
    }

    #[test]
    fn test_normalized_directions() {
        let coverage =
            QualityMetric::higher("stock_coverage", 47.5, MetricType::Coverage, 95.0, "%", "");
        assert!((coverage.normalized() - 50.0).abs() < 1e-9);

        let in_budget =
            QualityMetric::lower("collection_delay", 2.0, MetricType::Timeliness, 24.0, "小时", "");
        assert_eq!(in_budget.normalized(), 100.0);

        let over_budget =
            QualityMetric::lower("collection_delay", 36.0, MetricType::Timeliness, 24.0, "小时", "");
        assert!((over_budget.normalized() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_quality_bands() {
        assert_eq!(quality_level(97.0), "excellent");
        assert_eq!(quality_level(90.0), "good");
        assert_eq!(quality_level(75.0), "fair");
        assert_eq!(quality_level(62.0), "passing");
        assert_eq!(quality_level(30.0), "failing");
    }

    /// Seed every hot stock with a full window of sane candles and
    /// matching flows, plus a daily collection cadence.
    async fn seed_perfect_store(db: &Database, days: i64) {
        let market = MarketDataRepository::new(db.pool.clone());
        let history = CollectionHistoryRepository::new(db.pool.clone());
        let today = Utc::now().date_naive();

        for code in HOT_STOCKS {
            market
                .upsert_stocks(&[Stock {
                    code: code.to_string(),
                    name: format!("股票{}", code),
                    exchange: Exchange::from_code(code),
                    industry: Some("综合".into()),
                }])
                .await
                .unwrap();

            for offset in 0..days {
                let date = today - Duration::days(offset);
                let close = 50.0 + offset as f64;
                market
                    .upsert_candles(&[Candle {
                        code: code.to_string(),
                        date,
                        open: close - 0.4,
                        high: close + 0.8,
                        low: close - 0.9,
                        close,
                        volume: 4_000_000,
                        amount: close * 4_000_000.0,
                    }])
                    .await
                    .unwrap();
                market
                    .upsert_fund_flow(&[FundFlowRow {
                        code: code.to_string(),
                        date,
                        main_fund_flow: close * 1_500_000.0,
                        retail_fund_flow: close * 500_000.0,
                        institutional_flow: close * 1_200_000.0,
                        large_order_ratio: 0.15,
                    }])
                    .await
                    .unwrap();
            }
        }

        // One completed run per day keeps update_frequency at 1.
        for _ in 0..7 {
            let id = history
                .create("incremental", "2024-01-01", "2024-01-07")
                .await
                .unwrap();
            history.mark_running(id).await.unwrap();
            history
                .complete(id, CollectionCounts::default(), 30.0)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_perfect_store_scores_excellent_with_zero_alerts() {
        let db = Database::in_memory().await.unwrap();
        seed_perfect_store(&db, 7).await;

        let monitor = QualityMonitor::new(
            QualityRepository::new(db.pool.clone()),
            CollectionHistoryRepository::new(db.pool.clone()),
        );
        let report = monitor.generate_report(7).await.unwrap();

        assert!(
            report.overall_score >= 95.0,
            "score was {}",
            report.overall_score
        );
        assert_eq!(report.quality_level, "excellent");
        assert_eq!(report.alerts_summary.total_alerts, 0);
        assert_eq!(
            report.metrics_summary.unhealthy_metrics, 0,
            "unhealthy: {:?}",
            report
                .metrics
                .iter()
                .filter(|m| !m.is_healthy())
                .map(|m| (m.name, m.value))
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_stale_store_raises_alerts() {
        let db = Database::in_memory().await.unwrap();
        let market = MarketDataRepository::new(db.pool.clone());
        // Stocks exist but nothing was ever collected for them.
        market
            .upsert_stocks(&[Stock {
                code: "600519".into(),
                name: "贵州茅台".into(),
                exchange: Exchange::Shanghai,
                industry: Some("白酒".into()),
            }])
            .await
            .unwrap();

        let monitor = QualityMonitor::new(
            QualityRepository::new(db.pool.clone()),
            CollectionHistoryRepository::new(db.pool.clone()),
        );
        let report = monitor.generate_report(7).await.unwrap();

        assert!(report.overall_score < 60.0);
        assert_eq!(report.quality_level, "failing");
        assert!(report.alerts_summary.total_alerts > 0);
        assert!(!report.recommendations.is_empty());

        // Alerts were persisted.
        let repo = QualityRepository::new(db.pool.clone());
        let today = Utc::now().date_naive();
        assert!(repo.alert_count_on(today).await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_overall_score_weighting_prefers_coverage() {
        let metrics = vec![
            QualityMetric::higher("stock_coverage", 95.0, MetricType::Coverage, 95.0, "%", ""),
            QualityMetric::higher("kline_coverage", 45.0, MetricType::Coverage, 90.0, "%", ""),
        ];
        // stock 100 * 0.10 + kline 50 * 0.15 over weight 0.25 = 70.
        let score = overall_score(&metrics);
        assert!((score - 70.0).abs() < 1e-9);
    }
}

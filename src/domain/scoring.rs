//! Evaluation output types: component scores, the scored-stock record
//! persisted to selection history, and the presentation enums.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Label shown to users, matching the vendor-market convention.
    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Low => "低",
            RiskLevel::Medium => "中",
            RiskLevel::High => "高",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldingPeriod {
    Short,
    Mid,
    Long,
}

impl HoldingPeriod {
    pub fn label(&self) -> &'static str {
        match self {
            HoldingPeriod::Short => "短线",
            HoldingPeriod::Mid => "中线",
            HoldingPeriod::Long => "长线",
        }
    }
}

impl fmt::Display for HoldingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Per-dimension scores, each in [0, 100] except the capped raw
/// momentum (≤ 50) and trend-quality (≤ 15) components which keep the
/// rubric's native scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ComponentScores {
    pub momentum: f64,
    pub trend_quality: f64,
    pub sector: f64,
    pub fundamental: f64,
    pub valuation: f64,
    pub quality: f64,
    pub growth: f64,
    pub volume: f64,
    pub sentiment: f64,
    pub risk: f64,
    /// momentum + trend_quality.
    pub technical: f64,
}

/// A stock that survived a strategy's filters, ready for presentation
/// and for persistence into `advanced_selection_history`.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredStock {
    pub code: String,
    pub name: String,
    pub industry: Option<String>,
    pub composite_score: f64,
    pub scores: ComponentScores,
    pub current_price: f64,
    pub selection_reason: String,
    pub risk_level: RiskLevel,
    pub holding_period: HoldingPeriod,
    pub target_price: f64,
    pub stop_loss_price: f64,
    pub buy_point: f64,
    pub sell_point: f64,
    // Factor snapshot carried along for display and history queries.
    pub ret_20d: f64,
    pub ret_60d: f64,
    pub volume_ratio: f64,
    pub rsi: f64,
    pub price_position: f64,
    pub macd_hist: f64,
    pub slope_pct: f64,
    pub r2: f64,
    pub sharpe: f64,
    pub vol_annualized: f64,
    pub max_drawdown: f64,
    pub sector_heat: f64,
    pub roe: f64,
    pub pe_ttm: f64,
    pub revenue_growth: f64,
    pub price_breakout: bool,
    pub vol_breakout: bool,
}

/// Outcome of evaluating one stock under one strategy. `Filtered` is
/// ordinary control flow: callers iterate and skip.
#[derive(Debug, Clone)]
pub enum Evaluation {
    Selected(Box<ScoredStock>),
    Filtered,
}

impl Evaluation {
    pub fn into_selected(self) -> Option<ScoredStock> {
        match self {
            Evaluation::Selected(s) => Some(*s),
            Evaluation::Filtered => None,
        }
    }
}

/// Round half-up to two decimals, the precision used everywhere scores
/// and prices leave the engine.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

//! Per-stock factor vector feeding the strategy evaluator.

use crate::domain::types::TechnicalIndicatorRow;
use chrono::NaiveDate;
use serde::Serialize;

/// Numeric features computed from one stock's recent candles, latest
/// valuation snapshot and its sector's money flow.
///
/// Technical fields are `None` when the input window is too short for the
/// indicator; the evaluator substitutes the same neutral defaults the
/// scoring rubric was calibrated against (RSI 50, ratio 1.0, …).
/// Fundamental fields always carry a value; industry-table fallbacks are
/// applied during computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FactorSet {
    // Momentum
    pub ret_20d: Option<f64>,
    pub ret_60d: Option<f64>,

    // Oscillators
    pub rsi: Option<f64>,
    pub rsi_prev: Option<f64>,

    // MACD (12, 26, 9)
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
    pub macd_hist_prev: Option<f64>,

    /// Annualized volatility of daily returns, percent.
    pub vol_annualized: Option<f64>,

    // Volume
    pub volume_ratio: Option<f64>,
    pub vol_avg_5d: Option<f64>,
    pub vol_breakout: bool,

    // Trend (OLS over the last min(20, n) closes)
    pub slope_pct: Option<f64>,
    pub r2: Option<f64>,

    // Risk
    pub sharpe: Option<f64>,
    /// Max drawdown over cumulative returns, percent (negative).
    pub max_drawdown: Option<f64>,

    // Price location
    pub price_position: Option<f64>,
    pub price_breakout: bool,

    // Moving averages
    pub ma5: Option<f64>,
    pub ma10: Option<f64>,
    pub ma20: Option<f64>,

    pub last_close: Option<f64>,

    // Fundamentals (fallbacks already applied; 0.0 = genuinely unknown)
    /// Raw trailing PE as reported; 0.0 when the vendor had none.
    pub pe_ttm: f64,
    /// PE with the industry-average fallback, used for band scoring.
    pub pe_effective: f64,
    pub pb: f64,
    pub roe: f64,
    pub revenue_growth: f64,
    pub profit_growth: f64,
    pub market_cap: f64,
    /// Cheapness percentile in [0, 1]; negative PE maps to 0.
    pub pe_percentile: f64,
    /// Profitability + valuation + growth rubric, 0–100, computed
    /// alongside the fundamental inputs (50 when none were available).
    pub fundamental_score: f64,

    // Sector heat
    pub sector_change_5d: f64,
    pub sector_main_flow: f64,
    pub sector_heat: f64,
}

impl FactorSet {
    /// True when the input window was too short to compute anything.
    pub fn is_empty(&self) -> bool {
        self.last_close.is_none()
    }

    pub fn rsi_or_default(&self) -> f64 {
        self.rsi.unwrap_or(50.0)
    }

    pub fn rsi_prev_or_default(&self) -> f64 {
        self.rsi_prev.unwrap_or_else(|| self.rsi_or_default())
    }

    pub fn macd_hist_or_default(&self) -> f64 {
        self.macd_hist.unwrap_or(0.0)
    }

    pub fn macd_hist_prev_or_default(&self) -> f64 {
        self.macd_hist_prev
            .unwrap_or_else(|| self.macd_hist_or_default())
    }

    pub fn volume_ratio_or_default(&self) -> f64 {
        self.volume_ratio.unwrap_or(1.0)
    }

    pub fn price_position_or_default(&self) -> f64 {
        self.price_position.unwrap_or(0.5)
    }

    /// Histogram turn-up: `hist[t] > hist[t-1]` regardless of sign.
    pub fn macd_turning_up(&self) -> bool {
        self.macd_hist_or_default() > self.macd_hist_prev_or_default()
    }

    /// The persistable indicator subset of this factor set.
    pub fn indicator_row(&self, code: &str, date: NaiveDate) -> TechnicalIndicatorRow {
        TechnicalIndicatorRow {
            code: code.to_string(),
            date,
            ma5: self.ma5,
            ma10: self.ma10,
            ma20: self.ma20,
            macd: self.macd,
            macd_signal: self.macd_signal,
            macd_hist: self.macd_hist,
            rsi: self.rsi,
            volume_ratio: self.volume_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set_defaults() {
        let f = FactorSet::default();
        assert!(f.is_empty());
        assert_eq!(f.rsi_or_default(), 50.0);
        assert_eq!(f.rsi_prev_or_default(), 50.0);
        assert_eq!(f.volume_ratio_or_default(), 1.0);
        assert_eq!(f.price_position_or_default(), 0.5);
        assert!(!f.macd_turning_up());
    }

    #[test]
    fn test_prev_fallbacks_chain_to_current() {
        let f = FactorSet {
            rsi: Some(37.0),
            macd_hist: Some(-0.2),
            ..FactorSet::default()
        };
        assert_eq!(f.rsi_prev_or_default(), 37.0);
        assert_eq!(f.macd_hist_prev_or_default(), -0.2);
        // hist == hist_prev is not a turn-up
        assert!(!f.macd_turning_up());
    }

    #[test]
    fn test_macd_turn_up_negative_territory() {
        let f = FactorSet {
            macd_hist: Some(-0.05),
            macd_hist_prev: Some(-0.30),
            ..FactorSet::default()
        };
        assert!(f.macd_turning_up());
    }
}

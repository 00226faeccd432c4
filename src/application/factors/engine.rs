//! Per-stock factor computation: momentum, oscillators, trend fit,
//! volume, risk and fundamentals folded into one `FactorSet`.
//!
//! Stateless per call; the engine owns only the industry lookup
//! tables. Inputs are the last ≤ 60 ascending candles plus the latest
//! valuation snapshot and the stock's sector aggregates.

use super::industry::IndustryTables;
use crate::domain::factors::FactorSet;
use crate::domain::types::{Candle, DailyBasic};
use statrs::statistics::{Data, Distribution};
use ta::Next;
use ta::indicators::{MovingAverageConvergenceDivergence, RelativeStrengthIndex};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Sector-level aggregates for one industry, shared by every member
/// stock during a selection run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectorStats {
    pub change_5d: f64,
    pub main_flow: f64,
    pub heat: f64,
}

impl SectorStats {
    /// Fallback for stocks with no industry tag: mid heat so missing
    /// metadata never excludes a stock on its own.
    pub fn neutral() -> Self {
        Self {
            change_5d: 0.0,
            main_flow: 0.0,
            heat: 50.0,
        }
    }

    pub fn observed(change_5d: f64, main_flow: f64) -> Self {
        Self {
            change_5d,
            main_flow,
            heat: sector_heat(change_5d, main_flow),
        }
    }
}

/// Additive heat rubric: 5-day change bands contribute up to 50, main
/// fund inflow bands up to 50, floored at 20 so no sector reads as
/// completely cold.
pub fn sector_heat(change_5d: f64, main_flow: f64) -> f64 {
    let mut heat: f64 = 0.0;

    if change_5d > 8.0 {
        heat += 50.0;
    } else if change_5d > 4.0 {
        heat += 40.0;
    } else if change_5d > 1.5 {
        heat += 30.0;
    } else if change_5d > 0.0 {
        heat += 25.0;
    } else if change_5d > -1.0 {
        heat += 15.0;
    } else if change_5d > -3.0 {
        heat += 5.0;
    }

    if main_flow > 50_000_000.0 {
        heat += 50.0;
    } else if main_flow > 20_000_000.0 {
        heat += 40.0;
    } else if main_flow > 5_000_000.0 {
        heat += 30.0;
    } else if main_flow > 0.0 {
        heat += 25.0;
    } else if main_flow > -5_000_000.0 {
        heat += 10.0;
    }

    heat.max(20.0).min(100.0)
}

/// Simplified cheapness percentile over PE bands; lower PE reads as
/// cheaper. Non-positive PE (loss-makers) pins to 0.
pub fn pe_percentile(pe: f64) -> f64 {
    if pe <= 0.0 {
        0.0
    } else if pe < 10.0 {
        0.9
    } else if pe < 15.0 {
        0.7
    } else if pe < 20.0 {
        0.5
    } else if pe < 30.0 {
        0.3
    } else if pe < 50.0 {
        0.1
    } else {
        0.0
    }
}

/// Profitability (40) + valuation (30) + growth (30) band rubric,
/// clamped to [0, 100]. Loss-makers get a small positive valuation
/// base rather than outright elimination.
pub fn fundamental_score(roe: f64, pe: f64, revenue_growth: f64) -> f64 {
    let mut score: f64 = 0.0;

    if roe > 25.0 {
        score += 40.0;
    } else if roe > 20.0 {
        score += 30.0;
    } else if roe > 15.0 {
        score += 20.0;
    } else if roe > 10.0 {
        score += 10.0;
    } else if roe > 5.0 {
        score += 5.0;
    } else if roe > 0.0 {
        score += 2.0;
    } else if roe < 0.0 {
        score -= 10.0;
    }

    if pe > 0.0 {
        if pe < 8.0 {
            score += 30.0;
        } else if pe < 12.0 {
            score += 20.0;
        } else if pe < 15.0 {
            score += 10.0;
        } else if pe < 20.0 {
            score += 5.0;
        } else if pe > 40.0 {
            score -= 10.0;
        }
    } else {
        score += 5.0;
    }

    if revenue_growth > 30.0 {
        score += 30.0;
    } else if revenue_growth > 20.0 {
        score += 20.0;
    } else if revenue_growth > 15.0 {
        score += 10.0;
    } else if revenue_growth > 10.0 {
        score += 5.0;
    } else if revenue_growth > 5.0 {
        score += 2.0;
    } else if revenue_growth > 0.0 {
        score += 1.0;
    } else if revenue_growth < 0.0 {
        score -= 10.0;
    }

    score.clamp(0.0, 100.0)
}

pub struct FactorEngine {
    tables: IndustryTables,
}

impl FactorEngine {
    pub fn new(tables: IndustryTables) -> Self {
        Self { tables }
    }

    pub fn compute(
        &self,
        candles: &[Candle],
        basic: Option<&DailyBasic>,
        industry: Option<&str>,
        sector: &SectorStats,
    ) -> FactorSet {
        let n = candles.len();
        if n < 3 {
            return FactorSet::default();
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume as f64).collect();
        let last_close = closes[n - 1];

        let mut factors = FactorSet {
            last_close: Some(last_close),
            ..FactorSet::default()
        };

        // Momentum: mid-term and long-term returns, percent.
        if n >= 20 && closes[n - 20] != 0.0 {
            factors.ret_20d = Some((last_close - closes[n - 20]) / closes[n - 20] * 100.0);
        }
        if n >= 60 && closes[n - 60] != 0.0 {
            factors.ret_60d = Some((last_close - closes[n - 60]) / closes[n - 60] * 100.0);
        }

        // RSI needs 14 full change periods before the reading settles.
        if n >= 15 {
            let mut rsi = RelativeStrengthIndex::new(14).expect("valid RSI period");
            let mut last = None;
            let mut prev = None;
            for close in &closes {
                prev = last;
                last = Some(rsi.next(*close));
            }
            let rsi_last = last.filter(|v| v.is_finite()).unwrap_or(50.0);
            let rsi_prev = prev.filter(|v| v.is_finite()).unwrap_or(rsi_last);
            factors.rsi = Some(rsi_last);
            factors.rsi_prev = Some(rsi_prev);
        }

        if n >= 26 {
            let mut macd =
                MovingAverageConvergenceDivergence::new(12, 26, 9).expect("valid MACD periods");
            let mut last = None;
            let mut prev = None;
            for close in &closes {
                prev = last;
                last = Some(macd.next(*close));
            }
            if let Some(out) = last {
                factors.macd = Some(out.macd);
                factors.macd_signal = Some(out.signal);
                factors.macd_hist = Some(out.histogram);
                factors.macd_hist_prev =
                    Some(prev.map(|p| p.histogram).unwrap_or(out.histogram));
            }
        }

        let returns: Vec<f64> = closes
            .windows(2)
            .filter(|w| w[0] != 0.0)
            .map(|w| (w[1] - w[0]) / w[0])
            .collect();

        if n >= 20 && !returns.is_empty() {
            let data = Data::new(returns.clone());
            if let Some(std) = data.std_dev() {
                factors.vol_annualized = Some(std * TRADING_DAYS_PER_YEAR.sqrt() * 100.0);
            }
        }

        if n >= 20 {
            let avg_20 = mean(&volumes[n - 20..]);
            factors.volume_ratio = Some(if avg_20 > 0.0 {
                volumes[n - 1] / avg_20
            } else {
                1.0
            });
        }

        // Volume breakout vs the trailing 5-day average (excluding today).
        if n >= 3 {
            let lookback = 5.min(n - 1);
            let avg_5 = mean(&volumes[n - 1 - lookback..n - 1]);
            factors.vol_avg_5d = Some(avg_5);
            factors.vol_breakout = avg_5 > 0.0 && volumes[n - 1] > avg_5 * 1.2;
        }

        // Trend fit over the last min(20, n) closes.
        let window = 20.min(n);
        let y = &closes[n - window..];
        let (slope, intercept) = linear_fit(y);
        let anchor = closes[n - window];
        if anchor != 0.0 {
            factors.slope_pct = Some(slope / anchor * 100.0);
        }
        factors.r2 = Some(r_squared(y, slope, intercept));

        if n >= 60 && !returns.is_empty() {
            let data = Data::new(returns.clone());
            let mean_ret = data.mean().unwrap_or(0.0);
            let std_ret = data.std_dev().unwrap_or(0.0);
            factors.sharpe = Some(if std_ret > 0.0 {
                mean_ret / std_ret * TRADING_DAYS_PER_YEAR.sqrt()
            } else {
                0.0
            });

            factors.max_drawdown = Some(max_drawdown_pct(&returns));
        }

        // Price location within the trend window (computed on closes).
        let window_high = y.iter().cloned().fold(f64::MIN, f64::max);
        let window_low = y.iter().cloned().fold(f64::MAX, f64::min);
        factors.price_position = Some(if window_high > window_low {
            (last_close - window_low) / (window_high - window_low)
        } else {
            0.5
        });
        factors.price_breakout = last_close >= window_high * 0.95;

        if n >= 5 {
            factors.ma5 = Some(mean(&closes[n - 5..]));
        }
        if n >= 10 {
            factors.ma10 = Some(mean(&closes[n - 10..]));
        }
        if n >= 20 {
            factors.ma20 = Some(mean(&closes[n - 20..]));
        }

        self.fill_fundamentals(&mut factors, basic, industry);

        factors.sector_change_5d = sector.change_5d;
        factors.sector_main_flow = sector.main_flow;
        factors.sector_heat = sector.heat;

        factors
    }

    /// Valuation fields with industry-table fallbacks. With no snapshot
    /// at all, the neutral defaults keep the stock scoreable instead of
    /// dropping it.
    fn fill_fundamentals(
        &self,
        factors: &mut FactorSet,
        basic: Option<&DailyBasic>,
        industry: Option<&str>,
    ) {
        let Some(basic) = basic else {
            factors.pe_ttm = 15.0;
            factors.pe_effective = 15.0;
            factors.pb = 2.0;
            factors.roe = 10.0;
            factors.revenue_growth = 10.0;
            factors.profit_growth = 8.0;
            factors.market_cap = 100.0;
            factors.pe_percentile = 0.5;
            factors.fundamental_score = 50.0;
            return;
        };

        let pe_raw = basic
            .pe_ttm
            .filter(|v| v.is_finite())
            .or(basic.pe.filter(|v| v.is_finite()));
        let pb = basic.pb.filter(|v| v.is_finite()).unwrap_or(0.0);

        let pe_effective = match pe_raw {
            Some(pe) if pe != 0.0 => pe,
            _ => self.tables.pe_for(industry),
        };

        // No financial statements in the store: estimate ROE from the
        // PB/PE identity when both legs are positive.
        let roe = if pe_effective > 0.0 && pb > 0.0 {
            pb / pe_effective * 100.0
        } else {
            0.0
        };

        let revenue_growth = self.tables.growth_for(industry);

        factors.pe_ttm = pe_raw.unwrap_or(0.0);
        factors.pe_effective = pe_effective;
        factors.pb = pb;
        factors.roe = roe;
        factors.revenue_growth = revenue_growth;
        factors.profit_growth = revenue_growth * 0.8;
        factors.market_cap = basic.total_mv.unwrap_or(0.0);
        factors.pe_percentile = pe_percentile(pe_effective);
        factors.fundamental_score = fundamental_score(roe, pe_effective, revenue_growth);
    }
}

impl Default for FactorEngine {
    fn default() -> Self {
        Self::new(IndustryTables::default())
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// OLS fit of y against x = 0..n, returning (slope, intercept).
fn linear_fit(y: &[f64]) -> (f64, f64) {
    let n = y.len() as f64;
    if y.len() < 2 {
        return (0.0, y.first().copied().unwrap_or(0.0));
    }
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(y);
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, value) in y.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (value - y_mean);
        den += dx * dx;
    }
    let slope = if den != 0.0 { num / den } else { 0.0 };
    (slope, y_mean - slope * x_mean)
}

fn r_squared(y: &[f64], slope: f64, intercept: f64) -> f64 {
    let y_mean = mean(y);
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (i, value) in y.iter().enumerate() {
        let predicted = slope * i as f64 + intercept;
        ss_res += (value - predicted).powi(2);
        ss_tot += (value - y_mean).powi(2);
    }
    if ss_tot != 0.0 {
        1.0 - ss_res / ss_tot
    } else {
        0.0
    }
}

/// Deepest peak-to-trough move of the cumulative return path, percent
/// (≤ 0).
fn max_drawdown_pct(returns: &[f64]) -> f64 {
    let mut cumulative = 1.0;
    let mut running_max = f64::MIN;
    let mut worst = 0.0f64;
    for ret in returns {
        cumulative *= 1.0 + ret;
        running_max = running_max.max(cumulative);
        if running_max > 0.0 {
            worst = worst.min((cumulative - running_max) / running_max);
        }
    }
    worst * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| Candle {
                code: "600519".into(),
                date: start + chrono::Duration::days(i as i64),
                open: close * 0.99,
                high: close * 1.01,
                low: close * 0.98,
                close: *close,
                volume: 1_000_000,
                amount: close * 1_000_000.0,
            })
            .collect()
    }

    fn uptrend(len: usize) -> Vec<f64> {
        (0..len).map(|i| 100.0 + i as f64).collect()
    }

    #[test]
    fn test_too_few_candles_yields_empty_set() {
        let engine = FactorEngine::default();
        let candles = candles_from_closes(&[100.0, 101.0]);
        let factors = engine.compute(&candles, None, None, &SectorStats::neutral());
        assert!(factors.is_empty());
        assert_eq!(factors, FactorSet::default());
    }

    #[test]
    fn test_steady_uptrend_factors() {
        let engine = FactorEngine::default();
        let candles = candles_from_closes(&uptrend(60));
        let factors = engine.compute(&candles, None, None, &SectorStats::neutral());

        // 20d return: (159 - 140) / 140.
        let ret_20d = factors.ret_20d.unwrap();
        assert!((ret_20d - 19.0 / 140.0 * 100.0).abs() < 1e-9);

        // Perfectly linear closes: slope 1/anchor, r² == 1.
        let slope_pct = factors.slope_pct.unwrap();
        assert!((slope_pct - 1.0 / 140.0 * 100.0).abs() < 1e-9);
        assert!((factors.r2.unwrap() - 1.0).abs() < 1e-9);

        // Monotonic rise: top of the window, breakout set, no drawdown.
        assert!((factors.price_position.unwrap() - 1.0).abs() < 1e-9);
        assert!(factors.price_breakout);
        assert_eq!(factors.max_drawdown.unwrap(), 0.0);
        assert!(factors.rsi.unwrap() > 70.0);
        assert!(factors.macd_hist.is_some());
        assert!(factors.sharpe.unwrap() > 0.0);

        // Flat volume: ratio 1, no volume breakout.
        assert!((factors.volume_ratio.unwrap() - 1.0).abs() < 1e-9);
        assert!(!factors.vol_breakout);

        // MA5 of 155..159.
        assert!((factors.ma5.unwrap() - 157.0).abs() < 1e-9);
    }

    #[test]
    fn test_downtrend_has_drawdown_and_low_position() {
        let engine = FactorEngine::default();
        let closes: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        let candles = candles_from_closes(&closes);
        let factors = engine.compute(&candles, None, None, &SectorStats::neutral());

        assert!(factors.ret_20d.unwrap() < 0.0);
        assert!(factors.max_drawdown.unwrap() < -20.0);
        assert!((factors.price_position.unwrap() - 0.0).abs() < 1e-9);
        assert!(!factors.price_breakout);
        assert!(factors.rsi.unwrap() < 30.0);
    }

    #[test]
    fn test_volume_breakout_detection() {
        let engine = FactorEngine::default();
        let mut candles = candles_from_closes(&uptrend(30));
        // Today trades 2x the trailing average.
        candles.last_mut().unwrap().volume = 2_000_000;
        let factors = engine.compute(&candles, None, None, &SectorStats::neutral());
        assert!(factors.vol_breakout);
        assert!(factors.volume_ratio.unwrap() > 1.5);
    }

    #[test]
    fn test_flat_series_degenerate_guards() {
        let engine = FactorEngine::default();
        let candles = candles_from_closes(&vec![50.0; 30]);
        let factors = engine.compute(&candles, None, None, &SectorStats::neutral());

        // Zero variance: r² defined as 0, mid price position.
        assert_eq!(factors.r2.unwrap(), 0.0);
        assert_eq!(factors.price_position.unwrap(), 0.5);
        assert_eq!(factors.slope_pct.unwrap(), 0.0);
        // A flat series still "breaks out" of its own high band.
        assert!(factors.price_breakout);
    }

    #[test]
    fn test_fundamentals_from_snapshot() {
        let engine = FactorEngine::default();
        let candles = candles_from_closes(&uptrend(30));
        let basic = DailyBasic {
            code: "600519".into(),
            trade_date: NaiveDate::from_ymd_opt(2024, 1, 30).unwrap(),
            pe_ttm: Some(25.0),
            pb: Some(5.0),
            total_mv: Some(2.1e12),
            ..DailyBasic::default()
        };
        let factors = engine.compute(&candles, Some(&basic), Some("白酒"), &SectorStats::neutral());

        assert_eq!(factors.pe_ttm, 25.0);
        assert_eq!(factors.pe_effective, 25.0);
        // ROE estimated via PB/PE.
        assert!((factors.roe - 20.0).abs() < 1e-9);
        assert_eq!(factors.revenue_growth, 15.0);
        assert_eq!(factors.profit_growth, 12.0);
        assert_eq!(factors.pe_percentile, 0.3);
        assert!(factors.fundamental_score > 0.0);
    }

    #[test]
    fn test_missing_pe_uses_industry_table() {
        let engine = FactorEngine::default();
        let candles = candles_from_closes(&uptrend(30));
        let basic = DailyBasic {
            code: "000001".into(),
            trade_date: NaiveDate::from_ymd_opt(2024, 1, 30).unwrap(),
            pe_ttm: None,
            pe: None,
            pb: Some(0.8),
            ..DailyBasic::default()
        };
        let factors = engine.compute(&candles, Some(&basic), Some("银行"), &SectorStats::neutral());

        assert_eq!(factors.pe_ttm, 0.0);
        assert_eq!(factors.pe_effective, 6.5);
        assert!((factors.roe - 0.8 / 6.5 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_snapshot_neutral_defaults() {
        let engine = FactorEngine::default();
        let candles = candles_from_closes(&uptrend(30));
        let factors = engine.compute(&candles, None, Some("白酒"), &SectorStats::neutral());
        assert_eq!(factors.pe_ttm, 15.0);
        assert_eq!(factors.roe, 10.0);
        assert_eq!(factors.fundamental_score, 50.0);
        assert_eq!(factors.pe_percentile, 0.5);
    }

    #[test]
    fn test_pe_percentile_bands() {
        assert_eq!(pe_percentile(-5.0), 0.0);
        assert_eq!(pe_percentile(0.0), 0.0);
        assert_eq!(pe_percentile(8.0), 0.9);
        assert_eq!(pe_percentile(12.0), 0.7);
        assert_eq!(pe_percentile(18.0), 0.5);
        assert_eq!(pe_percentile(25.0), 0.3);
        assert_eq!(pe_percentile(45.0), 0.1);
        assert_eq!(pe_percentile(80.0), 0.0);
    }

    #[test]
    fn test_sector_heat_rubric() {
        // Hot sector: strong change and heavy inflow max out.
        assert_eq!(sector_heat(10.0, 60_000_000.0), 100.0);
        // Mild change + mild inflow.
        assert_eq!(sector_heat(2.0, 6_000_000.0), 60.0);
        // Cold sector floors at 20.
        assert_eq!(sector_heat(-8.0, -60_000_000.0), 20.0);
        // Small dip with small outflow: 15 + 10.
        assert_eq!(sector_heat(-0.5, -1_000_000.0), 25.0);
    }

    #[test]
    fn test_fundamental_score_bands() {
        // Excellent: high ROE, cheap, fast-growing.
        assert_eq!(fundamental_score(30.0, 7.0, 35.0), 100.0);
        // Loss-maker with negative growth bottoms out at 0.
        assert_eq!(fundamental_score(-5.0, -3.0, -10.0), 0.0);
        // Middling name: ROE 8 (+5), PE 20 (just misses the <20 band), growth 10 (+2).
        let score = fundamental_score(8.0, 20.0, 10.0);
        assert!((score - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_linear_fit_known_line() {
        let y = [3.0, 5.0, 7.0, 9.0];
        let (slope, intercept) = linear_fit(&y);
        assert!((slope - 2.0).abs() < 1e-9);
        assert!((intercept - 3.0).abs() < 1e-9);
        assert!((r_squared(&y, slope, intercept) - 1.0).abs() < 1e-9);
    }
}

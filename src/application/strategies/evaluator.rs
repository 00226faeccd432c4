//! Strategy evaluation: component scores from the factor vector, the
//! per-strategy weighted composite, hard filters, and the presentation
//! fields (reason phrases, risk level, price targets).
//!
//! Everything here is pure and deterministic: the same `FactorSet`
//! under the same strategy always yields the same score and reason.

use crate::domain::factors::FactorSet;
use crate::domain::scoring::{
    ComponentScores, Evaluation, HoldingPeriod, RiskLevel, ScoredStock, round2,
};
use crate::domain::strategy::{StrategyId, StrategyWeights};
use crate::domain::types::Stock;

const MOMENTUM_CAP: f64 = 50.0;
const TREND_CAP: f64 = 15.0;
const MAX_REASONS: usize = 4;

/// Band-rubric scores for every dimension. Momentum is capped at 50 and
/// trend quality at 15 (their native weights in the base composite);
/// the auxiliary dimensions live on a full 0–100 scale.
pub fn component_scores(f: &FactorSet) -> ComponentScores {
    let mut momentum: f64 = 0.0;
    let ret_20d = f.ret_20d.unwrap_or(0.0);
    if ret_20d > 20.0 {
        momentum += 15.0;
    } else if ret_20d > 10.0 {
        momentum += 10.0;
    } else if ret_20d > 5.0 {
        momentum += 5.0;
    } else if ret_20d > 0.0 {
        momentum += 2.0;
    }
    let rsi = f.rsi_or_default();
    if rsi > 40.0 && rsi < 70.0 {
        momentum += 10.0;
    } else if rsi > 30.0 && rsi < 80.0 {
        momentum += 5.0;
    }
    if f.macd_hist_or_default() > 0.0 {
        momentum += 5.0;
    }
    if f.price_breakout {
        momentum += 10.0;
    }
    if f.vol_breakout {
        momentum += 10.0;
    }
    let momentum = momentum.min(MOMENTUM_CAP);

    let mut trend_quality: f64 = 0.0;
    let slope = f.slope_pct.unwrap_or(0.0);
    if slope > 1.0 {
        trend_quality += 8.0;
    } else if slope > 0.5 {
        trend_quality += 5.0;
    } else if slope > 0.0 {
        trend_quality += 2.0;
    }
    let r2 = f.r2.unwrap_or(0.0);
    if r2 > 0.7 {
        trend_quality += 5.0;
    } else if r2 > 0.5 {
        trend_quality += 3.0;
    } else if r2 > 0.3 {
        trend_quality += 1.0;
    }
    let sharpe = f.sharpe.unwrap_or(0.0);
    if sharpe > 1.0 {
        trend_quality += 2.0;
    } else if sharpe > 0.5 {
        trend_quality += 1.0;
    }
    let trend_quality = trend_quality.min(TREND_CAP);

    let sector = (f.sector_heat * 0.25).clamp(0.0, 100.0);
    let fundamental = f.fundamental_score.clamp(0.0, 100.0);

    let mut valuation = 0.0;
    if f.pe_ttm > 0.0 {
        if f.pe_ttm < 10.0 {
            valuation += 35.0;
        } else if f.pe_ttm < 15.0 {
            valuation += 25.0;
        } else if f.pe_ttm < 20.0 {
            valuation += 15.0;
        } else if f.pe_ttm < 30.0 {
            valuation += 5.0;
        }
    } else {
        // Unknown or negative PE: keep loss-makers scoreable.
        valuation += 10.0;
    }
    valuation += f.pe_percentile.clamp(0.0, 1.0) * 20.0;
    let valuation = valuation.clamp(0.0, 100.0);

    let mut quality: f64 = 0.0;
    if f.roe > 25.0 {
        quality += 50.0;
    } else if f.roe > 20.0 {
        quality += 40.0;
    } else if f.roe > 15.0 {
        quality += 30.0;
    } else if f.roe > 10.0 {
        quality += 20.0;
    } else if f.roe > 5.0 {
        quality += 10.0;
    } else if f.roe > 0.0 {
        quality += 5.0;
    }
    if f.profit_growth > 30.0 {
        quality += 20.0;
    } else if f.profit_growth > 15.0 {
        quality += 10.0;
    } else if f.profit_growth > 5.0 {
        quality += 5.0;
    }
    let quality = quality.clamp(0.0, 100.0);

    let mut growth: f64 = 0.0;
    if f.revenue_growth > 30.0 {
        growth += 50.0;
    } else if f.revenue_growth > 20.0 {
        growth += 35.0;
    } else if f.revenue_growth > 15.0 {
        growth += 25.0;
    } else if f.revenue_growth > 10.0 {
        growth += 15.0;
    } else if f.revenue_growth > 5.0 {
        growth += 8.0;
    } else if f.revenue_growth > 0.0 {
        growth += 4.0;
    }
    let growth = growth.clamp(0.0, 100.0);

    let mut volume: f64 = 0.0;
    let volume_ratio = f.volume_ratio_or_default();
    if volume_ratio > 3.0 {
        volume += 40.0;
    } else if volume_ratio > 2.0 {
        volume += 30.0;
    } else if volume_ratio > 1.5 {
        volume += 20.0;
    } else if volume_ratio > 1.0 {
        volume += 10.0;
    }
    if f.vol_breakout {
        volume += 20.0;
    }
    let volume = volume.clamp(0.0, 100.0);

    let sentiment = if f.sector_main_flow > 50_000_000.0 {
        90.0
    } else if f.sector_main_flow > 20_000_000.0 {
        80.0
    } else if f.sector_main_flow > 5_000_000.0 {
        70.0
    } else if f.sector_main_flow > 0.0 {
        60.0
    } else if f.sector_main_flow > -5_000_000.0 {
        50.0
    } else {
        40.0
    };

    let vol_annualized = f.vol_annualized.unwrap_or(0.0);
    let max_drawdown = f.max_drawdown.unwrap_or(0.0);
    let risk = if vol_annualized < 20.0 && max_drawdown > -15.0 {
        80.0
    } else if vol_annualized < 30.0 && max_drawdown > -25.0 {
        65.0
    } else if vol_annualized < 40.0 && max_drawdown > -35.0 {
        55.0
    } else {
        45.0
    };

    ComponentScores {
        momentum,
        trend_quality,
        sector,
        fundamental,
        valuation,
        quality,
        growth,
        volume,
        sentiment,
        risk,
        technical: momentum + trend_quality,
    }
}

/// The strategy-less composite: technical + sector + 20% fundamentals.
pub fn base_composite(scores: &ComponentScores) -> f64 {
    (scores.technical + scores.sector + scores.fundamental * 0.2).clamp(0.0, 100.0)
}

/// Weighted composite over normalized dimensions. Momentum (0–50) is
/// doubled and trend quality (0–15) rescaled so every weighted input
/// shares the 0–100 range.
fn weighted_composite(f: &FactorSet, scores: &ComponentScores, id: StrategyId) -> f64 {
    let weights = StrategyWeights::for_strategy(id);

    let momentum = (scores.momentum * 2.0).clamp(0.0, 100.0);
    let trend = if scores.trend_quality > 0.0 {
        (scores.trend_quality / TREND_CAP * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    let mut composite = 0.0;
    for (score, weight) in [
        (momentum, weights.momentum),
        (trend, weights.trend),
        (scores.fundamental, weights.fundamental),
        (scores.valuation, weights.valuation),
        (scores.quality, weights.quality),
        (scores.growth, weights.growth),
        (scores.volume, weights.volume),
        (scores.sentiment, weights.sentiment),
        (scores.risk, weights.risk),
    ] {
        if weight > 0.0 {
            composite += score.clamp(0.0, 100.0) * weight;
        }
    }
    let mut composite = composite.clamp(0.0, 100.0);

    if id == StrategyId::BottomFishing {
        composite = (composite + bottom_fishing_bonus(f)).min(100.0);
    }
    composite
}

/// Reversal-evidence bonus for the bottom-fishing strategy.
fn bottom_fishing_bonus(f: &FactorSet) -> f64 {
    let mut bonus = 0.0;

    let position = f.price_position_or_default();
    if position < 0.20 {
        bonus += 6.0;
    } else if position < 0.35 {
        bonus += 3.0;
    }

    let rsi = f.rsi_or_default();
    if rsi < 30.0 {
        bonus += 6.0;
    } else if rsi < 40.0 {
        bonus += 3.0;
    }
    if rsi > f.rsi_prev_or_default() {
        bonus += 3.0;
    }

    let hist = f.macd_hist_or_default();
    if hist > 0.0 {
        bonus += 6.0;
    } else if f.macd_turning_up() {
        bonus += 3.0;
    }

    let ratio = f.volume_ratio_or_default();
    if ratio > 1.5 {
        bonus += 4.0;
    } else if ratio > 1.2 {
        bonus += 2.0;
    }

    let ret_20d = f.ret_20d.unwrap_or(0.0);
    if (-20.0..=5.0).contains(&ret_20d) {
        bonus += 3.0;
    }

    if f.pe_ttm > 0.0 && f.pe_ttm <= 25.0 {
        bonus += 2.0;
    }

    bonus
}

/// Strategy hard filters; a failed gate drops the stock.
fn passes_hard_filters(f: &FactorSet, scores: &ComponentScores, id: StrategyId) -> bool {
    let vol = f.vol_annualized.unwrap_or(0.0);
    match id {
        StrategyId::MomentumBreakout => {
            scores.momentum >= 30.0 && f.rsi_or_default() <= 85.0 && vol <= 80.0
        }
        StrategyId::TrendFollowing => {
            f.slope_pct.unwrap_or(0.0) >= 0.25
                && f.r2.unwrap_or(0.0) >= 0.45
                && f.max_drawdown.unwrap_or(0.0) >= -15.0
        }
        StrategyId::ValueGrowth => {
            let has_fundamentals = f.roe != 0.0 || f.pe_ttm != 0.0 || f.revenue_growth != 0.0;
            if !has_fundamentals {
                return true;
            }
            if f.roe > 0.0 && f.roe < 10.0 {
                return false;
            }
            if f.pe_ttm > 0.0 && f.pe_ttm > 50.0 {
                return false;
            }
            if f.revenue_growth > 0.0 && f.revenue_growth < 5.0 {
                return false;
            }
            true
        }
        StrategyId::SuperLeader => {
            scores.momentum >= 35.0
                && (f.ret_20d.unwrap_or(0.0) >= 20.0 || f.ret_60d.unwrap_or(0.0) >= 50.0)
                && f.volume_ratio_or_default() >= 1.5
                && f.rsi_or_default() >= 50.0
                && vol <= 80.0
        }
        StrategyId::BottomFishing => {
            let rsi = f.rsi_or_default();
            if !(18.0..=45.0).contains(&rsi) {
                return false;
            }
            if rsi <= f.rsi_prev_or_default() {
                return false;
            }
            if f.price_position_or_default() > 0.45 {
                return false;
            }
            let ret_20d = f.ret_20d.unwrap_or(0.0);
            if !(-30.0..=10.0).contains(&ret_20d) {
                return false;
            }
            let hist = f.macd_hist_or_default();
            if !f.macd_turning_up() && hist <= 0.0 {
                return false;
            }
            if f.volume_ratio_or_default() < 1.05 {
                return false;
            }
            if f.pe_ttm > 0.0 && f.pe_ttm > 35.0 {
                return false;
            }
            f.vol_annualized.unwrap_or(0.0) <= 85.0
        }
    }
}

fn risk_level(composite: f64, vol_annualized: f64) -> RiskLevel {
    if composite >= 80.0 && vol_annualized < 30.0 {
        RiskLevel::Low
    } else if composite >= 60.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

fn holding_period(technical: f64, fundamental: f64) -> HoldingPeriod {
    if technical > fundamental + 20.0 {
        HoldingPeriod::Short
    } else if fundamental > technical + 20.0 {
        HoldingPeriod::Long
    } else {
        HoldingPeriod::Mid
    }
}

fn target_price(current: f64, composite: f64) -> f64 {
    let ratio = if composite >= 90.0 {
        0.25
    } else if composite >= 80.0 {
        0.15
    } else if composite >= 70.0 {
        0.10
    } else if composite >= 60.0 {
        0.05
    } else {
        0.0
    };
    round2(current * (1.0 + ratio))
}

fn stop_loss_price(current: f64, risk: RiskLevel) -> f64 {
    let ratio = match risk {
        RiskLevel::Low => 0.08,
        RiskLevel::Medium => 0.10,
        RiskLevel::High => 0.15,
    };
    round2(current * (1.0 - ratio))
}

/// Pull-back entry: strong names buy at MA5, middling at MA10, the
/// rest at MA20, never above the current price.
fn buy_point(f: &FactorSet, composite: f64, current: f64) -> f64 {
    let anchor = if composite >= 80.0 {
        f.ma5
    } else if composite >= 60.0 {
        f.ma10
    } else {
        f.ma20
    };
    round2(anchor.unwrap_or(current).min(current))
}

fn dedup_capped(parts: Vec<String>) -> Vec<String> {
    let mut combined: Vec<String> = Vec::new();
    for part in parts {
        if part.is_empty() || combined.contains(&part) {
            continue;
        }
        combined.push(part);
        if combined.len() >= MAX_REASONS {
            break;
        }
    }
    combined
}

/// Deterministic, ordered reason phrases from factor thresholds.
fn build_reason(f: &FactorSet, industry: Option<&str>) -> String {
    let mut reasons: Vec<String> = Vec::new();

    if f.price_breakout {
        reasons.push("价格突破(创20日新高)".to_string());
    }
    if f.vol_breakout {
        reasons.push(format!("放量突破(量比{:.1})", f.volume_ratio_or_default()));
    }

    let ret_20d = f.ret_20d.unwrap_or(0.0);
    if ret_20d > 20.0 {
        reasons.push(format!("超强动量(+{:.1}%)", ret_20d));
    } else if ret_20d > 10.0 {
        reasons.push(format!("强势上涨(+{:.1}%)", ret_20d));
    } else if ret_20d > 5.0 {
        reasons.push(format!("温和上涨(+{:.1}%)", ret_20d));
    }

    let rsi = f.rsi_or_default();
    if rsi > 70.0 && rsi < 85.0 {
        reasons.push(format!("RSI强势({:.0})", rsi));
    } else if rsi > 40.0 && rsi <= 70.0 {
        reasons.push("技术指标健康".to_string());
    }

    if f.macd_hist_or_default() > 0.0 {
        reasons.push("MACD金叉".to_string());
    }

    let r2 = f.r2.unwrap_or(0.0);
    let slope = f.slope_pct.unwrap_or(0.0);
    if r2 > 0.8 {
        reasons.push("趋势极稳".to_string());
    } else if r2 > 0.6 && slope > 0.5 {
        reasons.push("上升通道".to_string());
    }

    let industry_label = industry.unwrap_or("未知");
    if f.sector_heat > 70.0 {
        reasons.push(format!("热门板块({})", industry_label));
    } else if f.sector_heat > 50.0 {
        reasons.push(format!("板块活跃({})", industry_label));
    }

    if f.roe > 20.0 && f.pe_ttm < 30.0 {
        reasons.push(format!("绩优低估(ROE{:.0}%)", f.roe));
    } else if f.roe > 15.0 {
        reasons.push("盈利良好".to_string());
    } else if f.pe_ttm > 0.0 && f.pe_ttm < 15.0 {
        reasons.push(format!("估值低(PE{:.1})", f.pe_ttm));
    }

    if reasons.is_empty() {
        reasons.push("综合评分达标".to_string());
    }

    dedup_capped(reasons).join("、")
}

/// Value-strategy reasons lead with the fundamentals.
fn enhance_value_reason(f: &FactorSet, base: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    if f.roe > 15.0 {
        parts.push(format!("ROE{:.1}%", f.roe));
    }
    if f.pe_ttm > 0.0 && f.pe_ttm < 40.0 {
        parts.push(format!("PE{:.1}", f.pe_ttm));
    }
    if f.revenue_growth > 10.0 {
        parts.push(format!("营收增长{:.1}%", f.revenue_growth));
    }
    if parts.is_empty() {
        return base.to_string();
    }
    parts.extend(base.split('、').map(str::to_string));
    dedup_capped(parts).join("、")
}

/// Bottom-fishing reasons lead with the reversal evidence.
fn bottom_fishing_reason(f: &FactorSet, base: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let position = f.price_position_or_default();
    let rsi = f.rsi_or_default();
    let hist = f.macd_hist_or_default();
    let ratio = f.volume_ratio_or_default();

    if position < 0.35 {
        parts.push("底部区间".to_string());
    }
    if rsi < 40.0 {
        parts.push(format!("RSI{:.0}", rsi));
    }
    if rsi > f.rsi_prev_or_default() {
        parts.push("RSI回升".to_string());
    }
    if hist > 0.0 {
        parts.push("MACD转强".to_string());
    } else if f.macd_turning_up() {
        parts.push("MACD回升".to_string());
    }
    if ratio > 1.2 {
        parts.push(format!("量比{:.1}", ratio));
    }
    if f.pe_ttm > 0.0 && f.pe_ttm < 20.0 {
        parts.push(format!("低估(PE{:.1})", f.pe_ttm));
    }
    if parts.is_empty() {
        return base.to_string();
    }
    parts.extend(base.split('、').map(str::to_string));
    dedup_capped(parts).join("、")
}

/// Evaluate one stock's factors under an optional strategy.
pub fn evaluate(stock: &Stock, f: &FactorSet, strategy: Option<StrategyId>) -> Evaluation {
    let scores = component_scores(f);
    let mut composite = base_composite(&scores);
    let mut reason = build_reason(f, stock.industry.as_deref());

    if let Some(id) = strategy {
        composite = weighted_composite(f, &scores, id);
        match id {
            StrategyId::BottomFishing => reason = bottom_fishing_reason(f, &reason),
            StrategyId::ValueGrowth => reason = enhance_value_reason(f, &reason),
            _ => {}
        }
        if !passes_hard_filters(f, &scores, id) {
            return Evaluation::Filtered;
        }
    }

    let composite = round2(composite);
    let current_price = f.last_close.unwrap_or(0.0);
    let vol_annualized = f.vol_annualized.unwrap_or(0.0);
    let risk = risk_level(composite, vol_annualized);
    let target = target_price(current_price, composite);

    Evaluation::Selected(Box::new(ScoredStock {
        code: stock.code.clone(),
        name: stock.name.clone(),
        industry: stock.industry.clone(),
        composite_score: composite,
        scores: ComponentScores {
            momentum: round2(scores.momentum),
            trend_quality: round2(scores.trend_quality),
            sector: round2(scores.sector),
            fundamental: round2(scores.fundamental),
            valuation: round2(scores.valuation),
            quality: round2(scores.quality),
            growth: round2(scores.growth),
            volume: round2(scores.volume),
            sentiment: round2(scores.sentiment),
            risk: round2(scores.risk),
            technical: round2(scores.technical),
        },
        current_price,
        selection_reason: reason,
        risk_level: risk,
        holding_period: holding_period(scores.technical, scores.fundamental),
        target_price: target,
        stop_loss_price: stop_loss_price(current_price, risk),
        buy_point: buy_point(f, composite, current_price),
        sell_point: target,
        ret_20d: f.ret_20d.unwrap_or(0.0),
        ret_60d: f.ret_60d.unwrap_or(0.0),
        volume_ratio: f.volume_ratio_or_default(),
        rsi: f.rsi_or_default(),
        price_position: f.price_position_or_default(),
        macd_hist: f.macd_hist_or_default(),
        slope_pct: f.slope_pct.unwrap_or(0.0),
        r2: f.r2.unwrap_or(0.0),
        sharpe: f.sharpe.unwrap_or(0.0),
        vol_annualized,
        max_drawdown: f.max_drawdown.unwrap_or(0.0),
        sector_heat: f.sector_heat,
        roe: f.roe,
        pe_ttm: f.pe_ttm,
        revenue_growth: f.revenue_growth,
        price_breakout: f.price_breakout,
        vol_breakout: f.vol_breakout,
    }))
}

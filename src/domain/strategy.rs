//! The named selection strategies: identities, weight vectors and the
//! run-level defaults each one ships with.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StrategyId {
    /// 动量突破: ride strong technical momentum through breakouts.
    MomentumBreakout,
    /// 趋势跟随: stable, high-R² uptrends.
    TrendFollowing,
    /// 价值成长: fundamentals-first quality at a fair price.
    ValueGrowth,
    /// 超级龙头: extreme momentum plus heavy volume, stage leaders.
    SuperLeader,
    /// 底部掘金: cheap, washed-out names showing reversal signs.
    BottomFishing,
}

impl StrategyId {
    pub fn id(&self) -> i64 {
        match self {
            StrategyId::MomentumBreakout => 1,
            StrategyId::TrendFollowing => 2,
            StrategyId::ValueGrowth => 3,
            StrategyId::SuperLeader => 4,
            StrategyId::BottomFishing => 5,
        }
    }

    pub fn from_id(id: i64) -> Option<StrategyId> {
        match id {
            1 => Some(StrategyId::MomentumBreakout),
            2 => Some(StrategyId::TrendFollowing),
            3 => Some(StrategyId::ValueGrowth),
            4 => Some(StrategyId::SuperLeader),
            5 => Some(StrategyId::BottomFishing),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyId::MomentumBreakout => "动量突破",
            StrategyId::TrendFollowing => "趋势跟随",
            StrategyId::ValueGrowth => "价值成长",
            StrategyId::SuperLeader => "超级龙头",
            StrategyId::BottomFishing => "底部掘金",
        }
    }
}

/// Weight vector over the normalized auxiliary scores. Weights of zero
/// simply drop that dimension from the composite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StrategyWeights {
    pub momentum: f64,
    pub trend: f64,
    pub fundamental: f64,
    pub valuation: f64,
    pub quality: f64,
    pub growth: f64,
    pub volume: f64,
    pub sentiment: f64,
    pub risk: f64,
}

impl StrategyWeights {
    pub fn for_strategy(id: StrategyId) -> StrategyWeights {
        match id {
            StrategyId::MomentumBreakout => StrategyWeights {
                momentum: 0.40,
                volume: 0.25,
                sentiment: 0.20,
                trend: 0.10,
                quality: 0.05,
                ..StrategyWeights::default()
            },
            StrategyId::TrendFollowing => StrategyWeights {
                trend: 0.35,
                momentum: 0.25,
                quality: 0.20,
                valuation: 0.15,
                volume: 0.05,
                ..StrategyWeights::default()
            },
            StrategyId::ValueGrowth => StrategyWeights {
                fundamental: 0.80,
                valuation: 0.20,
                ..StrategyWeights::default()
            },
            StrategyId::SuperLeader => StrategyWeights {
                momentum: 0.5,
                volume: 0.3,
                sentiment: 0.1,
                trend: 0.1,
                ..StrategyWeights::default()
            },
            StrategyId::BottomFishing => StrategyWeights {
                valuation: 0.32,
                risk: 0.22,
                volume: 0.18,
                quality: 0.13,
                momentum: 0.10,
                sentiment: 0.05,
                ..StrategyWeights::default()
            },
        }
    }
}

/// A strategy's catalog entry: identity plus the default run parameters
/// the selection runner starts from.
#[derive(Debug, Clone, Serialize)]
pub struct StrategySpec {
    pub id: StrategyId,
    pub name: &'static str,
    pub description: &'static str,
    pub min_score: f64,
    pub require_uptrend: bool,
    pub require_hot_sector: bool,
    pub require_breakout: bool,
    pub max_results: usize,
}

pub fn catalog() -> Vec<StrategySpec> {
    vec![
        StrategySpec {
            id: StrategyId::MomentumBreakout,
            name: StrategyId::MomentumBreakout.name(),
            description: "侧重技术动量，捕捉强势突破股票",
            min_score: 0.0,
            require_uptrend: true,
            require_hot_sector: true,
            require_breakout: true,
            max_results: 20,
        },
        StrategySpec {
            id: StrategyId::TrendFollowing,
            name: StrategyId::TrendFollowing.name(),
            description: "侧重趋势质量，跟随稳定上升趋势",
            min_score: 30.0,
            require_uptrend: true,
            require_hot_sector: false,
            require_breakout: false,
            max_results: 20,
        },
        StrategySpec {
            id: StrategyId::ValueGrowth,
            name: StrategyId::ValueGrowth.name(),
            description: "侧重基本面，寻找优质成长股",
            min_score: 30.0,
            require_uptrend: false,
            require_hot_sector: false,
            require_breakout: false,
            max_results: 20,
        },
        StrategySpec {
            id: StrategyId::SuperLeader,
            name: StrategyId::SuperLeader.name(),
            description: "侧重极强动量和放量，捕捉阶段龙头妖股",
            min_score: 40.0,
            require_uptrend: true,
            require_hot_sector: false,
            require_breakout: false,
            max_results: 20,
        },
        StrategySpec {
            id: StrategyId::BottomFishing,
            name: StrategyId::BottomFishing.name(),
            description: "侧重低估值与底部反转信号，捕捉即将转强的股票",
            min_score: 25.0,
            require_uptrend: false,
            require_hot_sector: false,
            require_breakout: false,
            max_results: 20,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_roundtrip() {
        for id in [
            StrategyId::MomentumBreakout,
            StrategyId::TrendFollowing,
            StrategyId::ValueGrowth,
            StrategyId::SuperLeader,
            StrategyId::BottomFishing,
        ] {
            assert_eq!(StrategyId::from_id(id.id()), Some(id));
        }
        assert_eq!(StrategyId::from_id(0), None);
        assert_eq!(StrategyId::from_id(6), None);
    }

    #[test]
    fn test_weights_sum_to_one() {
        for spec in catalog() {
            let w = StrategyWeights::for_strategy(spec.id);
            let sum = w.momentum
                + w.trend
                + w.fundamental
                + w.valuation
                + w.quality
                + w.growth
                + w.volume
                + w.sentiment
                + w.risk;
            assert!(
                (sum - 1.0).abs() < 1e-9,
                "{:?} weights sum to {}",
                spec.id,
                sum
            );
        }
    }

    #[test]
    fn test_catalog_covers_all_strategies() {
        let specs = catalog();
        assert_eq!(specs.len(), 5);
        // Momentum breakout runs with no score floor but hard breakout gate.
        let momentum = &specs[0];
        assert_eq!(momentum.min_score, 0.0);
        assert!(momentum.require_breakout);
    }
}

//! Parallel selection over the stored universe: factor computation and
//! strategy evaluation fan out under a bounded semaphore, survivors are
//! bucketed per exchange with quotas, and the final list is persisted
//! under a fresh run id.

use crate::application::factors::{FactorEngine, SectorStats};
use crate::application::jobs::ProgressSink;
use crate::application::strategies::evaluate;
use crate::domain::scoring::ScoredStock;
use crate::domain::strategy::{StrategyId, catalog};
use crate::domain::types::{Stock, exchange_today};
use crate::infrastructure::persistence::repositories::{
    MarketDataRepository, SelectionHistoryRepository,
};
use anyhow::{Result, bail};
use chrono::Duration as ChronoDuration;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const UNIVERSE_LIMIT: i64 = 6000;
const CANDLE_WINDOW: i64 = 60;
const UNIVERSE_CUTOFF_DAYS: i64 = 120;

#[derive(Debug, Clone, Copy)]
pub struct SelectionParams {
    pub strategy: Option<StrategyId>,
    pub min_score: f64,
    pub max_results: usize,
    pub require_uptrend: bool,
    pub require_hot_sector: bool,
    pub require_breakout: bool,
}

impl SelectionParams {
    /// A strategy's catalog defaults.
    pub fn for_strategy(id: StrategyId) -> Self {
        let spec = catalog()
            .into_iter()
            .find(|s| s.id == id)
            .expect("catalog covers every strategy");
        Self {
            strategy: Some(id),
            min_score: spec.min_score,
            max_results: spec.max_results,
            require_uptrend: spec.require_uptrend,
            require_hot_sector: spec.require_hot_sector,
            require_breakout: spec.require_breakout,
        }
    }
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            strategy: None,
            min_score: 60.0,
            max_results: 20,
            require_uptrend: true,
            require_hot_sector: true,
            require_breakout: false,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SelectionOutcome {
    pub run_id: String,
    pub results: Vec<ScoredStock>,
    pub processed: u64,
    pub total: u64,
}

pub struct SelectionRunner {
    market: MarketDataRepository,
    history: SelectionHistoryRepository,
    engine: Arc<FactorEngine>,
    concurrency: usize,
    batch_size: usize,
    timeout: Duration,
}

impl SelectionRunner {
    pub fn new(
        market: MarketDataRepository,
        history: SelectionHistoryRepository,
        engine: Arc<FactorEngine>,
        concurrency: usize,
        batch_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            market,
            history,
            engine,
            concurrency: concurrency.max(1),
            batch_size: batch_size.max(1),
            timeout,
        }
    }

    pub async fn run(
        &self,
        params: SelectionParams,
        progress: Option<ProgressSink>,
        cancel: Arc<AtomicBool>,
    ) -> Result<SelectionOutcome> {
        let run_id = Uuid::new_v4().simple().to_string();
        let started = Instant::now();

        let universe = self.load_universe().await?;
        let total = universe.len() as u64;
        if universe.is_empty() {
            warn!("Selection universe is empty; nothing to analyze");
            emit_progress(&progress, 0, 0, 0);
            return Ok(SelectionOutcome {
                run_id,
                results: Vec::new(),
                processed: 0,
                total: 0,
            });
        }

        info!(
            "Selection run {}: {} stocks, strategy {:?}, concurrency {}, batch {}",
            run_id,
            total,
            params.strategy.map(|s| s.id()),
            self.concurrency,
            self.batch_size
        );

        let sector_map = self.prefetch_sector_stats(&universe).await;
        // Momentum breakout trades the score floor for its hard gates.
        let effective_min = match params.strategy {
            Some(StrategyId::MomentumBreakout) => 0.0,
            _ => params.min_score,
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut shanghai: Vec<ScoredStock> = Vec::new();
        let mut shenzhen: Vec<ScoredStock> = Vec::new();
        let mut other: Vec<ScoredStock> = Vec::new();
        let mut processed = 0u64;

        for batch in universe.chunks(self.batch_size) {
            if cancel.load(Ordering::Relaxed) {
                bail!("cancelled");
            }
            if started.elapsed() > self.timeout {
                bail!("selection run timed out after {:?}", self.timeout);
            }

            let mut handles = Vec::with_capacity(batch.len());
            for stock in batch {
                let semaphore = Arc::clone(&semaphore);
                let market = self.market.clone();
                let engine = Arc::clone(&self.engine);
                let stock = stock.clone();
                let sector = stock
                    .industry
                    .as_deref()
                    .and_then(|i| sector_map.get(i).copied())
                    .unwrap_or_else(SectorStats::neutral);

                handles.push(tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire().await else {
                        return None;
                    };
                    analyze_stock(&market, &engine, &stock, sector, params, effective_min).await
                }));
            }

            for handle in handles {
                match handle.await {
                    Ok(Some(scored)) => {
                        if scored.code.starts_with("60") {
                            shanghai.push(scored);
                        } else if scored.code.starts_with("00") || scored.code.starts_with("30") {
                            shenzhen.push(scored);
                        } else {
                            other.push(scored);
                        }
                    }
                    Ok(None) => {}
                    Err(err) => error!("stock analysis task panicked: {}", err),
                }
            }

            processed += batch.len() as u64;
            let selected = (shanghai.len() + shenzhen.len() + other.len()) as u64;
            emit_progress(&progress, processed, total, selected);
            if processed.is_multiple_of(1024) || processed == total {
                debug!(
                    "Analyzed {}/{}: SH {}, SZ {}, other {}",
                    processed,
                    total,
                    shanghai.len(),
                    shenzhen.len(),
                    other.len()
                );
            }
        }

        let survivors = (shanghai.len() + shenzhen.len() + other.len()) as u64;
        let results = apply_bucket_quota(shanghai, shenzhen, other, params.max_results);

        if !results.is_empty() {
            self.history
                .save_run(&run_id, params.strategy, exchange_today(), &results)
                .await?;
        }

        // Final tick keeps `selected` monotonic even after the quota
        // trimmed the result list.
        emit_progress(&progress, processed, total, survivors);
        info!(
            "Selection run {} finished: {} picked of {} survivors from {} in {:.1}s",
            run_id,
            results.len(),
            survivors,
            total,
            started.elapsed().as_secs_f64()
        );

        Ok(SelectionOutcome {
            run_id,
            results,
            processed,
            total,
        })
    }

    /// Universe with enough recent history to be analyzable. The
    /// required row count adapts to how much history the store holds so
    /// a freshly seeded deployment still produces candidates.
    async fn load_universe(&self) -> Result<Vec<Stock>> {
        let Some(max_date) = self.market.max_candle_date().await? else {
            return Ok(Vec::new());
        };
        let available_days = self.market.distinct_candle_days().await?;
        if available_days <= 0 {
            return Ok(Vec::new());
        }

        let required_days = required_days_for(available_days);
        let cutoff = max_date - ChronoDuration::days(UNIVERSE_CUTOFF_DAYS);
        self.market
            .universe(cutoff, required_days, UNIVERSE_LIMIT)
            .await
    }

    /// One pair of aggregate queries per industry instead of per stock.
    async fn prefetch_sector_stats(&self, universe: &[Stock]) -> HashMap<String, SectorStats> {
        let mut stats = HashMap::new();
        for stock in universe {
            let Some(industry) = stock.industry.as_deref().filter(|i| !i.is_empty()) else {
                continue;
            };
            if stats.contains_key(industry) {
                continue;
            }
            let change = self
                .market
                .sector_change_5d(industry)
                .await
                .unwrap_or_default()
                .unwrap_or(0.0);
            let flow = self
                .market
                .sector_main_flow(industry)
                .await
                .unwrap_or_default()
                .unwrap_or(0.0);
            stats.insert(industry.to_string(), SectorStats::observed(change, flow));
        }
        stats
    }
}

pub(crate) fn required_days_for(available_days: i64) -> i64 {
    let required = if available_days >= 20 {
        20
    } else if available_days >= 6 {
        ((available_days as f64 * 0.8).round() as i64).max(5)
    } else {
        ((available_days as f64 * 0.75).round() as i64).max(3)
    };
    required.min(available_days)
}

async fn analyze_stock(
    market: &MarketDataRepository,
    engine: &FactorEngine,
    stock: &Stock,
    sector: SectorStats,
    params: SelectionParams,
    effective_min: f64,
) -> Option<ScoredStock> {
    // Any per-stock failure just drops the candidate.
    let candles = market.recent_candles(&stock.code, CANDLE_WINDOW).await.ok()?;
    if candles.len() < 3 {
        return None;
    }
    let basic = market.latest_daily_basic(&stock.code).await.ok()?;

    let factors = engine.compute(&candles, basic.as_ref(), stock.industry.as_deref(), &sector);
    if factors.is_empty() {
        return None;
    }

    let scored = evaluate(stock, &factors, params.strategy).into_selected()?;

    if scored.composite_score < effective_min {
        return None;
    }
    if params.require_uptrend && factors.slope_pct.unwrap_or(0.0) < 0.2 {
        return None;
    }
    if params.require_hot_sector && factors.sector_heat < 30.0 {
        return None;
    }
    if params.require_breakout {
        let passes = match params.strategy {
            // The breakout strategy means a price breakout specifically.
            Some(StrategyId::MomentumBreakout) => factors.price_breakout,
            _ => factors.price_breakout || factors.vol_breakout,
        };
        if !passes {
            return None;
        }
    }

    Some(scored)
}

/// Per-exchange quotas (max_results / 3 each) with pooled fill-in from
/// the leftovers, final list sorted by score descending.
fn apply_bucket_quota(
    mut shanghai: Vec<ScoredStock>,
    mut shenzhen: Vec<ScoredStock>,
    mut other: Vec<ScoredStock>,
    max_results: usize,
) -> Vec<ScoredStock> {
    if max_results == 0 {
        return Vec::new();
    }

    let by_score_desc = |a: &ScoredStock, b: &ScoredStock| {
        b.composite_score
            .partial_cmp(&a.composite_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    };
    shanghai.sort_by(by_score_desc);
    shenzhen.sort_by(by_score_desc);
    other.sort_by(by_score_desc);

    let quota = max_results / 3;
    let mut results: Vec<ScoredStock> = Vec::with_capacity(max_results);
    let mut leftovers: Vec<ScoredStock> = Vec::new();

    for bucket in [&mut shanghai, &mut shenzhen, &mut other] {
        let take = quota.min(bucket.len());
        let rest = bucket.split_off(take);
        results.append(bucket);
        leftovers.extend(rest);
    }

    let remaining = max_results.saturating_sub(results.len());
    if remaining > 0 {
        leftovers.sort_by(by_score_desc);
        results.extend(leftovers.into_iter().take(remaining));
    }

    results.sort_by(by_score_desc);
    results.truncate(max_results);
    results
}

fn emit_progress(progress: &Option<ProgressSink>, processed: u64, total: u64, selected: u64) {
    if let Some(sink) = progress {
        // A broken sink must not abort the run.
        if catch_unwind(AssertUnwindSafe(|| sink(processed, total, selected))).is_err() {
            error!("progress callback panicked; continuing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::factors::IndustryTables;
    use crate::domain::scoring::{ComponentScores, HoldingPeriod, RiskLevel};
    use crate::domain::types::{Candle, DailyBasic, Exchange};
    use crate::infrastructure::persistence::database::Database;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    fn scored(code: &str, score: f64) -> ScoredStock {
        ScoredStock {
            code: code.to_string(),
            name: format!("股票{}", code),
            industry: None,
            composite_score: score,
            scores: ComponentScores::default(),
            current_price: 10.0,
            selection_reason: "综合评分达标".into(),
            risk_level: RiskLevel::Medium,
            holding_period: HoldingPeriod::Mid,
            target_price: 10.5,
            stop_loss_price: 9.0,
            buy_point: 9.8,
            sell_point: 10.5,
            ret_20d: 0.0,
            ret_60d: 0.0,
            volume_ratio: 1.0,
            rsi: 50.0,
            price_position: 0.5,
            macd_hist: 0.0,
            slope_pct: 0.0,
            r2: 0.0,
            sharpe: 0.0,
            vol_annualized: 0.0,
            max_drawdown: 0.0,
            sector_heat: 50.0,
            roe: 0.0,
            pe_ttm: 0.0,
            revenue_growth: 0.0,
            price_breakout: false,
            vol_breakout: false,
        }
    }

    #[test]
    fn test_required_days_scaling() {
        assert_eq!(required_days_for(120), 20);
        assert_eq!(required_days_for(20), 20);
        assert_eq!(required_days_for(10), 8);
        assert_eq!(required_days_for(6), 5);
        assert_eq!(required_days_for(5), 4);
        assert_eq!(required_days_for(4), 3);
        assert_eq!(required_days_for(3), 3);
        // Never above what the store actually holds.
        assert_eq!(required_days_for(2), 2);
        assert_eq!(required_days_for(1), 1);
    }

    #[test]
    fn test_bucket_quota_takes_one_from_each() {
        // 3 Shanghai, 2 growth-board, 1 main-board Shenzhen survivor.
        let shanghai = vec![
            scored("600001", 90.0),
            scored("600002", 85.0),
            scored("600003", 80.0),
        ];
        let shenzhen = vec![scored("300001", 88.0), scored("000001", 70.0)];
        let other = vec![scored("830001", 60.0)];

        let results = apply_bucket_quota(shanghai, shenzhen, other, 3);
        assert_eq!(results.len(), 3);

        let codes: Vec<&str> = results.iter().map(|s| s.code.as_str()).collect();
        // Highest of each bucket, then sorted by score descending.
        assert_eq!(codes, vec!["600001", "300001", "830001"]);
        assert!(
            results
                .windows(2)
                .all(|w| w[0].composite_score >= w[1].composite_score)
        );
    }

    #[test]
    fn test_bucket_quota_pools_remainder() {
        // Only Shanghai survivors: the pool fills all six slots.
        let shanghai: Vec<ScoredStock> = (0..8)
            .map(|i| scored(&format!("60000{}", i), 90.0 - i as f64))
            .collect();
        let results = apply_bucket_quota(shanghai, Vec::new(), Vec::new(), 6);
        assert_eq!(results.len(), 6);
        assert_eq!(results[0].composite_score, 90.0);
        assert_eq!(results[5].composite_score, 85.0);
    }

    #[test]
    fn test_bucket_quota_zero_max_results() {
        let results = apply_bucket_quota(vec![scored("600001", 90.0)], Vec::new(), Vec::new(), 0);
        assert!(results.is_empty());
    }

    async fn seeded_runner() -> (Database, SelectionRunner) {
        let db = Database::in_memory().await.unwrap();
        let market = MarketDataRepository::new(db.pool.clone());
        let history = SelectionHistoryRepository::new(db.pool.clone());

        let stocks = [
            ("600519", "贵州茅台", "白酒"),
            ("000001", "平安银行", "银行"),
            ("300750", "宁德时代", "新能源"),
        ];
        let base_date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for (code, name, industry) in stocks {
            market
                .upsert_stocks(&[Stock {
                    code: code.into(),
                    name: name.into(),
                    exchange: Exchange::from_code(code),
                    industry: Some(industry.into()),
                }])
                .await
                .unwrap();

            let mut candles = Vec::new();
            for i in 0..30 {
                let close = 100.0 + i as f64;
                candles.push(Candle {
                    code: code.into(),
                    date: base_date + ChronoDuration::days(i),
                    open: close - 0.5,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000_000,
                    amount: close * 1_000_000.0,
                });
            }
            market.upsert_candles(&candles).await.unwrap();

            market
                .upsert_daily_basic(&[DailyBasic {
                    code: code.into(),
                    trade_date: base_date + ChronoDuration::days(29),
                    pe_ttm: Some(18.0),
                    pb: Some(3.0),
                    total_mv: Some(1.0e11),
                    ..DailyBasic::default()
                }])
                .await
                .unwrap();
        }

        let runner = SelectionRunner::new(
            market,
            history,
            Arc::new(FactorEngine::new(IndustryTables::default())),
            4,
            2,
            Duration::from_secs(60),
        );
        (db, runner)
    }

    #[tokio::test]
    async fn test_run_selects_and_persists() {
        let (db, runner) = seeded_runner().await;
        let params = SelectionParams {
            strategy: None,
            min_score: 0.0,
            max_results: 20,
            require_uptrend: false,
            require_hot_sector: false,
            require_breakout: false,
        };

        let ticks: Arc<Mutex<Vec<(u64, u64, u64)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink: ProgressSink = {
            let ticks = Arc::clone(&ticks);
            Arc::new(move |p, t, s| ticks.lock().unwrap().push((p, t, s)))
        };

        let outcome = runner
            .run(params, Some(sink), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.processed, 3);
        assert_eq!(outcome.results.len(), 3);
        assert!(
            outcome
                .results
                .iter()
                .all(|s| (0.0..=100.0).contains(&s.composite_score))
        );
        // Sorted descending.
        assert!(
            outcome
                .results
                .windows(2)
                .all(|w| w[0].composite_score >= w[1].composite_score)
        );

        // Progress is monotonic with a constant total.
        let ticks = ticks.lock().unwrap();
        assert!(!ticks.is_empty());
        assert!(ticks.windows(2).all(|w| w[0].0 <= w[1].0 && w[0].2 <= w[1].2));
        assert!(ticks.iter().all(|(_, t, _)| *t == 3));

        // History rows landed under the run id.
        let history = SelectionHistoryRepository::new(db.pool.clone());
        assert_eq!(history.count_for_run(&outcome.run_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_zero_max_results_writes_nothing() {
        let (db, runner) = seeded_runner().await;
        let params = SelectionParams {
            strategy: None,
            min_score: 0.0,
            max_results: 0,
            require_uptrend: false,
            require_hot_sector: false,
            require_breakout: false,
        };

        let outcome = runner
            .run(params, None, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();
        assert!(outcome.results.is_empty());

        let history = SelectionHistoryRepository::new(db.pool.clone());
        assert_eq!(history.total_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_before_first_batch() {
        let (_db, runner) = seeded_runner().await;
        let cancel = Arc::new(AtomicBool::new(true));
        let err = runner
            .run(SelectionParams::default(), None, cancel)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_panicking_progress_sink_is_tolerated() {
        let (_db, runner) = seeded_runner().await;
        let params = SelectionParams {
            strategy: None,
            min_score: 0.0,
            max_results: 20,
            require_uptrend: false,
            require_hot_sector: false,
            require_breakout: false,
        };
        let sink: ProgressSink = Arc::new(|_, _, _| panic!("broken sink"));

        let outcome = runner
            .run(params, Some(sink), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 3);
    }

    #[tokio::test]
    async fn test_min_score_filters_everything() {
        let (_db, runner) = seeded_runner().await;
        let params = SelectionParams {
            strategy: None,
            min_score: 99.9,
            max_results: 20,
            require_uptrend: false,
            require_hot_sector: false,
            require_breakout: false,
        };
        let outcome = runner
            .run(params, None, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.processed, 3);
    }
}

//! Incremental ingestion: materialize a range of trading days into the
//! store, one sequential capability pull at a time, paced to stay under
//! vendor quotas. Each run is tracked in `collection_history`.

use crate::domain::errors::{SourceError, SourceResult};
use crate::domain::types::{CollectionRun, exchange_today};
use crate::infrastructure::persistence::repositories::{
    CollectionCounts, CollectionHistoryRepository, MarketDataRepository,
};
use crate::infrastructure::sources::SourceRouter;
use anyhow::{Context, Result, anyhow};
use chrono::{Duration as ChronoDuration, NaiveDate};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub lookback_days: i64,
    pub include_fund_flow: bool,
    /// Re-pull dates that already look complete.
    pub force: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            lookback_days: 7,
            include_fund_flow: true,
            force: false,
        }
    }
}

pub struct IngestionEngine {
    pub(super) router: Arc<SourceRouter>,
    pub(super) market: MarketDataRepository,
    pub(super) history: CollectionHistoryRepository,
    pub(super) call_delay: Duration,
    pub(super) max_retries: u32,
    pub(super) retry_base_delay: Duration,
    pub(super) complete_threshold: i64,
}

impl IngestionEngine {
    pub fn new(
        router: Arc<SourceRouter>,
        market: MarketDataRepository,
        history: CollectionHistoryRepository,
        call_delay: Duration,
        max_retries: u32,
        retry_base_delay: Duration,
        complete_threshold: i64,
    ) -> Self {
        Self {
            router,
            market,
            history,
            call_delay,
            max_retries,
            retry_base_delay,
            complete_threshold,
        }
    }

    /// Ingest the trading days in `[today − lookback, today]`. Per-date
    /// failures are local; the run is marked failed only on cancellation
    /// or a store-level error.
    pub async fn run_incremental(
        &self,
        opts: IngestOptions,
        cancel: Arc<AtomicBool>,
    ) -> Result<CollectionRun> {
        let started = Instant::now();
        let dates = self.resolve_trading_days(opts.lookback_days).await;
        if dates.is_empty() {
            anyhow::bail!("no trading days to ingest");
        }

        let start_date = dates.last().expect("dates not empty").to_string();
        let end_date = dates.first().expect("dates not empty").to_string();
        let history_id = self
            .history
            .create("incremental", &start_date, &end_date)
            .await?;
        self.history.mark_running(history_id).await?;

        info!(
            "Ingestion run {}: {} trading days {} .. {}",
            history_id,
            dates.len(),
            start_date,
            end_date
        );

        let mut counts = CollectionCounts::default();

        // Stock list once per run.
        match self
            .with_rate_limit_retry("stock_list", || self.router.stock_list(None))
            .await
        {
            Ok(stocks) => {
                self.market.upsert_stocks(&stocks).await?;
                counts.stocks = stocks.len() as i64;
                info!("Stock list refreshed: {} rows", stocks.len());
            }
            Err(err) => warn!("Stock list refresh failed: {}", err),
        }
        self.pace().await;

        for date in &dates {
            if cancel.load(Ordering::Relaxed) {
                warn!("Ingestion run {} cancelled at {}", history_id, date);
                self.history.fail(history_id, "cancelled").await?;
                return self.finished_run(history_id).await;
            }

            if !opts.force {
                let existing = self.market.candle_count_on(*date).await?;
                if existing >= self.complete_threshold {
                    debug!("{}: {} candle rows already stored, skipping", date, existing);
                    continue;
                }
            }

            if let Err(err) = self.ingest_date(*date, opts.include_fund_flow, &mut counts).await {
                // Keep whatever this date managed to write and move on.
                warn!("Ingestion failed for {}: {}", date, err);
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        self.history.complete(history_id, counts, elapsed).await?;
        info!(
            "Ingestion run {} completed in {:.1}s: {} stocks, {} klines, {} flows, {} indicators",
            history_id, elapsed, counts.stocks, counts.klines, counts.flows, counts.indicators
        );

        self.finished_run(history_id).await
    }

    async fn ingest_date(
        &self,
        date: NaiveDate,
        include_fund_flow: bool,
        counts: &mut CollectionCounts,
    ) -> Result<()> {
        match self
            .with_rate_limit_retry("daily_by_date", || self.router.daily_by_date(date, None))
            .await
        {
            Ok(candles) => {
                let sane: Vec<_> = candles.iter().filter(|c| c.is_sane()).cloned().collect();
                let dropped = candles.len() - sane.len();
                if dropped > 0 {
                    warn!("{}: dropped {} malformed candle rows", date, dropped);
                }
                self.market.upsert_candles(&sane).await?;
                counts.klines += sane.len() as i64;
                info!("{}: {} candle rows", date, sane.len());
            }
            Err(err) => warn!("{}: candle pull failed: {}", date, err),
        }
        self.pace().await;

        match self
            .with_rate_limit_retry("daily_basic_by_date", || {
                self.router.daily_basic_by_date(date, None)
            })
            .await
        {
            Ok(basics) => {
                self.market.upsert_daily_basic(&basics).await?;
                counts.indicators += basics.len() as i64;
                info!("{}: {} daily_basic rows", date, basics.len());
            }
            Err(err) => warn!("{}: daily_basic pull failed: {}", date, err),
        }
        self.pace().await;

        if include_fund_flow {
            match self
                .with_rate_limit_retry("fund_flow_by_date", || {
                    self.router.fund_flow_by_date(date, None)
                })
                .await
            {
                Ok(flows) => {
                    self.market.upsert_fund_flow(&flows).await?;
                    counts.flows += flows.len() as i64;
                    info!("{}: {} fund_flow rows", date, flows.len());
                }
                Err(err) => warn!("{}: fund_flow pull failed: {}", date, err),
            }
            self.pace().await;
        }

        match self
            .with_rate_limit_retry("market_moneyflow", || {
                self.router.market_moneyflow(date, None)
            })
            .await
        {
            Ok(flows) => {
                self.market.upsert_market_moneyflow(&flows).await?;
                counts.flows += flows.len() as i64;
            }
            Err(err) => warn!("{}: market moneyflow pull failed: {}", date, err),
        }
        self.pace().await;

        match self
            .with_rate_limit_retry("sector_moneyflow", || {
                self.router.sector_moneyflow(date, None)
            })
            .await
        {
            Ok(flows) => {
                self.market.upsert_sector_moneyflow(&flows).await?;
            }
            Err(err) => warn!("{}: sector moneyflow pull failed: {}", date, err),
        }
        self.pace().await;

        Ok(())
    }

    /// Pull one stock's daily history and store it: the targeted
    /// repair path when a single code is missing bars.
    pub async fn backfill_code(&self, code: &str, days: i64) -> Result<u64> {
        let end = exchange_today();
        let start = end - ChronoDuration::days(days.max(1));
        let candles = self
            .with_rate_limit_retry("daily_by_code", || {
                self.router.daily_by_code(code, start, end, None)
            })
            .await
            .unwrap_or_default();

        let sane: Vec<_> = candles.iter().filter(|c| c.is_sane()).cloned().collect();
        let written = self.market.upsert_candles(&sane).await?;
        info!("{}: backfilled {} candle rows", code, written);
        Ok(written)
    }

    /// Recompute and persist the indicator snapshot for every stored
    /// stock as of its latest bar.
    pub async fn refresh_technical_indicators(
        &self,
        factor_engine: &crate::application::factors::FactorEngine,
    ) -> Result<u64> {
        let codes = self.market.codes_with_candles(i64::MAX).await?;
        let mut rows = Vec::with_capacity(codes.len());
        for code in &codes {
            let candles = self.market.recent_candles(code, 60).await?;
            let Some(last) = candles.last() else {
                continue;
            };
            let basic = self.market.latest_daily_basic(code).await?;
            let factors = factor_engine.compute(
                &candles,
                basic.as_ref(),
                None,
                &crate::application::factors::SectorStats::neutral(),
            );
            if factors.is_empty() {
                continue;
            }
            rows.push(factors.indicator_row(code, last.date));
        }
        let written = self.market.upsert_technical_indicators(&rows).await?;
        info!("Refreshed technical indicators for {} stocks", written);
        Ok(written)
    }

    /// Limit-up concept boards for one day (concepts plus members).
    pub async fn collect_kpl(&self, date: NaiveDate) -> Result<(u64, u64)> {
        let concepts = self
            .with_rate_limit_retry("kpl_concepts", || self.router.kpl_concepts(date, None))
            .await
            .unwrap_or_default();
        let concept_count = self.market.upsert_kpl_concepts(&concepts).await?;
        self.pace().await;

        let members = self
            .with_rate_limit_retry("kpl_concept_cons", || {
                self.router.kpl_concept_cons(date, None, None)
            })
            .await
            .unwrap_or_default();
        let member_count = self.market.upsert_kpl_concept_cons(&members).await?;

        info!(
            "{}: {} concepts, {} concept members",
            date, concept_count, member_count
        );
        Ok((concept_count, member_count))
    }

    /// Trading days in the window, newest first. Falls back to natural
    /// days when no source carries a calendar.
    async fn resolve_trading_days(&self, lookback_days: i64) -> Vec<NaiveDate> {
        let today = exchange_today();
        // Over-fetch the calendar so holidays don't shrink the window.
        let window_start = today - ChronoDuration::days(lookback_days * 2);

        match self.router.trade_calendar(window_start, today, None).await {
            Ok(calendar) => {
                let mut open: Vec<NaiveDate> = calendar
                    .iter()
                    .filter(|d| d.is_open)
                    .map(|d| d.date)
                    .collect();
                open.sort_unstable();
                open.reverse();
                open.truncate(lookback_days as usize);
                if open.is_empty() {
                    warn!("Trade calendar had no open days; using natural days");
                    natural_days(today, lookback_days)
                } else {
                    open
                }
            }
            Err(err) => {
                warn!("Trade calendar unavailable ({}); using natural days", err);
                natural_days(today, lookback_days)
            }
        }
    }

    /// Retry a routed call on vendor quota errors: exponential backoff,
    /// base delay doubling per attempt, bounded attempts.
    pub(super) async fn with_rate_limit_retry<T, F, Fut>(
        &self,
        what: &str,
        mut call: F,
    ) -> SourceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SourceResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Err(SourceError::RateLimited(msg)) if attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.retry_base_delay * 2u32.pow(attempt - 1);
                    warn!(
                        "{} rate limited ({}); retry {}/{} in {:?}",
                        what, msg, attempt, self.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    pub(super) async fn pace(&self) {
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
    }

    async fn finished_run(&self, history_id: i64) -> Result<CollectionRun> {
        self.history
            .get(history_id)
            .await?
            .ok_or_else(|| anyhow!("collection run {} vanished", history_id))
            .context("reading back collection run")
    }
}

fn natural_days(today: NaiveDate, lookback_days: i64) -> Vec<NaiveDate> {
    (0..lookback_days)
        .map(|offset| today - ChronoDuration::days(offset))
        .collect()
}

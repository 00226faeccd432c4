//! Failover router over the registered vendor adapters.
//!
//! Call order per capability: preferred source, then the fallback list,
//! then whatever else is healthy ranked by success rate. The first
//! non-empty answer wins and is cached under a TTL; empty answers count
//! as `no_data` in the health ledger and are never cached. Every call
//! accepts an optional deadline; once the budget is gone the router
//! answers `Timeout` without touching further adapters.

use super::MarketDataSource;
use super::health::{HealthState, SampleKind, SourceHealth};
use crate::domain::errors::{SourceError, SourceResult};
use crate::domain::types::{
    AuctionSnapshot, Candle, DailyBasic, FundFlowRow, KplConcept, KplConceptCons,
    MarketMoneyFlow, RealtimeQuote, SectorMoneyFlow, Stock, TradingDay,
};
use chrono::NaiveDate;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
const CACHE_CAPACITY: usize = 1000;
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(8);

struct CacheEntry {
    value: Value,
    inserted: Instant,
}

type Capability<T> =
    Box<dyn Fn(Arc<dyn MarketDataSource>) -> BoxFuture<'static, SourceResult<T>> + Send + Sync>;

pub struct SourceRouter {
    sources: Vec<Arc<dyn MarketDataSource>>,
    preferred: Option<String>,
    fallback_order: Vec<String>,
    health: RwLock<HashMap<String, SourceHealth>>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    cache_ttl: Duration,
    cache_capacity: usize,
}

impl Default for SourceRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRouter {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            preferred: None,
            fallback_order: Vec::new(),
            health: RwLock::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_capacity: CACHE_CAPACITY,
        }
    }

    pub fn register(mut self, source: Arc<dyn MarketDataSource>) -> Self {
        info!("Registered data source: {}", source.name());
        self.sources.push(source);
        self
    }

    pub fn preferred(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if self.sources.iter().any(|s| s.name() == name) {
            self.preferred = Some(name);
        } else {
            warn!("Preferred source {} is not registered", name);
        }
        self
    }

    pub fn fallback_order(mut self, order: Vec<String>) -> Self {
        self.fallback_order = order
            .into_iter()
            .filter(|name| {
                let known = self.sources.iter().any(|s| s.name() == name);
                if !known {
                    warn!("Fallback source {} is not registered", name);
                }
                known
            })
            .collect();
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    // ---- capability surface ----

    pub async fn stock_list(&self, deadline: Option<Duration>) -> SourceResult<Stock> {
        self.fetch(
            "stock_list",
            "stock_list".to_string(),
            deadline,
            Box::new(|s| async move { s.stock_list().await }.boxed()),
        )
        .await
    }

    pub async fn daily_by_date(
        &self,
        date: NaiveDate,
        deadline: Option<Duration>,
    ) -> SourceResult<Candle> {
        self.fetch(
            "daily_by_date",
            format!("daily_by_date|{}", date),
            deadline,
            Box::new(move |s| async move { s.daily_by_date(date).await }.boxed()),
        )
        .await
    }

    pub async fn daily_by_code(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
        deadline: Option<Duration>,
    ) -> SourceResult<Candle> {
        let code = code.to_string();
        self.fetch(
            "daily_by_code",
            format!("daily_by_code|{}|{}|{}", code, start, end),
            deadline,
            Box::new(move |s| {
                let code = code.clone();
                async move { s.daily_by_code(&code, start, end).await }.boxed()
            }),
        )
        .await
    }

    pub async fn fund_flow_by_date(
        &self,
        date: NaiveDate,
        deadline: Option<Duration>,
    ) -> SourceResult<FundFlowRow> {
        self.fetch(
            "fund_flow_by_date",
            format!("fund_flow_by_date|{}", date),
            deadline,
            Box::new(move |s| async move { s.fund_flow_by_date(date).await }.boxed()),
        )
        .await
    }

    pub async fn daily_basic_by_date(
        &self,
        date: NaiveDate,
        deadline: Option<Duration>,
    ) -> SourceResult<DailyBasic> {
        self.fetch(
            "daily_basic_by_date",
            format!("daily_basic_by_date|{}", date),
            deadline,
            Box::new(move |s| async move { s.daily_basic_by_date(date).await }.boxed()),
        )
        .await
    }

    pub async fn market_moneyflow(
        &self,
        date: NaiveDate,
        deadline: Option<Duration>,
    ) -> SourceResult<MarketMoneyFlow> {
        self.fetch(
            "market_moneyflow",
            format!("market_moneyflow|{}", date),
            deadline,
            Box::new(move |s| async move { s.market_moneyflow(date).await }.boxed()),
        )
        .await
    }

    pub async fn sector_moneyflow(
        &self,
        date: NaiveDate,
        deadline: Option<Duration>,
    ) -> SourceResult<SectorMoneyFlow> {
        self.fetch(
            "sector_moneyflow",
            format!("sector_moneyflow|{}", date),
            deadline,
            Box::new(move |s| async move { s.sector_moneyflow(date).await }.boxed()),
        )
        .await
    }

    pub async fn trade_calendar(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        deadline: Option<Duration>,
    ) -> SourceResult<TradingDay> {
        self.fetch(
            "trade_calendar",
            format!("trade_calendar|{}|{}", start, end),
            deadline,
            Box::new(move |s| async move { s.trade_calendar(start, end).await }.boxed()),
        )
        .await
    }

    pub async fn auction_by_date(
        &self,
        date: NaiveDate,
        code: Option<&str>,
        deadline: Option<Duration>,
    ) -> SourceResult<AuctionSnapshot> {
        let code = code.map(str::to_string);
        let key = format!(
            "auction_by_date|{}|{}",
            date,
            code.as_deref().unwrap_or("ALL")
        );
        self.fetch(
            "auction_by_date",
            key,
            deadline,
            Box::new(move |s| {
                let code = code.clone();
                async move { s.auction_by_date(date, code.as_deref()).await }.boxed()
            }),
        )
        .await
    }

    pub async fn realtime_quotes(
        &self,
        codes: Option<&[String]>,
        deadline: Option<Duration>,
    ) -> SourceResult<RealtimeQuote> {
        let codes: Option<Vec<String>> = codes.map(|c| c.to_vec());
        let key = format!(
            "realtime_quotes|{}",
            codes
                .as_ref()
                .map(|c| c.join(","))
                .unwrap_or_else(|| "ALL".to_string())
        );
        self.fetch(
            "realtime_quotes",
            key,
            deadline,
            Box::new(move |s| {
                let codes = codes.clone();
                async move { s.realtime_quotes(codes.as_deref()).await }.boxed()
            }),
        )
        .await
    }

    pub async fn kpl_concepts(
        &self,
        date: NaiveDate,
        deadline: Option<Duration>,
    ) -> SourceResult<KplConcept> {
        self.fetch(
            "kpl_concepts",
            format!("kpl_concepts|{}", date),
            deadline,
            Box::new(move |s| async move { s.kpl_concepts(date).await }.boxed()),
        )
        .await
    }

    pub async fn kpl_concept_cons(
        &self,
        date: NaiveDate,
        concept: Option<&str>,
        deadline: Option<Duration>,
    ) -> SourceResult<KplConceptCons> {
        let concept = concept.map(str::to_string);
        let key = format!(
            "kpl_concept_cons|{}|{}",
            date,
            concept.as_deref().unwrap_or("ALL")
        );
        self.fetch(
            "kpl_concept_cons",
            key,
            deadline,
            Box::new(move |s| {
                let concept = concept.clone();
                async move { s.kpl_concept_cons(date, concept.as_deref()).await }.boxed()
            }),
        )
        .await
    }

    // ---- core ----

    async fn fetch<T>(
        &self,
        capability: &'static str,
        cache_key: String,
        deadline: Option<Duration>,
        call: Capability<T>,
    ) -> SourceResult<T>
    where
        T: Serialize + DeserializeOwned + Send,
    {
        if let Some(cached) = self.cache_get::<T>(&cache_key) {
            debug!("cache hit: {}", cache_key);
            return Ok(cached);
        }

        let started = Instant::now();
        let mut rate_limited = false;

        for source in self.attempt_order().await {
            // Budget check before touching the next adapter.
            let remaining = match deadline {
                Some(budget) => match budget.checked_sub(started.elapsed()) {
                    Some(left) if !left.is_zero() => Some(left),
                    _ => return Err(SourceError::Timeout(budget)),
                },
                None => None,
            };

            if !source.is_available() {
                self.record(source.name(), SampleKind::Error, 0.0, "source not available")
                    .await;
                continue;
            }

            let attempt_started = Instant::now();
            let future = call(Arc::clone(&source));
            let outcome = match remaining {
                Some(left) => match tokio::time::timeout(left, future).await {
                    Ok(result) => result,
                    Err(_) => {
                        let latency = attempt_started.elapsed().as_secs_f64();
                        self.record(source.name(), SampleKind::Error, latency, "deadline exceeded")
                            .await;
                        return Err(SourceError::Timeout(
                            deadline.expect("remaining implies deadline"),
                        ));
                    }
                },
                None => future.await,
            };
            let latency = attempt_started.elapsed().as_secs_f64();

            match outcome {
                Ok(rows) if rows.is_empty() => {
                    self.record(source.name(), SampleKind::NoData, latency, "empty result")
                        .await;
                    debug!("{}: {} returned no data", capability, source.name());
                }
                Ok(rows) => {
                    self.record(source.name(), SampleKind::Success, latency, "").await;
                    debug!(
                        "{}: {} answered {} rows in {:.2}s",
                        capability,
                        source.name(),
                        rows.len(),
                        latency
                    );
                    self.cache_put(cache_key, &rows);
                    return Ok(rows);
                }
                Err(err) => {
                    rate_limited |= matches!(err, SourceError::RateLimited(_));
                    self.record(source.name(), SampleKind::Error, latency, &err.to_string())
                        .await;
                    warn!("{}: {} failed: {}", capability, source.name(), err);
                }
            }
        }

        error!("{}: all sources exhausted", capability);
        // Quota exhaustion is worth reporting as such so callers can
        // back off and retry instead of writing the day off.
        if rate_limited {
            return Err(SourceError::RateLimited(format!(
                "all sources rate limited for {}",
                capability
            )));
        }
        Err(SourceError::Unavailable(format!(
            "all sources exhausted for {}",
            capability
        )))
    }

    /// Preferred → fallback list → remaining healthy by rank.
    async fn attempt_order(&self) -> Vec<Arc<dyn MarketDataSource>> {
        let mut order: Vec<Arc<dyn MarketDataSource>> = Vec::new();

        if let Some(name) = &self.preferred
            && let Some(source) = self.by_name(name)
        {
            push_unique(&mut order, source);
        }
        for name in &self.fallback_order {
            if let Some(source) = self.by_name(name) {
                push_unique(&mut order, source);
            }
        }

        let health = self.health.read().await;
        let mut ranked: Vec<(f64, Arc<dyn MarketDataSource>)> = self
            .sources
            .iter()
            .filter(|s| !order.iter().any(|o| o.name() == s.name()))
            .filter_map(|s| {
                health
                    .get(s.name())
                    .and_then(SourceHealth::rank)
                    .map(|rank| (rank, Arc::clone(s)))
            })
            .collect();
        drop(health);

        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        for (_, source) in ranked {
            push_unique(&mut order, source);
        }

        // Nothing configured and no health yet: registration order.
        if order.is_empty() {
            order = self.sources.clone();
        }

        order
    }

    fn by_name(&self, name: &str) -> Option<Arc<dyn MarketDataSource>> {
        self.sources.iter().find(|s| s.name() == name).cloned()
    }

    async fn record(&self, name: &str, kind: SampleKind, latency_secs: f64, msg: &str) {
        let mut health = self.health.write().await;
        health
            .entry(name.to_string())
            .or_insert_with(|| SourceHealth::new(name))
            .update(kind, latency_secs, msg);
    }

    // ---- cache ----

    fn cache_get<T: DeserializeOwned>(&self, key: &str) -> Option<Vec<T>> {
        let mut cache = self.cache.lock().expect("router cache lock");
        match cache.get(key) {
            Some(entry) if entry.inserted.elapsed() < self.cache_ttl => {
                serde_json::from_value(entry.value.clone()).ok()
            }
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    fn cache_put<T: Serialize>(&self, key: String, rows: &[T]) {
        let Ok(value) = serde_json::to_value(rows) else {
            return;
        };
        let mut cache = self.cache.lock().expect("router cache lock");
        if cache.len() >= self.cache_capacity {
            // Evict the oldest entry.
            if let Some(oldest) = cache
                .iter()
                .min_by_key(|(_, e)| e.inserted)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest);
            }
        }
        cache.insert(
            key,
            CacheEntry {
                value,
                inserted: Instant::now(),
            },
        );
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().expect("router cache lock").len()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().expect("router cache lock").clear();
        info!("Router cache cleared");
    }

    // ---- health ----

    /// Probe every registered source with a bounded stock-list call.
    pub async fn run_health_check(&self) {
        info!("Running data source health check...");
        for source in &self.sources {
            if !source.is_available() {
                self.record(source.name(), SampleKind::Error, 0.0, "source not available")
                    .await;
                continue;
            }
            let started = Instant::now();
            match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, source.stock_list()).await {
                Ok(Ok(rows)) if rows.is_empty() => {
                    self.record(
                        source.name(),
                        SampleKind::NoData,
                        started.elapsed().as_secs_f64(),
                        "health check returned no data",
                    )
                    .await;
                }
                Ok(Ok(rows)) => {
                    self.record(
                        source.name(),
                        SampleKind::Success,
                        started.elapsed().as_secs_f64(),
                        "",
                    )
                    .await;
                    info!("Source {} healthy: {} stocks", source.name(), rows.len());
                }
                Ok(Err(err)) => {
                    self.record(
                        source.name(),
                        SampleKind::Error,
                        started.elapsed().as_secs_f64(),
                        &err.to_string(),
                    )
                    .await;
                    warn!("Source {} health check failed: {}", source.name(), err);
                }
                Err(_) => {
                    self.record(source.name(), SampleKind::Error, 0.0, "health check timeout")
                        .await;
                    warn!("Source {} health check timed out", source.name());
                }
            }
        }
    }

    pub async fn health_snapshot(&self) -> Vec<SourceHealth> {
        let health = self.health.read().await;
        let mut snapshot: Vec<SourceHealth> = health.values().cloned().collect();
        snapshot.sort_by(|a, b| a.source_name.cmp(&b.source_name));
        snapshot
    }

    pub async fn state_of(&self, name: &str) -> HealthState {
        let health = self.health.read().await;
        health
            .get(name)
            .map(|h| h.state)
            .unwrap_or(HealthState::Unknown)
    }
}

fn push_unique(
    order: &mut Vec<Arc<dyn MarketDataSource>>,
    source: Arc<dyn MarketDataSource>,
) {
    if !order.iter().any(|s| s.name() == source.name()) {
        order.push(source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::sources::mock::MockSource;
    use async_trait::async_trait;

    fn candle(code: &str, date: NaiveDate) -> Candle {
        Candle {
            code: code.to_string(),
            date,
            open: 10.0,
            high: 10.5,
            low: 9.9,
            close: 10.3,
            volume: 1_000_000,
            amount: 10_300_000.0,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    #[tokio::test]
    async fn test_preferred_source_wins() {
        let primary = Arc::new(MockSource::named("primary"));
        let secondary = Arc::new(MockSource::named("secondary"));
        primary.push_candle(candle("600519", date()));
        secondary.push_candle(candle("600519", date()));

        let router = SourceRouter::new()
            .register(primary.clone())
            .register(secondary.clone())
            .preferred("primary")
            .fallback_order(vec!["secondary".to_string()]);

        let rows = router.daily_by_date(date(), None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(primary.calls("daily_by_date"), 1);
        assert_eq!(secondary.calls("daily_by_date"), 0);
    }

    #[tokio::test]
    async fn test_failover_to_secondary() {
        let primary = Arc::new(MockSource::named("primary"));
        let secondary = Arc::new(MockSource::named("secondary"));
        primary.set_available(false);
        secondary.push_candle(candle("600519", date()));

        let router = SourceRouter::new()
            .register(primary.clone())
            .register(secondary.clone())
            .preferred("primary")
            .fallback_order(vec!["secondary".to_string()]);

        let rows = router.daily_by_date(date(), None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(primary.calls("daily_by_date"), 0);
        assert_eq!(secondary.calls("daily_by_date"), 1);

        // The unavailable attempt was recorded against primary's health.
        let snapshot = router.health_snapshot().await;
        let primary_health = snapshot
            .iter()
            .find(|h| h.source_name == "primary")
            .unwrap();
        assert_eq!(primary_health.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_error_falls_through_and_is_sampled() {
        let primary = Arc::new(MockSource::named("primary"));
        let secondary = Arc::new(MockSource::named("secondary"));
        primary.fail_with(SourceError::RateLimited("quota".into()));
        secondary.push_candle(candle("600519", date()));

        let router = SourceRouter::new()
            .register(primary.clone())
            .register(secondary.clone())
            .preferred("primary")
            .fallback_order(vec!["secondary".to_string()]);

        let rows = router.daily_by_date(date(), None).await.unwrap();
        assert_eq!(rows.len(), 1);

        let snapshot = router.health_snapshot().await;
        let primary_health = snapshot
            .iter()
            .find(|h| h.source_name == "primary")
            .unwrap();
        assert_eq!(primary_health.failed_requests, 1);
        assert!(primary_health.error_message.contains("rate limit"));
    }

    #[tokio::test]
    async fn test_all_sources_rate_limited_surfaces_rate_limit() {
        let primary = Arc::new(MockSource::named("primary"));
        primary.fail_with(SourceError::RateLimited("quota".into()));

        let router = SourceRouter::new().register(primary).preferred("primary");
        let result = router.daily_by_date(date(), None).await;
        assert!(matches!(result, Err(SourceError::RateLimited(_))));
    }

    #[tokio::test]
    async fn test_successful_result_is_cached() {
        let primary = Arc::new(MockSource::named("primary"));
        primary.push_candle(candle("600519", date()));

        let router = SourceRouter::new().register(primary.clone()).preferred("primary");

        router.daily_by_date(date(), None).await.unwrap();
        router.daily_by_date(date(), None).await.unwrap();
        assert_eq!(primary.calls("daily_by_date"), 1);
        assert_eq!(router.cache_len(), 1);
    }

    #[tokio::test]
    async fn test_empty_result_is_not_cached() {
        let primary = Arc::new(MockSource::named("primary"));
        let router = SourceRouter::new().register(primary.clone()).preferred("primary");

        // Nothing seeded: every call reaches the adapter again.
        let first = router.daily_by_date(date(), None).await;
        let second = router.daily_by_date(date(), None).await;
        assert!(matches!(first, Err(SourceError::Unavailable(_))));
        assert!(matches!(second, Err(SourceError::Unavailable(_))));
        assert_eq!(primary.calls("daily_by_date"), 2);
        assert_eq!(router.cache_len(), 0);

        // Answered-but-empty counts as no_data, not failure.
        let snapshot = router.health_snapshot().await;
        let health = snapshot.iter().find(|h| h.source_name == "primary").unwrap();
        assert_eq!(health.no_data_requests, 2);
        assert_eq!(health.failed_requests, 0);
    }

    #[tokio::test]
    async fn test_cache_expires_after_ttl() {
        let primary = Arc::new(MockSource::named("primary"));
        primary.push_candle(candle("600519", date()));

        let router = SourceRouter::new()
            .register(primary.clone())
            .preferred("primary")
            .cache_ttl(Duration::from_millis(40));

        router.daily_by_date(date(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        router.daily_by_date(date(), None).await.unwrap();
        // A stale entry is never served.
        assert_eq!(primary.calls("daily_by_date"), 2);
    }

    /// Adapter that answers only after a fixed delay; used to force the
    /// router's deadline to expire.
    struct SlowSource {
        delay: Duration,
    }

    #[async_trait]
    impl MarketDataSource for SlowSource {
        fn name(&self) -> &'static str {
            "slow"
        }
        fn is_available(&self) -> bool {
            true
        }
        async fn stock_list(&self) -> SourceResult<Stock> {
            tokio::time::sleep(self.delay).await;
            Ok(Vec::new())
        }
        async fn daily_by_date(&self, d: NaiveDate) -> SourceResult<Candle> {
            tokio::time::sleep(self.delay).await;
            Ok(vec![candle("600519", d)])
        }
        async fn daily_by_code(
            &self,
            _: &str,
            _: NaiveDate,
            _: NaiveDate,
        ) -> SourceResult<Candle> {
            Err(SourceError::Unavailable("not in test".into()))
        }
        async fn fund_flow_by_date(&self, _: NaiveDate) -> SourceResult<FundFlowRow> {
            Err(SourceError::Unavailable("not in test".into()))
        }
        async fn daily_basic_by_date(&self, _: NaiveDate) -> SourceResult<DailyBasic> {
            Err(SourceError::Unavailable("not in test".into()))
        }
        async fn market_moneyflow(&self, _: NaiveDate) -> SourceResult<MarketMoneyFlow> {
            Err(SourceError::Unavailable("not in test".into()))
        }
        async fn sector_moneyflow(&self, _: NaiveDate) -> SourceResult<SectorMoneyFlow> {
            Err(SourceError::Unavailable("not in test".into()))
        }
        async fn trade_calendar(&self, _: NaiveDate, _: NaiveDate) -> SourceResult<TradingDay> {
            Err(SourceError::Unavailable("not in test".into()))
        }
        async fn auction_by_date(
            &self,
            _: NaiveDate,
            _: Option<&str>,
        ) -> SourceResult<AuctionSnapshot> {
            Err(SourceError::Unavailable("not in test".into()))
        }
        async fn realtime_quotes(&self, _: Option<&[String]>) -> SourceResult<RealtimeQuote> {
            Err(SourceError::Unavailable("not in test".into()))
        }
        async fn kpl_concepts(&self, _: NaiveDate) -> SourceResult<KplConcept> {
            Err(SourceError::Unavailable("not in test".into()))
        }
        async fn kpl_concept_cons(
            &self,
            _: NaiveDate,
            _: Option<&str>,
        ) -> SourceResult<KplConceptCons> {
            Err(SourceError::Unavailable("not in test".into()))
        }
    }

    #[tokio::test]
    async fn test_deadline_returns_timeout() {
        let slow = Arc::new(SlowSource {
            delay: Duration::from_millis(200),
        });
        let backup = Arc::new(MockSource::named("backup"));
        backup.push_candle(candle("600519", date()));

        let router = SourceRouter::new()
            .register(slow)
            .register(backup.clone())
            .preferred("slow");

        let result = router
            .daily_by_date(date(), Some(Duration::from_millis(40)))
            .await;
        assert!(matches!(result, Err(SourceError::Timeout(_))));
        // Deadline gone: the backup was never consulted.
        assert_eq!(backup.calls("daily_by_date"), 0);

        // Without a deadline the slow source eventually answers.
        let rows = router.daily_by_date(date(), None).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_health_check_probes_all_sources() {
        let up = Arc::new(MockSource::named("up"));
        up.push_stock(Stock {
            code: "600519".into(),
            name: "贵州茅台".into(),
            exchange: crate::domain::types::Exchange::Shanghai,
            industry: Some("白酒".into()),
        });
        let down = Arc::new(MockSource::named("down"));
        down.fail_with(SourceError::Io("connection refused".into()));

        let router = SourceRouter::new().register(up).register(down);
        router.run_health_check().await;

        assert_eq!(router.state_of("up").await, HealthState::Healthy);
        assert_eq!(router.state_of("down").await, HealthState::Unavailable);
    }
}

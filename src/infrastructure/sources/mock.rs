//! In-memory source used by `Mode::Mock` runs and by router/ingestion
//! tests. Seed it with canned rows per capability; it can also be told
//! to fail every call with a given error to exercise failover paths.

use super::MarketDataSource;
use crate::domain::errors::{SourceError, SourceResult};
use crate::domain::types::{
    AuctionSnapshot, Candle, DailyBasic, Exchange, FundFlowRow, KplConcept, KplConceptCons,
    MarketMoneyFlow, RealtimeQuote, SectorMoneyFlow, Stock, TradingDay,
};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct MockState {
    unavailable: bool,
    fail_with: Option<SourceError>,
    stocks: Vec<Stock>,
    candles: HashMap<NaiveDate, Vec<Candle>>,
    history: HashMap<String, Vec<Candle>>,
    fund_flows: HashMap<NaiveDate, Vec<FundFlowRow>>,
    basics: HashMap<NaiveDate, Vec<DailyBasic>>,
    market_flows: HashMap<NaiveDate, Vec<MarketMoneyFlow>>,
    sector_flows: HashMap<NaiveDate, Vec<SectorMoneyFlow>>,
    calendar: Vec<TradingDay>,
    auctions: HashMap<NaiveDate, Vec<AuctionSnapshot>>,
    quotes: Vec<RealtimeQuote>,
    concepts: HashMap<NaiveDate, Vec<KplConcept>>,
    concept_cons: HashMap<NaiveDate, Vec<KplConceptCons>>,
    calls: HashMap<&'static str, u64>,
}

pub struct MockSource {
    name: &'static str,
    state: RwLock<MockState>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::named("mock")
    }

    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            state: RwLock::new(MockState::default()),
        }
    }

    /// A deterministic three-stock market with 70 trading days of
    /// history ending today, enough for every factor window.
    pub fn with_fixture() -> Self {
        let source = Self::new();
        let today = crate::domain::types::exchange_today();

        let specs: [(&str, &str, &str, f64); 3] = [
            ("600519", "贵州茅台", "白酒", 1680.0),
            ("000001", "平安银行", "银行", 10.8),
            ("300750", "宁德时代", "新能源", 188.0),
        ];

        let mut stocks = Vec::new();
        let mut days = Vec::new();
        for offset in (0..70).rev() {
            days.push(today - Duration::days(offset));
        }

        for (code, name, industry, base) in specs {
            stocks.push(Stock {
                code: code.to_string(),
                name: name.to_string(),
                exchange: Exchange::from_code(code),
                industry: Some(industry.to_string()),
            });

            for (i, date) in days.iter().enumerate() {
                // Gentle uptrend with a deterministic wobble.
                let wobble = ((i as f64) * 0.7).sin() * 0.01;
                let close = base * (1.0 + 0.002 * i as f64 + wobble);
                let candle = Candle {
                    code: code.to_string(),
                    date: *date,
                    open: close * 0.995,
                    high: close * 1.012,
                    low: close * 0.988,
                    close,
                    volume: 1_000_000 + (i as i64 % 7) * 150_000,
                    amount: close * 1_000_000.0,
                };
                source.push_candle(candle.clone());
                source
                    .state
                    .write()
                    .unwrap()
                    .history
                    .entry(code.to_string())
                    .or_default()
                    .push(candle);

                source.push_fund_flow(FundFlowRow {
                    code: code.to_string(),
                    date: *date,
                    main_fund_flow: 12_000_000.0 + (i as f64) * 50_000.0,
                    retail_fund_flow: -3_000_000.0,
                    institutional_flow: 15_000_000.0,
                    large_order_ratio: 0.12,
                });
            }

            let latest = *days.last().expect("fixture has days");
            source.push_daily_basic(DailyBasic {
                code: code.to_string(),
                trade_date: latest,
                close: Some(base),
                pe: Some(22.0),
                pe_ttm: Some(24.0),
                pb: Some(4.0),
                turnover_rate: Some(0.8),
                volume_ratio: Some(1.1),
                total_mv: Some(5.0e10),
                ..DailyBasic::default()
            });

            source.push_quote(RealtimeQuote {
                code: code.to_string(),
                name: name.to_string(),
                price: base * 1.004,
                pre_close: base,
                open: base * 0.998,
                high: base * 1.009,
                low: base * 0.995,
                volume: 1_200_000,
                amount: base * 1_200_000.0,
                change_percent: 0.4,
            });
        }

        {
            let mut state = source.state.write().unwrap();
            state.stocks = stocks;
            state.calendar = days
                .iter()
                .map(|d| TradingDay {
                    date: *d,
                    is_open: true,
                })
                .collect();
        }
        source
    }

    pub fn set_available(&self, available: bool) {
        self.state.write().unwrap().unavailable = !available;
    }

    /// Fail every subsequent capability call with this error.
    pub fn fail_with(&self, err: SourceError) {
        self.state.write().unwrap().fail_with = Some(err);
    }

    pub fn clear_failure(&self) {
        self.state.write().unwrap().fail_with = None;
    }

    pub fn push_stock(&self, stock: Stock) {
        self.state.write().unwrap().stocks.push(stock);
    }

    pub fn push_candle(&self, candle: Candle) {
        self.state
            .write()
            .unwrap()
            .candles
            .entry(candle.date)
            .or_default()
            .push(candle);
    }

    pub fn push_history(&self, candle: Candle) {
        self.state
            .write()
            .unwrap()
            .history
            .entry(candle.code.clone())
            .or_default()
            .push(candle);
    }

    pub fn push_fund_flow(&self, flow: FundFlowRow) {
        self.state
            .write()
            .unwrap()
            .fund_flows
            .entry(flow.date)
            .or_default()
            .push(flow);
    }

    pub fn push_daily_basic(&self, basic: DailyBasic) {
        self.state
            .write()
            .unwrap()
            .basics
            .entry(basic.trade_date)
            .or_default()
            .push(basic);
    }

    pub fn push_market_flow(&self, flow: MarketMoneyFlow) {
        self.state
            .write()
            .unwrap()
            .market_flows
            .entry(flow.trade_date)
            .or_default()
            .push(flow);
    }

    pub fn push_sector_flow(&self, flow: SectorMoneyFlow) {
        self.state
            .write()
            .unwrap()
            .sector_flows
            .entry(flow.trade_date)
            .or_default()
            .push(flow);
    }

    pub fn set_calendar(&self, days: Vec<TradingDay>) {
        self.state.write().unwrap().calendar = days;
    }

    pub fn push_auction(&self, snap: AuctionSnapshot) {
        self.state
            .write()
            .unwrap()
            .auctions
            .entry(snap.trade_date)
            .or_default()
            .push(snap);
    }

    pub fn push_quote(&self, quote: RealtimeQuote) {
        self.state.write().unwrap().quotes.push(quote);
    }

    pub fn push_concept(&self, concept: KplConcept) {
        self.state
            .write()
            .unwrap()
            .concepts
            .entry(concept.trade_date)
            .or_default()
            .push(concept);
    }

    /// How many times a capability was invoked (for cache assertions).
    pub fn calls(&self, capability: &str) -> u64 {
        *self
            .state
            .read()
            .unwrap()
            .calls
            .get(capability)
            .unwrap_or(&0)
    }

    fn enter(&self, capability: &'static str) -> Result<(), SourceError> {
        let mut state = self.state.write().unwrap();
        *state.calls.entry(capability).or_insert(0) += 1;
        if let Some(err) = &state.fail_with {
            return Err(err.clone());
        }
        Ok(())
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataSource for MockSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_available(&self) -> bool {
        !self.state.read().unwrap().unavailable
    }

    async fn stock_list(&self) -> SourceResult<Stock> {
        self.enter("stock_list")?;
        Ok(self.state.read().unwrap().stocks.clone())
    }

    async fn daily_by_date(&self, date: NaiveDate) -> SourceResult<Candle> {
        self.enter("daily_by_date")?;
        Ok(self
            .state
            .read()
            .unwrap()
            .candles
            .get(&date)
            .cloned()
            .unwrap_or_default())
    }

    async fn daily_by_code(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> SourceResult<Candle> {
        self.enter("daily_by_code")?;
        Ok(self
            .state
            .read()
            .unwrap()
            .history
            .get(code)
            .map(|candles| {
                candles
                    .iter()
                    .filter(|c| c.date >= start && c.date <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fund_flow_by_date(&self, date: NaiveDate) -> SourceResult<FundFlowRow> {
        self.enter("fund_flow_by_date")?;
        Ok(self
            .state
            .read()
            .unwrap()
            .fund_flows
            .get(&date)
            .cloned()
            .unwrap_or_default())
    }

    async fn daily_basic_by_date(&self, date: NaiveDate) -> SourceResult<DailyBasic> {
        self.enter("daily_basic_by_date")?;
        Ok(self
            .state
            .read()
            .unwrap()
            .basics
            .get(&date)
            .cloned()
            .unwrap_or_default())
    }

    async fn market_moneyflow(&self, date: NaiveDate) -> SourceResult<MarketMoneyFlow> {
        self.enter("market_moneyflow")?;
        Ok(self
            .state
            .read()
            .unwrap()
            .market_flows
            .get(&date)
            .cloned()
            .unwrap_or_default())
    }

    async fn sector_moneyflow(&self, date: NaiveDate) -> SourceResult<SectorMoneyFlow> {
        self.enter("sector_moneyflow")?;
        Ok(self
            .state
            .read()
            .unwrap()
            .sector_flows
            .get(&date)
            .cloned()
            .unwrap_or_default())
    }

    async fn trade_calendar(&self, start: NaiveDate, end: NaiveDate) -> SourceResult<TradingDay> {
        self.enter("trade_calendar")?;
        Ok(self
            .state
            .read()
            .unwrap()
            .calendar
            .iter()
            .filter(|d| d.date >= start && d.date <= end)
            .cloned()
            .collect())
    }

    async fn auction_by_date(
        &self,
        date: NaiveDate,
        code: Option<&str>,
    ) -> SourceResult<AuctionSnapshot> {
        self.enter("auction_by_date")?;
        let snaps = self
            .state
            .read()
            .unwrap()
            .auctions
            .get(&date)
            .cloned()
            .unwrap_or_default();
        Ok(match code {
            Some(code) => snaps.into_iter().filter(|s| s.code == code).collect(),
            None => snaps,
        })
    }

    async fn realtime_quotes(&self, codes: Option<&[String]>) -> SourceResult<RealtimeQuote> {
        self.enter("realtime_quotes")?;
        let quotes = self.state.read().unwrap().quotes.clone();
        Ok(match codes {
            Some(codes) => quotes
                .into_iter()
                .filter(|q| codes.iter().any(|c| c == &q.code))
                .collect(),
            None => quotes,
        })
    }

    async fn kpl_concepts(&self, date: NaiveDate) -> SourceResult<KplConcept> {
        self.enter("kpl_concepts")?;
        Ok(self
            .state
            .read()
            .unwrap()
            .concepts
            .get(&date)
            .cloned()
            .unwrap_or_default())
    }

    async fn kpl_concept_cons(
        &self,
        date: NaiveDate,
        concept: Option<&str>,
    ) -> SourceResult<KplConceptCons> {
        self.enter("kpl_concept_cons")?;
        let members = self
            .state
            .read()
            .unwrap()
            .concept_cons
            .get(&date)
            .cloned()
            .unwrap_or_default();
        Ok(match concept {
            Some(concept) => members.into_iter().filter(|m| m.ts_code == concept).collect(),
            None => members,
        })
    }
}

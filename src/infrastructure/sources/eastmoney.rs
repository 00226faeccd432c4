//! Eastmoney adapter: the keyless secondary vendor.
//!
//! Serves a subset of the capability surface from the public spot-list
//! endpoint (`qt/clist/get`): stock list, today's candles/valuation/fund
//! flow snapshots, and realtime quotes. Spot volume is 手 (×100 to
//! shares); amounts are already in yuan. Everything else reports
//! `Unavailable` and the router falls through.

use super::MarketDataSource;
use crate::domain::errors::{SourceError, SourceResult};
use crate::domain::types::{
    AuctionSnapshot, Candle, DailyBasic, Exchange, FundFlowRow, KplConcept, KplConceptCons,
    MarketMoneyFlow, RealtimeQuote, SectorMoneyFlow, Stock, TradingDay, exchange_today,
};
use crate::infrastructure::core::http_client_factory::{HttpClientFactory, build_url_with_query};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest_middleware::ClientWithMiddleware;
use serde_json::Value;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://push2.eastmoney.com";

/// All A-share listings across both venues, the market filter the web
/// terminal itself sends.
const MARKET_FILTER: &str = "m:0 t:6,m:0 t:80,m:1 t:2,m:1 t:23";

/// f12 code, f14 name, f2 price, f18 pre_close, f17 open, f15 high,
/// f16 low, f5 volume(手), f6 amount(yuan), f8 turnover, f9 pe,
/// f10 volume_ratio, f20 total mv, f21 circ mv, f23 pb,
/// f62 main net, f66+f72 elg+lg, f78+f84 md+sm, f184 main ratio(%).
const SPOT_FIELDS: &str =
    "f2,f5,f6,f8,f9,f10,f12,f14,f15,f16,f17,f18,f20,f21,f23,f62,f66,f72,f78,f84,f184";

pub struct EastmoneySource {
    client: ClientWithMiddleware,
    base_url: String,
}

impl EastmoneySource {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url,
        }
    }

    /// One full spot pull: every listed A-share with the field set above.
    async fn fetch_spot(&self) -> Result<Vec<Value>, SourceError> {
        let url = build_url_with_query(
            &format!("{}/api/qt/clist/get", self.base_url),
            &[
                ("pn", "1"),
                ("pz", "6000"),
                ("po", "1"),
                ("np", "1"),
                ("fltt", "2"),
                ("invt", "2"),
                ("fid", "f3"),
                ("fs", MARKET_FILTER),
                ("fields", SPOT_FIELDS),
            ],
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Io(format!("eastmoney request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(SourceError::RateLimited(format!("http {}", status)));
        }
        if !status.is_success() {
            return Err(SourceError::Io(format!("eastmoney http status {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SourceError::Format(format!("eastmoney response not json: {}", e)))?;

        let rows = body
            .pointer("/data/diff")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        debug!("eastmoney spot returned {} rows", rows.len());
        Ok(rows)
    }
}

impl Default for EastmoneySource {
    fn default() -> Self {
        Self::new()
    }
}

/// Suspended stocks report "-" instead of a number.
fn num(row: &Value, field: &str) -> Option<f64> {
    match row.get(field) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

fn text(row: &Value, field: &str) -> Option<String> {
    row.get(field).and_then(Value::as_str).map(str::to_string)
}

#[async_trait]
impl MarketDataSource for EastmoneySource {
    fn name(&self) -> &'static str {
        "eastmoney"
    }

    fn is_available(&self) -> bool {
        // Public endpoint, no credentials required.
        true
    }

    async fn stock_list(&self) -> SourceResult<Stock> {
        let rows = self.fetch_spot().await?;
        let mut stocks = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(code) = text(row, "f12") else {
                continue;
            };
            stocks.push(Stock {
                name: text(row, "f14").unwrap_or_default(),
                exchange: Exchange::from_code(&code),
                industry: None,
                code,
            });
        }
        Ok(stocks)
    }

    async fn daily_by_date(&self, date: NaiveDate) -> SourceResult<Candle> {
        // The spot feed only describes the current session.
        if date != exchange_today() {
            return Ok(Vec::new());
        }

        let rows = self.fetch_spot().await?;
        let mut candles = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(code) = text(row, "f12") else {
                continue;
            };
            let (Some(open), Some(high), Some(low), Some(close)) = (
                num(row, "f17"),
                num(row, "f15"),
                num(row, "f16"),
                num(row, "f2"),
            ) else {
                continue; // suspended
            };
            candles.push(Candle {
                code,
                date,
                open,
                high,
                low,
                close,
                volume: (num(row, "f5").unwrap_or(0.0) * 100.0) as i64,
                amount: num(row, "f6").unwrap_or(0.0),
            });
        }
        Ok(candles)
    }

    async fn daily_by_code(
        &self,
        _code: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> SourceResult<Candle> {
        Err(SourceError::Unavailable(
            "eastmoney adapter has no per-code history endpoint".into(),
        ))
    }

    async fn fund_flow_by_date(&self, date: NaiveDate) -> SourceResult<FundFlowRow> {
        if date != exchange_today() {
            return Ok(Vec::new());
        }

        let rows = self.fetch_spot().await?;
        let mut flows = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(code) = text(row, "f12") else {
                continue;
            };
            let Some(main) = num(row, "f62") else {
                continue;
            };
            let institutional =
                num(row, "f66").unwrap_or(0.0) + num(row, "f72").unwrap_or(0.0);
            let retail = num(row, "f78").unwrap_or(0.0) + num(row, "f84").unwrap_or(0.0);
            let ratio = (num(row, "f184").unwrap_or(0.0) / 100.0).clamp(0.0, 1.0);
            flows.push(FundFlowRow {
                code,
                date,
                main_fund_flow: main,
                retail_fund_flow: retail,
                institutional_flow: institutional,
                large_order_ratio: (ratio * 10_000.0).round() / 10_000.0,
            });
        }
        Ok(flows)
    }

    async fn daily_basic_by_date(&self, date: NaiveDate) -> SourceResult<DailyBasic> {
        if date != exchange_today() {
            return Ok(Vec::new());
        }

        let rows = self.fetch_spot().await?;
        let mut basics = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(code) = text(row, "f12") else {
                continue;
            };
            basics.push(DailyBasic {
                code,
                trade_date: date,
                close: num(row, "f2"),
                turnover_rate: num(row, "f8"),
                turnover_rate_f: None,
                volume_ratio: num(row, "f10"),
                pe: num(row, "f9"),
                pe_ttm: num(row, "f9"),
                pb: num(row, "f23"),
                ps: None,
                ps_ttm: None,
                dv_ratio: None,
                dv_ttm: None,
                total_share: None,
                float_share: None,
                free_share: None,
                total_mv: num(row, "f20"),
                circ_mv: num(row, "f21"),
            });
        }
        Ok(basics)
    }

    async fn market_moneyflow(&self, _date: NaiveDate) -> SourceResult<MarketMoneyFlow> {
        Err(SourceError::Unavailable(
            "eastmoney adapter does not expose market-level flow".into(),
        ))
    }

    async fn sector_moneyflow(&self, _date: NaiveDate) -> SourceResult<SectorMoneyFlow> {
        Err(SourceError::Unavailable(
            "eastmoney adapter does not expose sector-level flow".into(),
        ))
    }

    async fn trade_calendar(
        &self,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> SourceResult<TradingDay> {
        Err(SourceError::Unavailable(
            "eastmoney adapter has no trade calendar".into(),
        ))
    }

    async fn auction_by_date(
        &self,
        _date: NaiveDate,
        _code: Option<&str>,
    ) -> SourceResult<AuctionSnapshot> {
        Err(SourceError::Unavailable(
            "eastmoney adapter has no auction snapshot endpoint".into(),
        ))
    }

    async fn realtime_quotes(&self, codes: Option<&[String]>) -> SourceResult<RealtimeQuote> {
        let rows = self.fetch_spot().await?;
        let mut quotes = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(code) = text(row, "f12") else {
                continue;
            };
            if let Some(wanted) = codes
                && !wanted.iter().any(|c| c == &code)
            {
                continue;
            }
            let price = num(row, "f2").unwrap_or(0.0);
            let pre_close = num(row, "f18").unwrap_or(0.0);
            let change_percent = if pre_close > 0.0 {
                (price - pre_close) / pre_close * 100.0
            } else {
                0.0
            };
            quotes.push(RealtimeQuote {
                code,
                name: text(row, "f14").unwrap_or_default(),
                price,
                pre_close,
                open: num(row, "f17").unwrap_or(0.0),
                high: num(row, "f15").unwrap_or(0.0),
                low: num(row, "f16").unwrap_or(0.0),
                volume: (num(row, "f5").unwrap_or(0.0) * 100.0) as i64,
                amount: num(row, "f6").unwrap_or(0.0),
                change_percent,
            });
        }
        Ok(quotes)
    }

    async fn kpl_concepts(&self, _date: NaiveDate) -> SourceResult<KplConcept> {
        Err(SourceError::Unavailable(
            "eastmoney adapter has no limit-up concept feed".into(),
        ))
    }

    async fn kpl_concept_cons(
        &self,
        _date: NaiveDate,
        _concept: Option<&str>,
    ) -> SourceResult<KplConceptCons> {
        Err(SourceError::Unavailable(
            "eastmoney adapter has no limit-up concept feed".into(),
        ))
    }
}

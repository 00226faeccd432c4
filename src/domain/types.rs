//! Canonical row types shared by the store, the source adapters and the
//! analysis layers.
//!
//! Vendors speak in untyped tables with exchange-suffixed codes and mixed
//! units (手 for volume, 千元/万元 for amounts). Everything is normalized
//! into these structs at the adapter boundary: volumes in shares, amounts
//! in yuan, dates as `NaiveDate`, codes split into `(code, Exchange)`.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Mainland listing venues. `Other` covers the Beijing exchange and
/// anything a vendor reports that is neither SH nor SZ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Exchange {
    Shanghai,
    Shenzhen,
    Other,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Shanghai => "SH",
            Exchange::Shenzhen => "SZ",
            Exchange::Other => "BJ",
        }
    }

    /// Infer the venue from a bare six-digit code.
    pub fn from_code(code: &str) -> Exchange {
        if code.starts_with('6') {
            Exchange::Shanghai
        } else if code.starts_with('0') || code.starts_with('3') {
            Exchange::Shenzhen
        } else {
            Exchange::Other
        }
    }
}

impl FromStr for Exchange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SH" | "SSE" => Ok(Exchange::Shanghai),
            "SZ" | "SZSE" => Ok(Exchange::Shenzhen),
            "BJ" | "BSE" => Ok(Exchange::Other),
            other => anyhow::bail!("unknown exchange: {}", other),
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Split a vendor `ts_code` like `000001.SZ` into `(code, exchange)`.
/// Returns `None` when the suffix is missing or unknown.
pub fn split_ts_code(ts_code: &str) -> Option<(String, Exchange)> {
    let (code, suffix) = ts_code.split_once('.')?;
    if code.is_empty() {
        return None;
    }
    let exchange = Exchange::from_str(suffix).ok()?;
    Some((code.to_string(), exchange))
}

/// Rebuild the exchange-suffixed form used by vendors.
pub fn join_ts_code(code: &str, exchange: Exchange) -> String {
    format!("{}.{}", code, exchange.as_str())
}

/// Daily price limit for a code's board: 10% main board, 20% growth (300)
/// and STAR (688), 30% for the 8-prefixed board.
pub fn daily_limit_pct(code: &str) -> f64 {
    if code.starts_with('8') {
        0.30
    } else if code.starts_with("30") || code.starts_with("68") {
        0.20
    } else {
        0.10
    }
}

/// Today's date on the exchange's clock (UTC+8).
pub fn exchange_today() -> NaiveDate {
    let tz = FixedOffset::east_opt(8 * 3600).expect("fixed offset in range");
    Utc::now().with_timezone(&tz).date_naive()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    pub code: String,
    pub name: String,
    pub exchange: Exchange,
    pub industry: Option<String>,
}

impl Stock {
    /// The exchange-suffixed code, used when talking back to vendors.
    pub fn ts_code(&self) -> String {
        join_ts_code(&self.code, self.exchange)
    }
}

/// One daily OHLCV bar. Volume is in shares, amount in yuan.
/// Immutable once committed for a (code, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub code: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub amount: f64,
}

impl Candle {
    /// Vendor feeds occasionally ship zeroed or inverted bars; those are
    /// dropped at ingestion rather than stored.
    pub fn is_sane(&self) -> bool {
        self.open > 0.0
            && self.close > 0.0
            && self.low > 0.0
            && self.high >= self.open
            && self.high >= self.close
            && self.high >= self.low
            && self.volume >= 0
    }
}

/// Per-day valuation / share-structure snapshot. Vendors routinely omit
/// single fields (e.g. PE for loss-makers), hence everything is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyBasic {
    pub code: String,
    pub trade_date: NaiveDate,
    pub close: Option<f64>,
    pub turnover_rate: Option<f64>,
    pub turnover_rate_f: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub pe: Option<f64>,
    pub pe_ttm: Option<f64>,
    pub pb: Option<f64>,
    pub ps: Option<f64>,
    pub ps_ttm: Option<f64>,
    pub dv_ratio: Option<f64>,
    pub dv_ttm: Option<f64>,
    pub total_share: Option<f64>,
    pub float_share: Option<f64>,
    pub free_share: Option<f64>,
    pub total_mv: Option<f64>,
    pub circ_mv: Option<f64>,
}

/// Net money flow per stock per day, already in yuan.
/// main = large + extra-large order net; retail = small + medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundFlowRow {
    pub code: String,
    pub date: NaiveDate,
    pub main_fund_flow: f64,
    pub retail_fund_flow: f64,
    pub institutional_flow: f64,
    /// Main-flow share of turnover, normalized to [0, 1].
    pub large_order_ratio: f64,
}

/// Whole-market money flow for one trade day (both index levels plus the
/// five order-size buckets).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketMoneyFlow {
    pub trade_date: NaiveDate,
    pub close_sh: f64,
    pub pct_change_sh: f64,
    pub close_sz: f64,
    pub pct_change_sz: f64,
    pub net_amount: f64,
    pub net_amount_rate: f64,
    pub buy_elg_amount: f64,
    pub buy_elg_amount_rate: f64,
    pub buy_lg_amount: f64,
    pub buy_lg_amount_rate: f64,
    pub buy_md_amount: f64,
    pub buy_md_amount_rate: f64,
    pub buy_sm_amount: f64,
    pub buy_sm_amount_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectorMoneyFlow {
    pub trade_date: NaiveDate,
    pub sector_code: String,
    pub name: String,
    pub pct_change: f64,
    pub close: f64,
    pub rank: i64,
    pub net_amount: f64,
    pub net_amount_rate: f64,
    pub buy_elg_amount: f64,
    pub buy_elg_amount_rate: f64,
    pub buy_lg_amount: f64,
    pub buy_lg_amount_rate: f64,
    pub buy_md_amount: f64,
    pub buy_md_amount_rate: f64,
    pub buy_sm_amount: f64,
    pub buy_sm_amount_rate: f64,
}

/// Call-auction close snapshot (the 09:26 reference tick).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionSnapshot {
    pub code: String,
    pub trade_date: NaiveDate,
    pub pre_close: f64,
    pub price: f64,
    pub vol: i64,
    pub amount: f64,
    pub turnover_rate: f64,
    pub volume_ratio: f64,
    pub float_share: f64,
}

impl AuctionSnapshot {
    pub fn change_percent(&self) -> f64 {
        if self.pre_close > 0.0 && self.price > 0.0 {
            (self.price - self.pre_close) / self.pre_close * 100.0
        } else {
            0.0
        }
    }

    /// An auction print above the board's daily limit is a vendor glitch.
    pub fn within_limit(&self) -> bool {
        if self.pre_close <= 0.0 || self.price <= 0.0 {
            return true;
        }
        let limit = daily_limit_pct(&self.code);
        self.price <= self.pre_close * (1.0 + limit) + 1e-6
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingDay {
    pub date: NaiveDate,
    pub is_open: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealtimeQuote {
    pub code: String,
    pub name: String,
    pub price: f64,
    pub pre_close: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: i64,
    pub amount: f64,
    pub change_percent: f64,
}

/// A limit-up concept board for one day (KPL feed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KplConcept {
    pub trade_date: NaiveDate,
    pub ts_code: String,
    pub name: String,
    /// Count of limit-up members.
    pub z_t_num: i64,
    pub up_num: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KplConceptCons {
    pub trade_date: NaiveDate,
    pub ts_code: String,
    pub name: String,
    pub stock_code: String,
    pub hot_num: f64,
}

/// Per-stock indicator snapshot persisted for downstream screens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalIndicatorRow {
    pub code: String,
    pub date: NaiveDate,
    pub ma5: Option<f64>,
    pub ma10: Option<f64>,
    pub ma20: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
    pub rsi: Option<f64>,
    pub volume_ratio: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl CollectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionStatus::Pending => "pending",
            CollectionStatus::Running => "running",
            CollectionStatus::Completed => "completed",
            CollectionStatus::Failed => "failed",
        }
    }
}

impl FromStr for CollectionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CollectionStatus::Pending),
            "running" => Ok(CollectionStatus::Running),
            "completed" => Ok(CollectionStatus::Completed),
            "failed" => Ok(CollectionStatus::Failed),
            other => anyhow::bail!("unknown collection status: {}", other),
        }
    }
}

/// One ingestion run as recorded in `collection_history`. This table is
/// the authoritative cursor for what has been ingested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRun {
    pub id: i64,
    pub collection_type: String,
    pub start_date: String,
    pub end_date: String,
    pub stock_count: i64,
    pub kline_count: i64,
    pub flow_count: i64,
    pub indicator_count: i64,
    pub status: CollectionStatus,
    pub error_message: Option<String>,
    pub elapsed_secs: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

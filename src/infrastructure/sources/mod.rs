//! Vendor adapters and the failover router.
//!
//! Each adapter implements the [`MarketDataSource`] capability set and
//! canonicalizes rows at its own boundary; nothing downstream ever sees
//! vendor units or exchange-suffixed codes. Adapters do not cache; the
//! router owns the TTL cache and the per-source health ledger.

pub mod eastmoney;
pub mod health;
pub mod mock;
pub mod router;
pub mod tushare;

pub use router::SourceRouter;

use crate::domain::errors::SourceResult;
use crate::domain::types::{
    AuctionSnapshot, Candle, DailyBasic, FundFlowRow, KplConcept, KplConceptCons,
    MarketMoneyFlow, RealtimeQuote, SectorMoneyFlow, Stock, TradingDay,
};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Uniform contract over external market data vendors.
///
/// A capability the vendor does not carry returns
/// `Err(SourceError::Unavailable)`. That is a normal answer, and the
/// router moves on to the next adapter. An `Ok(vec![])` means the vendor
/// answered but had no rows (e.g. a non-trading day).
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap, synchronous availability check (credentials present,
    /// endpoint configured). Does not probe the network.
    fn is_available(&self) -> bool;

    async fn stock_list(&self) -> SourceResult<Stock>;

    async fn daily_by_date(&self, date: NaiveDate) -> SourceResult<Candle>;

    async fn daily_by_code(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> SourceResult<Candle>;

    async fn fund_flow_by_date(&self, date: NaiveDate) -> SourceResult<FundFlowRow>;

    async fn daily_basic_by_date(&self, date: NaiveDate) -> SourceResult<DailyBasic>;

    async fn market_moneyflow(&self, date: NaiveDate) -> SourceResult<MarketMoneyFlow>;

    async fn sector_moneyflow(&self, date: NaiveDate) -> SourceResult<SectorMoneyFlow>;

    async fn trade_calendar(&self, start: NaiveDate, end: NaiveDate) -> SourceResult<TradingDay>;

    async fn auction_by_date(
        &self,
        date: NaiveDate,
        code: Option<&str>,
    ) -> SourceResult<AuctionSnapshot>;

    async fn realtime_quotes(&self, codes: Option<&[String]>) -> SourceResult<RealtimeQuote>;

    async fn kpl_concepts(&self, date: NaiveDate) -> SourceResult<KplConcept>;

    async fn kpl_concept_cons(
        &self,
        date: NaiveDate,
        concept: Option<&str>,
    ) -> SourceResult<KplConceptCons>;
}

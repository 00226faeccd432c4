//! Tushare Pro adapter: the primary, token-gated vendor with the full
//! capability surface.
//!
//! The wire protocol is a single POST endpoint taking
//! `{api_name, token, params, fields}` and answering a columnar
//! `{fields: [...], items: [[...], ...]}` payload. All unit conversion
//! happens here: candle volume 手 → shares (×100), candle amount
//! 千元 → yuan (×1000), money flow 万元 → yuan (×10000), percentage
//! rates → fractions.

use super::MarketDataSource;
use crate::domain::errors::{SourceError, SourceResult};
use crate::domain::types::{
    AuctionSnapshot, Candle, DailyBasic, FundFlowRow, KplConcept, KplConceptCons,
    MarketMoneyFlow, RealtimeQuote, SectorMoneyFlow, Stock, TradingDay, split_ts_code,
};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{debug, info, warn};

const DEFAULT_BASE_URL: &str = "http://api.tushare.pro";

pub struct TushareSource {
    client: ClientWithMiddleware,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    code: i64,
    msg: Option<String>,
    data: Option<ApiData>,
}

#[derive(Deserialize)]
struct ApiData {
    fields: Vec<String>,
    items: Vec<Vec<Value>>,
}

/// Columnar result set with by-name field access.
struct Table {
    index: HashMap<String, usize>,
    items: Vec<Vec<Value>>,
}

impl Table {
    fn get<'a>(&self, row: &'a [Value], field: &str) -> Option<&'a Value> {
        self.index.get(field).and_then(|&i| row.get(i))
    }

    fn str(&self, row: &[Value], field: &str) -> Option<String> {
        match self.get(row, field) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    fn f64(&self, row: &[Value], field: &str) -> Option<f64> {
        match self.get(row, field) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }

    fn i64(&self, row: &[Value], field: &str) -> Option<i64> {
        self.f64(row, field).map(|v| v as i64)
    }

    fn date(&self, row: &[Value], field: &str) -> Option<NaiveDate> {
        let raw = self.str(row, field)?;
        parse_vendor_date(&raw)
    }
}

/// Tushare dates come back compact (`20240115`); a few endpoints return
/// ISO strings.
fn parse_vendor_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(&raw[..raw.len().min(10)], "%Y-%m-%d"))
        .ok()
}

fn compact(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

impl TushareSource {
    pub fn new(token: String) -> Self {
        Self::with_base_url(token, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(token: String, base_url: String) -> Self {
        if token.is_empty() {
            warn!("Tushare token not configured; primary source disabled");
        } else {
            info!("Tushare client initialized");
        }
        Self {
            client: HttpClientFactory::create_client(),
            base_url,
            token,
        }
    }

    async fn call(&self, api_name: &str, params: Value, fields: &str) -> Result<Table, SourceError> {
        if !self.is_available() {
            return Err(SourceError::Unavailable("tushare token missing".into()));
        }

        let body = json!({
            "api_name": api_name,
            "token": self.token,
            "params": params,
            "fields": fields,
        });

        let response = self
            .client
            .post(&self.base_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SourceError::Io(format!("tushare request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(SourceError::RateLimited(format!("http {}", status)));
        }
        if !status.is_success() {
            return Err(SourceError::Io(format!("tushare http status {}", status)));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Format(format!("tushare response not json: {}", e)))?;

        if parsed.code != 0 {
            let msg = parsed.msg.unwrap_or_default();
            // Quota errors carry a per-minute limit hint in the message.
            if msg.contains("每分钟") || msg.contains("频率") || msg.contains("限制") {
                return Err(SourceError::RateLimited(msg));
            }
            return Err(SourceError::Io(format!(
                "tushare api {} error {}: {}",
                api_name, parsed.code, msg
            )));
        }

        let data = parsed
            .data
            .ok_or_else(|| SourceError::Format("tushare response missing data".into()))?;

        debug!(
            "tushare {} returned {} rows",
            api_name,
            data.items.len()
        );

        let index = data
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.clone(), i))
            .collect();
        Ok(Table {
            index,
            items: data.items,
        })
    }
}

#[async_trait]
impl MarketDataSource for TushareSource {
    fn name(&self) -> &'static str {
        "tushare"
    }

    fn is_available(&self) -> bool {
        !self.token.is_empty()
    }

    async fn stock_list(&self) -> SourceResult<Stock> {
        let table = self
            .call(
                "stock_basic",
                json!({"list_status": "L"}),
                "ts_code,symbol,name,area,industry,market,exchange,list_date",
            )
            .await?;

        let mut stocks = Vec::with_capacity(table.items.len());
        let mut dropped = 0usize;
        for row in &table.items {
            let Some(ts_code) = table.str(row, "ts_code") else {
                dropped += 1;
                continue;
            };
            let Some((code, exchange)) = split_ts_code(&ts_code) else {
                dropped += 1;
                continue;
            };
            stocks.push(Stock {
                code,
                name: table.str(row, "name").unwrap_or_default(),
                exchange,
                industry: table.str(row, "industry").filter(|s| !s.is_empty()),
            });
        }
        if dropped > 0 {
            warn!("stock_basic: dropped {} malformed rows", dropped);
        }
        Ok(stocks)
    }

    async fn daily_by_date(&self, date: NaiveDate) -> SourceResult<Candle> {
        let table = self
            .call(
                "daily",
                json!({"trade_date": compact(date)}),
                "ts_code,trade_date,open,high,low,close,vol,amount",
            )
            .await?;
        Ok(map_candles(&table))
    }

    async fn daily_by_code(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> SourceResult<Candle> {
        let ts_code = infer_ts_code(code);
        let table = self
            .call(
                "daily",
                json!({
                    "ts_code": ts_code,
                    "start_date": compact(start),
                    "end_date": compact(end),
                }),
                "ts_code,trade_date,open,high,low,close,vol,amount",
            )
            .await?;
        let mut candles = map_candles(&table);
        candles.sort_by_key(|c| c.date);
        Ok(candles)
    }

    async fn fund_flow_by_date(&self, date: NaiveDate) -> SourceResult<FundFlowRow> {
        // Eastmoney-sourced per-stock flow; amounts arrive in 万元.
        let table = self
            .call(
                "moneyflow_dc",
                json!({"trade_date": compact(date)}),
                "ts_code,trade_date,net_amount,net_amount_rate,buy_elg_amount,buy_lg_amount,buy_md_amount,buy_sm_amount",
            )
            .await?;

        let mut rows = Vec::with_capacity(table.items.len());
        for row in &table.items {
            let Some(ts_code) = table.str(row, "ts_code") else {
                continue;
            };
            let Some((code, _)) = split_ts_code(&ts_code) else {
                continue;
            };
            let Some(trade_date) = table.date(row, "trade_date") else {
                continue;
            };

            let wan = 10_000.0;
            let main = table.f64(row, "net_amount").unwrap_or(0.0) * wan;
            let retail = (table.f64(row, "buy_md_amount").unwrap_or(0.0)
                + table.f64(row, "buy_sm_amount").unwrap_or(0.0))
                * wan;
            let institutional = (table.f64(row, "buy_elg_amount").unwrap_or(0.0)
                + table.f64(row, "buy_lg_amount").unwrap_or(0.0))
                * wan;
            let ratio = (table.f64(row, "net_amount_rate").unwrap_or(0.0) / 100.0)
                .clamp(0.0, 1.0);

            rows.push(FundFlowRow {
                code,
                date: trade_date,
                main_fund_flow: main,
                retail_fund_flow: retail,
                institutional_flow: institutional,
                large_order_ratio: (ratio * 10_000.0).round() / 10_000.0,
            });
        }
        Ok(rows)
    }

    async fn daily_basic_by_date(&self, date: NaiveDate) -> SourceResult<DailyBasic> {
        let table = self
            .call(
                "daily_basic",
                json!({"trade_date": compact(date)}),
                "ts_code,trade_date,close,turnover_rate,turnover_rate_f,volume_ratio,\
                 pe,pe_ttm,pb,ps,ps_ttm,dv_ratio,dv_ttm,\
                 total_share,float_share,free_share,total_mv,circ_mv",
            )
            .await?;

        let mut rows = Vec::with_capacity(table.items.len());
        for row in &table.items {
            let Some(ts_code) = table.str(row, "ts_code") else {
                continue;
            };
            let Some((code, _)) = split_ts_code(&ts_code) else {
                continue;
            };
            let Some(trade_date) = table.date(row, "trade_date") else {
                continue;
            };
            rows.push(DailyBasic {
                code,
                trade_date,
                close: table.f64(row, "close"),
                turnover_rate: table.f64(row, "turnover_rate"),
                turnover_rate_f: table.f64(row, "turnover_rate_f"),
                volume_ratio: table.f64(row, "volume_ratio"),
                pe: table.f64(row, "pe"),
                pe_ttm: table.f64(row, "pe_ttm"),
                pb: table.f64(row, "pb"),
                ps: table.f64(row, "ps"),
                ps_ttm: table.f64(row, "ps_ttm"),
                dv_ratio: table.f64(row, "dv_ratio"),
                dv_ttm: table.f64(row, "dv_ttm"),
                total_share: table.f64(row, "total_share"),
                float_share: table.f64(row, "float_share"),
                free_share: table.f64(row, "free_share"),
                total_mv: table.f64(row, "total_mv"),
                circ_mv: table.f64(row, "circ_mv"),
            });
        }
        Ok(rows)
    }

    async fn market_moneyflow(&self, date: NaiveDate) -> SourceResult<MarketMoneyFlow> {
        let table = self
            .call(
                "moneyflow_mkt_dc",
                json!({"trade_date": compact(date)}),
                "trade_date,close_sh,pct_change_sh,close_sz,pct_change_sz,\
                 net_amount,net_amount_rate,buy_elg_amount,buy_elg_amount_rate,\
                 buy_lg_amount,buy_lg_amount_rate,buy_md_amount,buy_md_amount_rate,\
                 buy_sm_amount,buy_sm_amount_rate",
            )
            .await?;

        let mut rows = Vec::with_capacity(table.items.len());
        for row in &table.items {
            let Some(trade_date) = table.date(row, "trade_date") else {
                continue;
            };
            rows.push(MarketMoneyFlow {
                trade_date,
                close_sh: table.f64(row, "close_sh").unwrap_or(0.0),
                pct_change_sh: table.f64(row, "pct_change_sh").unwrap_or(0.0),
                close_sz: table.f64(row, "close_sz").unwrap_or(0.0),
                pct_change_sz: table.f64(row, "pct_change_sz").unwrap_or(0.0),
                net_amount: table.f64(row, "net_amount").unwrap_or(0.0),
                net_amount_rate: table.f64(row, "net_amount_rate").unwrap_or(0.0),
                buy_elg_amount: table.f64(row, "buy_elg_amount").unwrap_or(0.0),
                buy_elg_amount_rate: table.f64(row, "buy_elg_amount_rate").unwrap_or(0.0),
                buy_lg_amount: table.f64(row, "buy_lg_amount").unwrap_or(0.0),
                buy_lg_amount_rate: table.f64(row, "buy_lg_amount_rate").unwrap_or(0.0),
                buy_md_amount: table.f64(row, "buy_md_amount").unwrap_or(0.0),
                buy_md_amount_rate: table.f64(row, "buy_md_amount_rate").unwrap_or(0.0),
                buy_sm_amount: table.f64(row, "buy_sm_amount").unwrap_or(0.0),
                buy_sm_amount_rate: table.f64(row, "buy_sm_amount_rate").unwrap_or(0.0),
            });
        }
        Ok(rows)
    }

    async fn sector_moneyflow(&self, date: NaiveDate) -> SourceResult<SectorMoneyFlow> {
        let table = self
            .call(
                "moneyflow_ind_dc",
                json!({"trade_date": compact(date)}),
                "trade_date,ts_code,name,pct_change,close,rank,\
                 net_amount,net_amount_rate,buy_elg_amount,buy_elg_amount_rate,\
                 buy_lg_amount,buy_lg_amount_rate,buy_md_amount,buy_md_amount_rate,\
                 buy_sm_amount,buy_sm_amount_rate",
            )
            .await?;

        let mut rows = Vec::with_capacity(table.items.len());
        for row in &table.items {
            let Some(trade_date) = table.date(row, "trade_date") else {
                continue;
            };
            let Some(sector_code) = table.str(row, "ts_code") else {
                continue;
            };
            rows.push(SectorMoneyFlow {
                trade_date,
                sector_code,
                name: table.str(row, "name").unwrap_or_default(),
                pct_change: table.f64(row, "pct_change").unwrap_or(0.0),
                close: table.f64(row, "close").unwrap_or(0.0),
                rank: table.i64(row, "rank").unwrap_or(0),
                net_amount: table.f64(row, "net_amount").unwrap_or(0.0),
                net_amount_rate: table.f64(row, "net_amount_rate").unwrap_or(0.0),
                buy_elg_amount: table.f64(row, "buy_elg_amount").unwrap_or(0.0),
                buy_elg_amount_rate: table.f64(row, "buy_elg_amount_rate").unwrap_or(0.0),
                buy_lg_amount: table.f64(row, "buy_lg_amount").unwrap_or(0.0),
                buy_lg_amount_rate: table.f64(row, "buy_lg_amount_rate").unwrap_or(0.0),
                buy_md_amount: table.f64(row, "buy_md_amount").unwrap_or(0.0),
                buy_md_amount_rate: table.f64(row, "buy_md_amount_rate").unwrap_or(0.0),
                buy_sm_amount: table.f64(row, "buy_sm_amount").unwrap_or(0.0),
                buy_sm_amount_rate: table.f64(row, "buy_sm_amount_rate").unwrap_or(0.0),
            });
        }
        Ok(rows)
    }

    async fn trade_calendar(&self, start: NaiveDate, end: NaiveDate) -> SourceResult<TradingDay> {
        let table = self
            .call(
                "trade_cal",
                json!({
                    "exchange": "SSE",
                    "start_date": compact(start),
                    "end_date": compact(end),
                }),
                "cal_date,is_open",
            )
            .await?;

        let mut days = Vec::with_capacity(table.items.len());
        for row in &table.items {
            let Some(date) = table.date(row, "cal_date") else {
                continue;
            };
            days.push(TradingDay {
                date,
                is_open: table.i64(row, "is_open").unwrap_or(0) == 1,
            });
        }
        days.sort_by_key(|d| d.date);
        Ok(days)
    }

    async fn auction_by_date(
        &self,
        date: NaiveDate,
        code: Option<&str>,
    ) -> SourceResult<AuctionSnapshot> {
        let mut params = json!({"trade_date": compact(date)});
        if let Some(code) = code {
            params["ts_code"] = Value::String(infer_ts_code(code));
        }
        let table = self
            .call(
                "stk_auction",
                params,
                "ts_code,trade_date,vol,price,amount,pre_close,turnover_rate,volume_ratio,float_share",
            )
            .await?;

        let mut snaps = Vec::with_capacity(table.items.len());
        for row in &table.items {
            let Some(ts_code) = table.str(row, "ts_code") else {
                continue;
            };
            let Some((code, _)) = split_ts_code(&ts_code) else {
                continue;
            };
            let Some(trade_date) = table.date(row, "trade_date") else {
                continue;
            };
            snaps.push(AuctionSnapshot {
                code,
                trade_date,
                pre_close: table.f64(row, "pre_close").unwrap_or(0.0),
                price: table.f64(row, "price").unwrap_or(0.0),
                vol: table.i64(row, "vol").unwrap_or(0),
                amount: table.f64(row, "amount").unwrap_or(0.0),
                turnover_rate: table.f64(row, "turnover_rate").unwrap_or(0.0),
                volume_ratio: table.f64(row, "volume_ratio").unwrap_or(0.0),
                float_share: table.f64(row, "float_share").unwrap_or(0.0),
            });
        }
        Ok(snaps)
    }

    async fn realtime_quotes(&self, codes: Option<&[String]>) -> SourceResult<RealtimeQuote> {
        let codes: Vec<String> = match codes {
            Some(list) if !list.is_empty() => {
                list.iter().map(|c| infer_ts_code(c)).collect()
            }
            _ => {
                let stocks = self.stock_list().await?;
                stocks.iter().map(|s| s.ts_code()).collect()
            }
        };

        // The quote endpoint caps the batch size; chunk like the web client.
        let mut quotes = Vec::new();
        for chunk in codes.chunks(50) {
            let table = self
                .call(
                    "realtime_quote",
                    json!({"ts_code": chunk.join(",")}),
                    "ts_code,name,price,pre_close,open,high,low,vol,amount",
                )
                .await?;
            for row in &table.items {
                let Some(ts_code) = table.str(row, "ts_code") else {
                    continue;
                };
                let Some((code, _)) = split_ts_code(&ts_code) else {
                    continue;
                };
                let price = table.f64(row, "price").unwrap_or(0.0);
                let pre_close = table.f64(row, "pre_close").unwrap_or(0.0);
                let change_percent = if pre_close > 0.0 {
                    (price - pre_close) / pre_close * 100.0
                } else {
                    0.0
                };
                quotes.push(RealtimeQuote {
                    code,
                    name: table.str(row, "name").unwrap_or_default(),
                    price,
                    pre_close,
                    open: table.f64(row, "open").unwrap_or(0.0),
                    high: table.f64(row, "high").unwrap_or(0.0),
                    low: table.f64(row, "low").unwrap_or(0.0),
                    volume: table.i64(row, "vol").unwrap_or(0),
                    amount: table.f64(row, "amount").unwrap_or(0.0),
                    change_percent,
                });
            }
        }
        Ok(quotes)
    }

    async fn kpl_concepts(&self, date: NaiveDate) -> SourceResult<KplConcept> {
        let table = self
            .call(
                "kpl_concept",
                json!({"trade_date": compact(date)}),
                "trade_date,ts_code,name,z_t_num,up_num",
            )
            .await?;

        let mut concepts = Vec::with_capacity(table.items.len());
        for row in &table.items {
            let Some(trade_date) = table.date(row, "trade_date") else {
                continue;
            };
            let Some(ts_code) = table.str(row, "ts_code") else {
                continue;
            };
            concepts.push(KplConcept {
                trade_date,
                ts_code,
                name: table.str(row, "name").unwrap_or_default(),
                z_t_num: table.i64(row, "z_t_num").unwrap_or(0),
                up_num: table.str(row, "up_num").unwrap_or_default(),
            });
        }
        Ok(concepts)
    }

    async fn kpl_concept_cons(
        &self,
        date: NaiveDate,
        concept: Option<&str>,
    ) -> SourceResult<KplConceptCons> {
        let mut params = json!({"trade_date": compact(date)});
        if let Some(concept) = concept {
            params["ts_code"] = Value::String(concept.to_string());
        }
        let table = self
            .call(
                "kpl_concept_cons",
                params,
                "trade_date,ts_code,name,con_code,con_name,hot_num",
            )
            .await?;

        let mut members = Vec::with_capacity(table.items.len());
        for row in &table.items {
            let Some(trade_date) = table.date(row, "trade_date") else {
                continue;
            };
            let Some(ts_code) = table.str(row, "ts_code") else {
                continue;
            };
            let Some(con_code) = table.str(row, "con_code") else {
                continue;
            };
            let stock_code = split_ts_code(&con_code)
                .map(|(code, _)| code)
                .unwrap_or(con_code);
            members.push(KplConceptCons {
                trade_date,
                ts_code,
                name: table.str(row, "name").unwrap_or_default(),
                stock_code,
                hot_num: table.f64(row, "hot_num").unwrap_or(0.0),
            });
        }
        Ok(members)
    }
}

/// Candle mapping shared by the by-date and by-code pulls.
/// Vendor volume is in 手, amount in 千元.
fn map_candles(table: &Table) -> Vec<Candle> {
    let mut candles = Vec::with_capacity(table.items.len());
    for row in &table.items {
        let Some(ts_code) = table.str(row, "ts_code") else {
            continue;
        };
        let Some((code, _)) = split_ts_code(&ts_code) else {
            continue;
        };
        let Some(date) = table.date(row, "trade_date") else {
            continue;
        };
        candles.push(Candle {
            code,
            date,
            open: table.f64(row, "open").unwrap_or(0.0),
            high: table.f64(row, "high").unwrap_or(0.0),
            low: table.f64(row, "low").unwrap_or(0.0),
            close: table.f64(row, "close").unwrap_or(0.0),
            volume: (table.f64(row, "vol").unwrap_or(0.0) * 100.0) as i64,
            amount: table.f64(row, "amount").unwrap_or(0.0) * 1000.0,
        });
    }
    candles
}

/// Bare code → exchange-suffixed form, by listing-prefix convention.
fn infer_ts_code(code: &str) -> String {
    if code.contains('.') {
        return code.to_string();
    }
    let suffix = if code.starts_with('6') { "SH" } else { "SZ" };
    format!("{}.{}", code, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(fields: &[&str], items: Vec<Vec<Value>>) -> Table {
        Table {
            index: fields
                .iter()
                .enumerate()
                .map(|(i, f)| (f.to_string(), i))
                .collect(),
            items,
        }
    }

    #[test]
    fn test_candle_unit_conversion() {
        let t = table(
            &[
                "ts_code",
                "trade_date",
                "open",
                "high",
                "low",
                "close",
                "vol",
                "amount",
            ],
            vec![vec![
                json!("000001.SZ"),
                json!("20240115"),
                json!(10.0),
                json!(10.5),
                json!(9.9),
                json!(10.3),
                json!(250_000.0), // 手
                json!(257_500.0), // 千元
            ]],
        );
        let candles = map_candles(&t);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].code, "000001");
        assert_eq!(candles[0].volume, 25_000_000); // shares
        assert_eq!(candles[0].amount, 257_500_000.0); // yuan
        assert_eq!(
            candles[0].date,
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
    }

    #[test]
    fn test_malformed_rows_are_dropped() {
        let t = table(
            &[
                "ts_code",
                "trade_date",
                "open",
                "high",
                "low",
                "close",
                "vol",
                "amount",
            ],
            vec![
                vec![
                    json!("600519.SH"),
                    json!("20240115"),
                    json!(1680.0),
                    json!(1700.0),
                    json!(1670.0),
                    json!(1698.0),
                    json!(20_000.0),
                    json!(3_390_000.0),
                ],
                // ts_code without exchange suffix: dropped, batch continues.
                vec![
                    json!("600519"),
                    json!("20240115"),
                    json!(1.0),
                    json!(1.0),
                    json!(1.0),
                    json!(1.0),
                    json!(1.0),
                    json!(1.0),
                ],
            ],
        );
        assert_eq!(map_candles(&t).len(), 1);
    }

    #[test]
    fn test_vendor_date_formats() {
        assert_eq!(
            parse_vendor_date("20240115"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(
            parse_vendor_date("2024-01-15"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(
            parse_vendor_date("2024-01-15T00:00:00"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(parse_vendor_date("garbage"), None);
    }

    #[test]
    fn test_infer_ts_code() {
        assert_eq!(infer_ts_code("600519"), "600519.SH");
        assert_eq!(infer_ts_code("000001"), "000001.SZ");
        assert_eq!(infer_ts_code("300750"), "300750.SZ");
        assert_eq!(infer_ts_code("000001.SZ"), "000001.SZ");
    }

    #[test]
    fn test_unavailable_without_token() {
        let source = TushareSource::new(String::new());
        assert!(!source.is_available());
    }
}

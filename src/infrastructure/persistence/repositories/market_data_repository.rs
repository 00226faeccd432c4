//! Keyed upserts and range reads for the market data tables: stocks,
//! klines, daily_basic, fund_flow, market/sector money flow, auction
//! snapshots and KPL concepts. All batch writes run in one transaction;
//! every write is idempotent under the primary key.

use crate::domain::types::{
    AuctionSnapshot, Candle, DailyBasic, Exchange, FundFlowRow, KplConcept, KplConceptCons,
    MarketMoneyFlow, SectorMoneyFlow, Stock, TechnicalIndicatorRow,
};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::debug;

#[derive(Clone)]
pub struct MarketDataRepository {
    pool: SqlitePool,
}

impl MarketDataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ---- stocks ----

    pub async fn upsert_stocks(&self, stocks: &[Stock]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for stock in stocks {
            sqlx::query(
                r#"
                INSERT INTO stocks (code, name, exchange, industry, updated_at)
                VALUES (?, ?, ?, ?, datetime('now'))
                ON CONFLICT(code) DO UPDATE SET
                    name = excluded.name,
                    exchange = excluded.exchange,
                    industry = excluded.industry,
                    updated_at = datetime('now')
                "#,
            )
            .bind(&stock.code)
            .bind(&stock.name)
            .bind(stock.exchange.as_str())
            .bind(&stock.industry)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert stock")?;
        }
        tx.commit().await?;
        Ok(stocks.len() as u64)
    }

    pub async fn stock_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM stocks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    pub async fn get_stock(&self, code: &str) -> Result<Option<Stock>> {
        let row = sqlx::query("SELECT code, name, exchange, industry FROM stocks WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::map_stock(&r)).transpose()
    }

    fn map_stock(row: &sqlx::sqlite::SqliteRow) -> Result<Stock> {
        let exchange_str: String = row.try_get("exchange")?;
        let industry: Option<String> = row.try_get("industry")?;
        Ok(Stock {
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            exchange: Exchange::from_str(&exchange_str).unwrap_or(Exchange::Other),
            industry: industry.filter(|s| !s.is_empty()),
        })
    }

    // ---- klines ----

    pub async fn upsert_candles(&self, candles: &[Candle]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for candle in candles {
            sqlx::query(
                r#"
                INSERT INTO klines (stock_code, date, open, high, low, close, volume, amount)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(stock_code, date) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    amount = excluded.amount
                "#,
            )
            .bind(&candle.code)
            .bind(candle.date)
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume)
            .bind(candle.amount)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert candle")?;
        }
        tx.commit().await?;
        debug!("Upserted {} candle rows", candles.len());
        Ok(candles.len() as u64)
    }

    /// The most recent `limit` candles for one stock, ascending by date.
    pub async fn recent_candles(&self, code: &str, limit: i64) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
            SELECT stock_code, date, open, high, low, close, volume, amount
            FROM klines WHERE stock_code = ?
            ORDER BY date DESC LIMIT ?
            "#,
        )
        .bind(code)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut candles = rows
            .iter()
            .map(Self::map_candle)
            .collect::<Result<Vec<_>>>()?;
        candles.reverse();
        Ok(candles)
    }

    fn map_candle(row: &sqlx::sqlite::SqliteRow) -> Result<Candle> {
        Ok(Candle {
            code: row.try_get("stock_code")?,
            date: row.try_get("date")?,
            open: row.try_get("open")?,
            high: row.try_get("high")?,
            low: row.try_get("low")?,
            close: row.try_get("close")?,
            volume: row.try_get("volume")?,
            amount: row.try_get("amount")?,
        })
    }

    pub async fn candle_count_on(&self, date: NaiveDate) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM klines WHERE date = ?")
            .bind(date)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    pub async fn candle_count_total(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM klines")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    pub async fn max_candle_date(&self) -> Result<Option<NaiveDate>> {
        let row = sqlx::query("SELECT MAX(date) as max_date FROM klines")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("max_date")?)
    }

    pub async fn distinct_candle_days(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(DISTINCT date) as count FROM klines")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    /// Stocks with at least `required_days` candle rows since `cutoff`,
    /// industry-bearing names first. This is the selection universe.
    pub async fn universe(
        &self,
        cutoff: NaiveDate,
        required_days: i64,
        limit: i64,
    ) -> Result<Vec<Stock>> {
        let rows = sqlx::query(
            r#"
            SELECT s.code, s.name, s.exchange, s.industry
            FROM stocks s
            WHERE EXISTS (
                SELECT 1 FROM klines k
                WHERE k.stock_code = s.code
                AND k.date >= ?
                GROUP BY k.stock_code
                HAVING COUNT(*) >= ?
            )
            ORDER BY
                CASE
                    WHEN s.industry IS NOT NULL AND s.industry != '' THEN 0
                    ELSE 1
                END,
                s.code
            LIMIT ?
            "#,
        )
        .bind(cutoff)
        .bind(required_days)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_stock).collect()
    }

    // ---- daily_basic ----

    pub async fn upsert_daily_basic(&self, rows: &[DailyBasic]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for basic in rows {
            sqlx::query(
                r#"
                INSERT INTO daily_basic (
                    stock_code, trade_date, close, turnover_rate, turnover_rate_f,
                    volume_ratio, pe, pe_ttm, pb, ps, ps_ttm, dv_ratio, dv_ttm,
                    total_share, float_share, free_share, total_mv, circ_mv
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(stock_code, trade_date) DO UPDATE SET
                    close = excluded.close,
                    turnover_rate = excluded.turnover_rate,
                    turnover_rate_f = excluded.turnover_rate_f,
                    volume_ratio = excluded.volume_ratio,
                    pe = excluded.pe,
                    pe_ttm = excluded.pe_ttm,
                    pb = excluded.pb,
                    ps = excluded.ps,
                    ps_ttm = excluded.ps_ttm,
                    dv_ratio = excluded.dv_ratio,
                    dv_ttm = excluded.dv_ttm,
                    total_share = excluded.total_share,
                    float_share = excluded.float_share,
                    free_share = excluded.free_share,
                    total_mv = excluded.total_mv,
                    circ_mv = excluded.circ_mv
                "#,
            )
            .bind(&basic.code)
            .bind(basic.trade_date)
            .bind(basic.close)
            .bind(basic.turnover_rate)
            .bind(basic.turnover_rate_f)
            .bind(basic.volume_ratio)
            .bind(basic.pe)
            .bind(basic.pe_ttm)
            .bind(basic.pb)
            .bind(basic.ps)
            .bind(basic.ps_ttm)
            .bind(basic.dv_ratio)
            .bind(basic.dv_ttm)
            .bind(basic.total_share)
            .bind(basic.float_share)
            .bind(basic.free_share)
            .bind(basic.total_mv)
            .bind(basic.circ_mv)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert daily_basic row")?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    pub async fn latest_daily_basic(&self, code: &str) -> Result<Option<DailyBasic>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM daily_basic
            WHERE stock_code = ?
            ORDER BY trade_date DESC
            LIMIT 1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Self::map_daily_basic(&r)).transpose()
    }

    fn map_daily_basic(row: &sqlx::sqlite::SqliteRow) -> Result<DailyBasic> {
        Ok(DailyBasic {
            code: row.try_get("stock_code")?,
            trade_date: row.try_get("trade_date")?,
            close: row.try_get("close")?,
            turnover_rate: row.try_get("turnover_rate")?,
            turnover_rate_f: row.try_get("turnover_rate_f")?,
            volume_ratio: row.try_get("volume_ratio")?,
            pe: row.try_get("pe")?,
            pe_ttm: row.try_get("pe_ttm")?,
            pb: row.try_get("pb")?,
            ps: row.try_get("ps")?,
            ps_ttm: row.try_get("ps_ttm")?,
            dv_ratio: row.try_get("dv_ratio")?,
            dv_ttm: row.try_get("dv_ttm")?,
            total_share: row.try_get("total_share")?,
            float_share: row.try_get("float_share")?,
            free_share: row.try_get("free_share")?,
            total_mv: row.try_get("total_mv")?,
            circ_mv: row.try_get("circ_mv")?,
        })
    }

    /// Partial upsert from an auction snapshot: fill turnover_rate,
    /// volume_ratio and float_share only where the stored value is
    /// NULL or zero. Valuation columns written by the daily_basic pull
    /// must never be clobbered by the auction path.
    pub async fn apply_auction_basic(&self, snap: &AuctionSnapshot) -> Result<()> {
        if snap.turnover_rate <= 0.0 && snap.volume_ratio <= 0.0 && snap.float_share <= 0.0 {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO daily_basic (
                stock_code, trade_date, turnover_rate, volume_ratio, float_share
            ) VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(stock_code, trade_date) DO UPDATE SET
                turnover_rate = CASE
                    WHEN excluded.turnover_rate > 0
                         AND IFNULL(daily_basic.turnover_rate, 0) = 0
                    THEN excluded.turnover_rate
                    ELSE daily_basic.turnover_rate
                END,
                volume_ratio = CASE
                    WHEN excluded.volume_ratio > 0
                         AND IFNULL(daily_basic.volume_ratio, 0) = 0
                    THEN excluded.volume_ratio
                    ELSE daily_basic.volume_ratio
                END,
                float_share = CASE
                    WHEN excluded.float_share > 0
                         AND IFNULL(daily_basic.float_share, 0) = 0
                    THEN excluded.float_share
                    ELSE daily_basic.float_share
                END
            "#,
        )
        .bind(&snap.code)
        .bind(snap.trade_date)
        .bind(snap.turnover_rate)
        .bind(snap.volume_ratio)
        .bind(snap.float_share)
        .execute(&self.pool)
        .await
        .context("Failed to apply auction fields to daily_basic")?;
        Ok(())
    }

    // ---- fund_flow ----

    pub async fn upsert_fund_flow(&self, rows: &[FundFlowRow]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for flow in rows {
            sqlx::query(
                r#"
                INSERT INTO fund_flow (
                    stock_code, date, main_fund_flow, retail_fund_flow,
                    institutional_flow, large_order_ratio
                ) VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(stock_code, date) DO UPDATE SET
                    main_fund_flow = excluded.main_fund_flow,
                    retail_fund_flow = excluded.retail_fund_flow,
                    institutional_flow = excluded.institutional_flow,
                    large_order_ratio = excluded.large_order_ratio
                "#,
            )
            .bind(&flow.code)
            .bind(flow.date)
            .bind(flow.main_fund_flow)
            .bind(flow.retail_fund_flow)
            .bind(flow.institutional_flow)
            .bind(flow.large_order_ratio)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert fund_flow row")?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    pub async fn fund_flow_count_total(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM fund_flow")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    // ---- market / sector money flow ----

    pub async fn upsert_market_moneyflow(&self, rows: &[MarketMoneyFlow]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for flow in rows {
            sqlx::query(
                r#"
                INSERT INTO market_moneyflow (
                    trade_date, close_sh, pct_change_sh, close_sz, pct_change_sz,
                    net_amount, net_amount_rate, buy_elg_amount, buy_elg_amount_rate,
                    buy_lg_amount, buy_lg_amount_rate, buy_md_amount, buy_md_amount_rate,
                    buy_sm_amount, buy_sm_amount_rate, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
                ON CONFLICT(trade_date) DO UPDATE SET
                    close_sh = excluded.close_sh,
                    pct_change_sh = excluded.pct_change_sh,
                    close_sz = excluded.close_sz,
                    pct_change_sz = excluded.pct_change_sz,
                    net_amount = excluded.net_amount,
                    net_amount_rate = excluded.net_amount_rate,
                    buy_elg_amount = excluded.buy_elg_amount,
                    buy_elg_amount_rate = excluded.buy_elg_amount_rate,
                    buy_lg_amount = excluded.buy_lg_amount,
                    buy_lg_amount_rate = excluded.buy_lg_amount_rate,
                    buy_md_amount = excluded.buy_md_amount,
                    buy_md_amount_rate = excluded.buy_md_amount_rate,
                    buy_sm_amount = excluded.buy_sm_amount,
                    buy_sm_amount_rate = excluded.buy_sm_amount_rate,
                    updated_at = datetime('now')
                "#,
            )
            .bind(flow.trade_date)
            .bind(flow.close_sh)
            .bind(flow.pct_change_sh)
            .bind(flow.close_sz)
            .bind(flow.pct_change_sz)
            .bind(flow.net_amount)
            .bind(flow.net_amount_rate)
            .bind(flow.buy_elg_amount)
            .bind(flow.buy_elg_amount_rate)
            .bind(flow.buy_lg_amount)
            .bind(flow.buy_lg_amount_rate)
            .bind(flow.buy_md_amount)
            .bind(flow.buy_md_amount_rate)
            .bind(flow.buy_sm_amount)
            .bind(flow.buy_sm_amount_rate)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert market_moneyflow row")?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    pub async fn market_moneyflow_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM market_moneyflow")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    pub async fn upsert_sector_moneyflow(&self, rows: &[SectorMoneyFlow]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for flow in rows {
            sqlx::query(
                r#"
                INSERT INTO sector_moneyflow (
                    trade_date, sector_code, name, pct_change, close, rank,
                    net_amount, net_amount_rate, buy_elg_amount, buy_elg_amount_rate,
                    buy_lg_amount, buy_lg_amount_rate, buy_md_amount, buy_md_amount_rate,
                    buy_sm_amount, buy_sm_amount_rate
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(trade_date, sector_code) DO UPDATE SET
                    name = excluded.name,
                    pct_change = excluded.pct_change,
                    close = excluded.close,
                    rank = excluded.rank,
                    net_amount = excluded.net_amount,
                    net_amount_rate = excluded.net_amount_rate,
                    buy_elg_amount = excluded.buy_elg_amount,
                    buy_elg_amount_rate = excluded.buy_elg_amount_rate,
                    buy_lg_amount = excluded.buy_lg_amount,
                    buy_lg_amount_rate = excluded.buy_lg_amount_rate,
                    buy_md_amount = excluded.buy_md_amount,
                    buy_md_amount_rate = excluded.buy_md_amount_rate,
                    buy_sm_amount = excluded.buy_sm_amount,
                    buy_sm_amount_rate = excluded.buy_sm_amount_rate
                "#,
            )
            .bind(flow.trade_date)
            .bind(&flow.sector_code)
            .bind(&flow.name)
            .bind(flow.pct_change)
            .bind(flow.close)
            .bind(flow.rank)
            .bind(flow.net_amount)
            .bind(flow.net_amount_rate)
            .bind(flow.buy_elg_amount)
            .bind(flow.buy_elg_amount_rate)
            .bind(flow.buy_lg_amount)
            .bind(flow.buy_lg_amount_rate)
            .bind(flow.buy_md_amount)
            .bind(flow.buy_md_amount_rate)
            .bind(flow.buy_sm_amount)
            .bind(flow.buy_sm_amount_rate)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert sector_moneyflow row")?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    // ---- auction snapshots (quote_history @ 09:26) ----

    /// When `force`, wipe every snapshot in the call-auction window
    /// [09:20, 09:30); otherwise remove exactly the 09:26 snapshot so a
    /// re-run replaces its own rows.
    pub async fn clear_auction_window(&self, date: NaiveDate, force: bool) -> Result<u64> {
        let result = if force {
            sqlx::query(
                "DELETE FROM quote_history WHERE snapshot_time >= ? AND snapshot_time < ?",
            )
            .bind(format!("{} 09:20:00", date))
            .bind(format!("{} 09:30:00", date))
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query("DELETE FROM quote_history WHERE snapshot_time = ?")
                .bind(format!("{} 09:26:00", date))
                .execute(&self.pool)
                .await?
        };
        Ok(result.rows_affected())
    }

    pub async fn insert_auction_snapshots(&self, snaps: &[AuctionSnapshot]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for snap in snaps {
            // price doubles as open/high/low of the snapshot row;
            // close keeps pre_close for later reference.
            sqlx::query(
                r#"
                INSERT INTO quote_history (
                    stock_code, pre_close, open, high, low,
                    close, vol, amount, num, change_percent, snapshot_time
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&snap.code)
            .bind(snap.pre_close)
            .bind(snap.price)
            .bind(snap.price)
            .bind(snap.price)
            .bind(snap.pre_close)
            .bind(snap.vol)
            .bind(snap.amount)
            .bind(0i64)
            .bind(snap.change_percent())
            .bind(format!("{} 09:26:00", snap.trade_date))
            .execute(&mut *tx)
            .await
            .context("Failed to insert auction snapshot")?;
            inserted += 1;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn auction_snapshot_count(&self, date: NaiveDate) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM quote_history WHERE snapshot_time = ?")
            .bind(format!("{} 09:26:00", date))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    // ---- KPL concepts ----

    pub async fn upsert_kpl_concepts(&self, rows: &[KplConcept]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for concept in rows {
            sqlx::query(
                r#"
                INSERT INTO kpl_concepts (trade_date, ts_code, name, z_t_num, up_num)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(trade_date, ts_code) DO UPDATE SET
                    name = excluded.name,
                    z_t_num = excluded.z_t_num,
                    up_num = excluded.up_num
                "#,
            )
            .bind(concept.trade_date)
            .bind(&concept.ts_code)
            .bind(&concept.name)
            .bind(concept.z_t_num)
            .bind(&concept.up_num)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert kpl concept")?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    pub async fn upsert_kpl_concept_cons(&self, rows: &[KplConceptCons]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for member in rows {
            sqlx::query(
                r#"
                INSERT INTO kpl_concept_cons (trade_date, ts_code, name, stock_code, hot_num)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(trade_date, ts_code, stock_code) DO UPDATE SET
                    name = excluded.name,
                    hot_num = excluded.hot_num
                "#,
            )
            .bind(member.trade_date)
            .bind(&member.ts_code)
            .bind(&member.name)
            .bind(&member.stock_code)
            .bind(member.hot_num)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert kpl concept member")?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    // ---- technical indicators ----

    pub async fn upsert_technical_indicators(
        &self,
        rows: &[TechnicalIndicatorRow],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO technical_indicators (
                    stock_code, date, ma5, ma10, ma20,
                    macd, macd_signal_line, macd_hist, rsi, volume_ratio
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(stock_code, date) DO UPDATE SET
                    ma5 = excluded.ma5,
                    ma10 = excluded.ma10,
                    ma20 = excluded.ma20,
                    macd = excluded.macd,
                    macd_signal_line = excluded.macd_signal_line,
                    macd_hist = excluded.macd_hist,
                    rsi = excluded.rsi,
                    volume_ratio = excluded.volume_ratio
                "#,
            )
            .bind(&row.code)
            .bind(row.date)
            .bind(row.ma5)
            .bind(row.ma10)
            .bind(row.ma20)
            .bind(row.macd)
            .bind(row.macd_signal)
            .bind(row.macd_hist)
            .bind(row.rsi)
            .bind(row.volume_ratio)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert technical indicator row")?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    pub async fn latest_technical_indicators(
        &self,
        code: &str,
    ) -> Result<Option<TechnicalIndicatorRow>> {
        let row = sqlx::query(
            r#"
            SELECT stock_code, date, ma5, ma10, ma20,
                   macd, macd_signal_line, macd_hist, rsi, volume_ratio
            FROM technical_indicators
            WHERE stock_code = ?
            ORDER BY date DESC
            LIMIT 1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            Ok(TechnicalIndicatorRow {
                code: r.try_get("stock_code")?,
                date: r.try_get("date")?,
                ma5: r.try_get("ma5")?,
                ma10: r.try_get("ma10")?,
                ma20: r.try_get("ma20")?,
                macd: r.try_get("macd")?,
                macd_signal: r.try_get("macd_signal_line")?,
                macd_hist: r.try_get("macd_hist")?,
                rsi: r.try_get("rsi")?,
                volume_ratio: r.try_get("volume_ratio")?,
            })
        })
        .transpose()
    }

    /// Codes holding at least one candle row, for batch indicator runs.
    pub async fn codes_with_candles(&self, limit: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT stock_code FROM klines ORDER BY stock_code LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| Ok(r.try_get::<String, _>("stock_code")?))
            .collect()
    }

    // ---- sector aggregates for the factor pass ----

    /// Average latest-vs-previous-close change (percent) across the
    /// industry's stocks, the previous close taken from within the last
    /// five calendar days.
    pub async fn sector_change_5d(&self, industry: &str) -> Result<Option<f64>> {
        let row = sqlx::query(
            r#"
            SELECT AVG((k.close - k_prev.close) / k_prev.close * 100) as avg_change_5d
            FROM klines k
            JOIN (
                SELECT stock_code, MAX(date) as max_date
                FROM klines
                GROUP BY stock_code
            ) latest ON k.stock_code = latest.stock_code AND k.date = latest.max_date
            JOIN klines k_prev ON k.stock_code = k_prev.stock_code
                AND k_prev.date = (
                    SELECT MAX(date)
                    FROM klines
                    WHERE stock_code = k.stock_code
                    AND date < k.date
                    AND date >= date(k.date, '-5 days')
                )
            JOIN stocks s ON k.stock_code = s.code
            WHERE s.industry = ?
            AND k_prev.close > 0
            "#,
        )
        .bind(industry)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("avg_change_5d")?)
    }

    /// Sum of each member stock's latest main fund flow, in yuan.
    pub async fn sector_main_flow(&self, industry: &str) -> Result<Option<f64>> {
        let row = sqlx::query(
            r#"
            SELECT SUM(main_fund_flow) as total_main_flow
            FROM fund_flow ff
            JOIN stocks s ON ff.stock_code = s.code
            WHERE s.industry = ?
            AND ff.date = (SELECT MAX(date) FROM fund_flow WHERE stock_code = ff.stock_code)
            "#,
        )
        .bind(industry)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("total_main_flow")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::Database;

    fn stock(code: &str, name: &str, industry: Option<&str>) -> Stock {
        Stock {
            code: code.to_string(),
            name: name.to_string(),
            exchange: Exchange::from_code(code),
            industry: industry.map(|s| s.to_string()),
        }
    }

    fn candle(code: &str, date: &str, close: f64) -> Candle {
        Candle {
            code: code.to_string(),
            date: date.parse().unwrap(),
            open: close * 0.99,
            high: close * 1.01,
            low: close * 0.98,
            close,
            volume: 1_000_000,
            amount: close * 1_000_000.0,
        }
    }

    #[tokio::test]
    async fn test_upsert_candles_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        let repo = MarketDataRepository::new(db.pool.clone());

        let candles = vec![
            candle("600519", "2024-01-15", 1680.0),
            candle("000001", "2024-01-15", 10.5),
        ];
        repo.upsert_candles(&candles).await.unwrap();
        repo.upsert_candles(&candles).await.unwrap();

        assert_eq!(repo.candle_count_total().await.unwrap(), 2);
        assert_eq!(
            repo.candle_count_on("2024-01-15".parse().unwrap())
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_recent_candles_ascending() {
        let db = Database::in_memory().await.unwrap();
        let repo = MarketDataRepository::new(db.pool.clone());

        let candles = vec![
            candle("600519", "2024-01-15", 100.0),
            candle("600519", "2024-01-16", 101.0),
            candle("600519", "2024-01-17", 102.0),
        ];
        repo.upsert_candles(&candles).await.unwrap();

        let recent = repo.recent_candles("600519", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].date < recent[1].date);
        assert_eq!(recent[1].close, 102.0);
    }

    #[tokio::test]
    async fn test_stock_upsert_updates_in_place() {
        let db = Database::in_memory().await.unwrap();
        let repo = MarketDataRepository::new(db.pool.clone());

        repo.upsert_stocks(&[stock("600519", "贵州茅台", Some("白酒"))])
            .await
            .unwrap();
        repo.upsert_stocks(&[stock("600519", "贵州茅台A", Some("白酒"))])
            .await
            .unwrap();

        assert_eq!(repo.stock_count().await.unwrap(), 1);
        let fetched = repo.get_stock("600519").await.unwrap().unwrap();
        assert_eq!(fetched.name, "贵州茅台A");
        assert_eq!(fetched.exchange, Exchange::Shanghai);
    }

    #[tokio::test]
    async fn test_auction_partial_upsert_never_clobbers() {
        let db = Database::in_memory().await.unwrap();
        let repo = MarketDataRepository::new(db.pool.clone());

        let date: NaiveDate = "2024-01-15".parse().unwrap();
        repo.upsert_daily_basic(&[DailyBasic {
            code: "600519".into(),
            trade_date: date,
            close: Some(1680.0),
            pe_ttm: Some(28.5),
            turnover_rate: Some(0.42),
            ..DailyBasic::default()
        }])
        .await
        .unwrap();

        let snap = AuctionSnapshot {
            code: "600519".into(),
            trade_date: date,
            pre_close: 1672.0,
            price: 1675.0,
            vol: 52_000,
            amount: 87_100_000.0,
            turnover_rate: 0.99,
            volume_ratio: 1.3,
            float_share: 1.25e9,
        };
        repo.apply_auction_basic(&snap).await.unwrap();

        let basic = repo.latest_daily_basic("600519").await.unwrap().unwrap();
        // Existing turnover_rate survives; empty fields were filled.
        assert_eq!(basic.turnover_rate, Some(0.42));
        assert_eq!(basic.volume_ratio, Some(1.3));
        assert_eq!(basic.float_share, Some(1.25e9));
        assert_eq!(basic.pe_ttm, Some(28.5));
    }

    #[tokio::test]
    async fn test_auction_window_force_clear() {
        let db = Database::in_memory().await.unwrap();
        let repo = MarketDataRepository::new(db.pool.clone());

        let date: NaiveDate = "2024-01-15".parse().unwrap();
        let snap = AuctionSnapshot {
            code: "000001".into(),
            trade_date: date,
            pre_close: 10.0,
            price: 10.2,
            vol: 800,
            amount: 8_160.0,
            turnover_rate: 0.0,
            volume_ratio: 0.0,
            float_share: 0.0,
        };
        repo.insert_auction_snapshots(std::slice::from_ref(&snap))
            .await
            .unwrap();
        assert_eq!(repo.auction_snapshot_count(date).await.unwrap(), 1);

        repo.clear_auction_window(date, true).await.unwrap();
        assert_eq!(repo.auction_snapshot_count(date).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_universe_requires_enough_history() {
        let db = Database::in_memory().await.unwrap();
        let repo = MarketDataRepository::new(db.pool.clone());

        repo.upsert_stocks(&[
            stock("600519", "贵州茅台", Some("白酒")),
            stock("000001", "平安银行", Some("银行")),
        ])
        .await
        .unwrap();

        // 600519 gets 3 days of history, 000001 only one.
        repo.upsert_candles(&[
            candle("600519", "2024-01-15", 100.0),
            candle("600519", "2024-01-16", 101.0),
            candle("600519", "2024-01-17", 102.0),
            candle("000001", "2024-01-17", 10.0),
        ])
        .await
        .unwrap();

        let universe = repo
            .universe("2024-01-01".parse().unwrap(), 3, 6000)
            .await
            .unwrap();
        assert_eq!(universe.len(), 1);
        assert_eq!(universe[0].code, "600519");
    }

    #[tokio::test]
    async fn test_sector_aggregates() {
        let db = Database::in_memory().await.unwrap();
        let repo = MarketDataRepository::new(db.pool.clone());

        repo.upsert_stocks(&[stock("600519", "贵州茅台", Some("白酒"))])
            .await
            .unwrap();
        repo.upsert_candles(&[
            candle("600519", "2024-01-16", 100.0),
            candle("600519", "2024-01-17", 110.0),
        ])
        .await
        .unwrap();
        repo.upsert_fund_flow(&[FundFlowRow {
            code: "600519".into(),
            date: "2024-01-17".parse().unwrap(),
            main_fund_flow: 25_000_000.0,
            retail_fund_flow: -4_000_000.0,
            institutional_flow: 21_000_000.0,
            large_order_ratio: 0.18,
        }])
        .await
        .unwrap();

        let change = repo.sector_change_5d("白酒").await.unwrap().unwrap();
        assert!((change - 10.0).abs() < 1e-9);
        let flow = repo.sector_main_flow("白酒").await.unwrap().unwrap();
        assert!((flow - 25_000_000.0).abs() < 1e-6);

        assert_eq!(repo.sector_change_5d("银行").await.unwrap(), None);
    }
}

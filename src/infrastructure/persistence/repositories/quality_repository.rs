//! Read-side aggregates backing the data quality monitor, plus the
//! write path for quality alerts and source-health snapshots.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};

/// (distinct stocks, total rows) over a window.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableStats {
    pub stock_count: i64,
    pub record_count: i64,
}

/// (total rows, rows passing/failing a predicate) over a window.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckStats {
    pub total: i64,
    pub flagged: i64,
}

#[derive(Clone)]
pub struct QualityRepository {
    pool: SqlitePool,
}

impl QualityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn window(days: i64) -> String {
        format!("-{} days", days)
    }

    pub async fn total_stocks(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM stocks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    pub async fn active_stocks(&self, days: i64) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT stock_code) as count FROM klines WHERE date >= date('now', ?)",
        )
        .bind(Self::window(days))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("count")?)
    }

    pub async fn kline_stats(&self, days: i64) -> Result<TableStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(DISTINCT stock_code) as stock_count,
                   COUNT(*) as record_count
            FROM klines
            WHERE date >= date('now', ?)
            "#,
        )
        .bind(Self::window(days))
        .fetch_one(&self.pool)
        .await?;
        Ok(TableStats {
            stock_count: row.try_get("stock_count")?,
            record_count: row.try_get("record_count")?,
        })
    }

    pub async fn flow_stats(&self, days: i64) -> Result<TableStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(DISTINCT stock_code) as stock_count,
                   COUNT(*) as record_count
            FROM fund_flow
            WHERE date >= date('now', ?)
            "#,
        )
        .bind(Self::window(days))
        .fetch_one(&self.pool)
        .await?;
        Ok(TableStats {
            stock_count: row.try_get("stock_count")?,
            record_count: row.try_get("record_count")?,
        })
    }

    /// (kline rows, fund-flow rows) a single curated stock has in the window.
    pub async fn hot_stock_counts(&self, code: &str, days: i64) -> Result<(i64, i64)> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM klines WHERE stock_code = ? AND date >= date('now', ?)",
        )
        .bind(code)
        .bind(Self::window(days))
        .fetch_one(&self.pool)
        .await?;
        let klines: i64 = row.try_get("count")?;

        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM fund_flow WHERE stock_code = ? AND date >= date('now', ?)",
        )
        .bind(code)
        .bind(Self::window(days))
        .fetch_one(&self.pool)
        .await?;
        let flows: i64 = row.try_get("count")?;

        Ok((klines, flows))
    }

    /// Stocks with neither candles nor flows in the window, counted per side.
    pub async fn missing_stats(&self, days: i64) -> Result<(i64, i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(DISTINCT s.code) as total_stocks,
                SUM(CASE WHEN k.stock_code IS NULL THEN 1 ELSE 0 END) as missing_kline,
                SUM(CASE WHEN f.stock_code IS NULL THEN 1 ELSE 0 END) as missing_flow
            FROM stocks s
            LEFT JOIN klines k ON s.code = k.stock_code AND k.date >= date('now', ?)
            LEFT JOIN fund_flow f ON s.code = f.stock_code AND f.date >= date('now', ?)
            "#,
        )
        .bind(Self::window(days))
        .bind(Self::window(days))
        .fetch_one(&self.pool)
        .await?;
        Ok((
            row.try_get("total_stocks")?,
            row.try_get::<Option<i64>, _>("missing_kline")?.unwrap_or(0),
            row.try_get::<Option<i64>, _>("missing_flow")?.unwrap_or(0),
        ))
    }

    /// K-line rows with a non-positive OHLCV field.
    pub async fn kline_error_stats(&self, days: i64) -> Result<CheckStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as total,
                   SUM(CASE WHEN open <= 0 OR high <= 0 OR low <= 0 OR close <= 0 OR volume <= 0
                       THEN 1 ELSE 0 END) as flagged
            FROM klines
            WHERE date >= date('now', ?)
            "#,
        )
        .bind(Self::window(days))
        .fetch_one(&self.pool)
        .await?;
        Ok(CheckStats {
            total: row.try_get("total")?,
            flagged: row.try_get::<Option<i64>, _>("flagged")?.unwrap_or(0),
        })
    }

    /// Fund-flow rows where all three flow fields are zero.
    pub async fn flow_error_stats(&self, days: i64) -> Result<CheckStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as total,
                   SUM(CASE WHEN main_fund_flow = 0 AND retail_fund_flow = 0
                             AND institutional_flow = 0
                       THEN 1 ELSE 0 END) as flagged
            FROM fund_flow
            WHERE date >= date('now', ?)
            "#,
        )
        .bind(Self::window(days))
        .fetch_one(&self.pool)
        .await?;
        Ok(CheckStats {
            total: row.try_get("total")?,
            flagged: row.try_get::<Option<i64>, _>("flagged")?.unwrap_or(0),
        })
    }

    /// (total stocks, stocks with both candles and flows in the window).
    pub async fn matched_stock_stats(&self, days: i64) -> Result<(i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(DISTINCT s.code) as total_stocks,
                COUNT(DISTINCT CASE WHEN k.stock_code IS NOT NULL AND f.stock_code IS NOT NULL
                      THEN s.code END) as matched_stocks
            FROM stocks s
            LEFT JOIN klines k ON s.code = k.stock_code AND k.date >= date('now', ?)
            LEFT JOIN fund_flow f ON s.code = f.stock_code AND f.date >= date('now', ?)
            "#,
        )
        .bind(Self::window(days))
        .bind(Self::window(days))
        .fetch_one(&self.pool)
        .await?;
        Ok((
            row.try_get("total_stocks")?,
            row.try_get("matched_stocks")?,
        ))
    }

    pub async fn kline_date_range(&self, days: i64) -> Result<Option<(NaiveDate, NaiveDate)>> {
        self.date_range("klines", "date", days).await
    }

    pub async fn flow_date_range(&self, days: i64) -> Result<Option<(NaiveDate, NaiveDate)>> {
        self.date_range("fund_flow", "date", days).await
    }

    async fn date_range(
        &self,
        table: &str,
        column: &str,
        days: i64,
    ) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let sql = format!(
            "SELECT MIN({col}) as min_date, MAX({col}) as max_date FROM {table} WHERE {col} >= date('now', ?)",
            col = column,
            table = table
        );
        let row = sqlx::query(&sql)
            .bind(Self::window(days))
            .fetch_one(&self.pool)
            .await?;
        let min: Option<NaiveDate> = row.try_get("min_date")?;
        let max: Option<NaiveDate> = row.try_get("max_date")?;
        Ok(min.zip(max))
    }

    /// K-line rows passing all positivity and high/low ordering checks.
    pub async fn kline_accuracy_stats(&self, days: i64) -> Result<CheckStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as total,
                   SUM(CASE WHEN open > 0 AND close > 0 AND high >= low
                             AND high >= open AND high >= close AND low > 0
                             AND volume >= 0 AND amount >= 0
                       THEN 1 ELSE 0 END) as flagged
            FROM klines
            WHERE date >= date('now', ?)
            "#,
        )
        .bind(Self::window(days))
        .fetch_one(&self.pool)
        .await?;
        Ok(CheckStats {
            total: row.try_get("total")?,
            flagged: row.try_get::<Option<i64>, _>("flagged")?.unwrap_or(0),
        })
    }

    /// Fund-flow rows whose aggregate magnitude lands within
    /// [0.2×, 2×] of the same-day candle amount.
    pub async fn flow_accuracy_stats(&self, days: i64) -> Result<CheckStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as total,
                   SUM(CASE WHEN k.amount > 0
                             AND (ABS(f.main_fund_flow) + ABS(f.retail_fund_flow)
                                  + ABS(f.institutional_flow)) > 0
                             AND (ABS(f.main_fund_flow) + ABS(f.retail_fund_flow)
                                  + ABS(f.institutional_flow))
                                 BETWEEN k.amount * 0.2 AND k.amount * 2.0
                       THEN 1 ELSE 0 END) as flagged
            FROM fund_flow f
            JOIN klines k ON f.stock_code = k.stock_code AND f.date = k.date
            WHERE f.date >= date('now', ?)
            "#,
        )
        .bind(Self::window(days))
        .fetch_one(&self.pool)
        .await?;
        Ok(CheckStats {
            total: row.try_get("total")?,
            flagged: row.try_get::<Option<i64>, _>("flagged")?.unwrap_or(0),
        })
    }

    // ---- write side ----

    pub async fn record_alert(
        &self,
        monitor_date: NaiveDate,
        metric_name: &str,
        metric_value: f64,
        threshold: f64,
        status: &str,
        alert_message: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO data_quality_monitor
            (monitor_date, metric_name, metric_value, threshold, status, alert_message)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(monitor_date)
        .bind(metric_name)
        .bind(metric_value)
        .bind(threshold)
        .bind(status)
        .bind(alert_message)
        .execute(&self.pool)
        .await
        .context("Failed to record quality alert")?;
        Ok(())
    }

    pub async fn alert_count_on(&self, monitor_date: NaiveDate) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM data_quality_monitor WHERE monitor_date = ?",
        )
        .bind(monitor_date)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("count")?)
    }

    pub async fn record_source_health(
        &self,
        source_name: &str,
        status: &str,
        success_rate: f64,
        avg_latency: f64,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO data_source_health
            (source_name, status, success_rate, avg_latency, last_check_time, error_message)
            VALUES (?, ?, ?, ?, datetime('now'), ?)
            "#,
        )
        .bind(source_name)
        .bind(status)
        .bind(success_rate)
        .bind(avg_latency)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .context("Failed to record source health")?;
        Ok(())
    }
}

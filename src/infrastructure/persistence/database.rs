use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Singleton database wrapper
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Fresh in-memory database, used by tests and `--dry-run` style tooling.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite database")?;
        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stocks (
                code TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                exchange TEXT NOT NULL,
                industry TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create stocks table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS klines (
                stock_code TEXT NOT NULL,
                date TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL,
                amount REAL NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (stock_code, date)
            );
            CREATE INDEX IF NOT EXISTS idx_klines_date ON klines (date);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create klines table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_basic (
                stock_code TEXT NOT NULL,
                trade_date TEXT NOT NULL,
                close REAL,
                turnover_rate REAL,
                turnover_rate_f REAL,
                volume_ratio REAL,
                pe REAL,
                pe_ttm REAL,
                pb REAL,
                ps REAL,
                ps_ttm REAL,
                dv_ratio REAL,
                dv_ttm REAL,
                total_share REAL,
                float_share REAL,
                free_share REAL,
                total_mv REAL,
                circ_mv REAL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (stock_code, trade_date)
            );
            CREATE INDEX IF NOT EXISTS idx_daily_basic_trade_date
            ON daily_basic (trade_date);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create daily_basic table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fund_flow (
                stock_code TEXT NOT NULL,
                date TEXT NOT NULL,
                main_fund_flow REAL NOT NULL,
                retail_fund_flow REAL NOT NULL,
                institutional_flow REAL NOT NULL,
                large_order_ratio REAL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (stock_code, date)
            );
            CREATE INDEX IF NOT EXISTS idx_fund_flow_date ON fund_flow (date);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create fund_flow table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS market_moneyflow (
                trade_date TEXT PRIMARY KEY,
                close_sh REAL,
                pct_change_sh REAL,
                close_sz REAL,
                pct_change_sz REAL,
                net_amount REAL,
                net_amount_rate REAL,
                buy_elg_amount REAL,
                buy_elg_amount_rate REAL,
                buy_lg_amount REAL,
                buy_lg_amount_rate REAL,
                buy_md_amount REAL,
                buy_md_amount_rate REAL,
                buy_sm_amount REAL,
                buy_sm_amount_rate REAL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create market_moneyflow table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sector_moneyflow (
                trade_date TEXT NOT NULL,
                sector_code TEXT NOT NULL,
                name TEXT,
                pct_change REAL,
                close REAL,
                rank INTEGER,
                net_amount REAL,
                net_amount_rate REAL,
                buy_elg_amount REAL,
                buy_elg_amount_rate REAL,
                buy_lg_amount REAL,
                buy_lg_amount_rate REAL,
                buy_md_amount REAL,
                buy_md_amount_rate REAL,
                buy_sm_amount REAL,
                buy_sm_amount_rate REAL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (trade_date, sector_code)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create sector_moneyflow table")?;

        // Call-auction snapshots land here at `<date> 09:26:00`.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quote_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stock_code TEXT NOT NULL,
                pre_close REAL,
                open REAL,
                high REAL,
                low REAL,
                close REAL,
                vol INTEGER,
                amount REAL,
                num INTEGER,
                change_percent REAL,
                snapshot_time DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_history_stock_time
            ON quote_history (stock_code, snapshot_time);
            CREATE INDEX IF NOT EXISTS idx_history_snapshot_time
            ON quote_history (snapshot_time);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create quote_history table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kpl_concepts (
                trade_date TEXT NOT NULL,
                ts_code TEXT NOT NULL,
                name TEXT,
                z_t_num INTEGER,
                up_num TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (trade_date, ts_code)
            );
            CREATE TABLE IF NOT EXISTS kpl_concept_cons (
                trade_date TEXT NOT NULL,
                ts_code TEXT NOT NULL,
                name TEXT,
                stock_code TEXT NOT NULL,
                hot_num REAL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (trade_date, ts_code, stock_code)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create kpl concept tables")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS technical_indicators (
                stock_code TEXT NOT NULL,
                date TEXT NOT NULL,
                ma5 REAL,
                ma10 REAL,
                ma20 REAL,
                macd REAL,
                macd_signal_line REAL,
                macd_hist REAL,
                rsi REAL,
                volume_ratio REAL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (stock_code, date)
            );
            CREATE INDEX IF NOT EXISTS idx_technical_date
            ON technical_indicators (date);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create technical_indicators table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collection_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection_type TEXT NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                stock_count INTEGER DEFAULT 0,
                kline_count INTEGER DEFAULT 0,
                flow_count INTEGER DEFAULT 0,
                indicator_count INTEGER DEFAULT 0,
                status TEXT DEFAULT 'pending',
                error_message TEXT,
                elapsed_time REAL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_collection_history_status
            ON collection_history (status);
            CREATE INDEX IF NOT EXISTS idx_collection_history_created
            ON collection_history (created_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create collection_history table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS advanced_selection_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                strategy_id INTEGER,
                strategy_name TEXT,
                stock_code TEXT NOT NULL,
                stock_name TEXT NOT NULL,
                composite_score REAL NOT NULL,
                selection_date TEXT NOT NULL,
                risk_advice TEXT,
                selection_reason TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_selection_strategy_created
            ON advanced_selection_history (strategy_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_selection_run
            ON advanced_selection_history (run_id, stock_code, selection_date);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create advanced_selection_history table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS data_quality_monitor (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                monitor_date TEXT NOT NULL,
                metric_name TEXT NOT NULL,
                metric_value REAL NOT NULL,
                threshold REAL,
                status TEXT,
                alert_message TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_quality_monitor_date
            ON data_quality_monitor (monitor_date);
            CREATE INDEX IF NOT EXISTS idx_quality_monitor_metric
            ON data_quality_monitor (metric_name);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create data_quality_monitor table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS data_source_health (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_name TEXT NOT NULL,
                status TEXT NOT NULL,
                success_rate REAL,
                avg_latency REAL,
                last_check_time DATETIME,
                error_message TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_source_health_source
            ON data_source_health (source_name);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create data_source_health table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}

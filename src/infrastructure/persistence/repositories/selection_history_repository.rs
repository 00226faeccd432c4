//! Persistence for selection-run results (`advanced_selection_history`).

use crate::domain::scoring::ScoredStock;
use crate::domain::strategy::StrategyId;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};
use tracing::info;

/// One persisted selection row, as read back for listings.
#[derive(Debug, Clone)]
pub struct SelectionRecord {
    pub run_id: String,
    pub strategy_id: Option<i64>,
    pub strategy_name: Option<String>,
    pub stock_code: String,
    pub stock_name: String,
    pub composite_score: f64,
    pub selection_date: NaiveDate,
    pub risk_advice: Option<String>,
    pub selection_reason: Option<String>,
}

#[derive(Clone)]
pub struct SelectionHistoryRepository {
    pool: SqlitePool,
}

impl SelectionHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save_run(
        &self,
        run_id: &str,
        strategy: Option<StrategyId>,
        selection_date: NaiveDate,
        results: &[ScoredStock],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for stock in results {
            sqlx::query(
                r#"
                INSERT INTO advanced_selection_history (
                    run_id, strategy_id, strategy_name, stock_code, stock_name,
                    composite_score, selection_date, risk_advice, selection_reason
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(run_id)
            .bind(strategy.map(|s| s.id()))
            .bind(strategy.map(|s| s.name()))
            .bind(&stock.code)
            .bind(&stock.name)
            .bind(stock.composite_score)
            .bind(selection_date)
            .bind(stock.risk_level.label())
            .bind(&stock.selection_reason)
            .execute(&mut *tx)
            .await
            .context("Failed to insert selection history row")?;
        }
        tx.commit().await?;

        info!(
            "Persisted {} selection rows under run {}",
            results.len(),
            run_id
        );
        Ok(results.len() as u64)
    }

    /// Recent selections, newest run first then score descending.
    pub async fn list(
        &self,
        strategy: Option<StrategyId>,
        limit: i64,
    ) -> Result<Vec<SelectionRecord>> {
        let rows = match strategy {
            Some(id) => {
                sqlx::query(
                    r#"
                    SELECT run_id, strategy_id, strategy_name, stock_code, stock_name,
                           composite_score, selection_date, risk_advice, selection_reason
                    FROM advanced_selection_history
                    WHERE strategy_id = ?
                    ORDER BY created_at DESC, composite_score DESC
                    LIMIT ?
                    "#,
                )
                .bind(id.id())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT run_id, strategy_id, strategy_name, stock_code, stock_name,
                           composite_score, selection_date, risk_advice, selection_reason
                    FROM advanced_selection_history
                    ORDER BY created_at DESC, composite_score DESC
                    LIMIT ?
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(Self::map_record).collect()
    }

    pub async fn delete_run(&self, run_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM advanced_selection_history WHERE run_id = ?")
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_for_run(&self, run_id: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM advanced_selection_history WHERE run_id = ?",
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("count")?)
    }

    pub async fn total_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM advanced_selection_history")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    fn map_record(row: &sqlx::sqlite::SqliteRow) -> Result<SelectionRecord> {
        Ok(SelectionRecord {
            run_id: row.try_get("run_id")?,
            strategy_id: row.try_get("strategy_id")?,
            strategy_name: row.try_get("strategy_name")?,
            stock_code: row.try_get("stock_code")?,
            stock_name: row.try_get("stock_name")?,
            composite_score: row.try_get("composite_score")?,
            selection_date: row.try_get("selection_date")?,
            risk_advice: row.try_get("risk_advice")?,
            selection_reason: row.try_get("selection_reason")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::scoring::{ComponentScores, HoldingPeriod, RiskLevel};
    use crate::infrastructure::persistence::database::Database;

    fn scored(code: &str, score: f64) -> ScoredStock {
        ScoredStock {
            code: code.to_string(),
            name: format!("股票{}", code),
            industry: Some("白酒".into()),
            composite_score: score,
            scores: ComponentScores::default(),
            current_price: 100.0,
            selection_reason: "综合评分达标".into(),
            risk_level: RiskLevel::Medium,
            holding_period: HoldingPeriod::Mid,
            target_price: 105.0,
            stop_loss_price: 90.0,
            buy_point: 99.0,
            sell_point: 105.0,
            ret_20d: 5.0,
            ret_60d: 12.0,
            volume_ratio: 1.2,
            rsi: 55.0,
            price_position: 0.6,
            macd_hist: 0.1,
            slope_pct: 0.4,
            r2: 0.6,
            sharpe: 0.8,
            vol_annualized: 25.0,
            max_drawdown: -8.0,
            sector_heat: 60.0,
            roe: 15.0,
            pe_ttm: 20.0,
            revenue_growth: 12.0,
            price_breakout: false,
            vol_breakout: false,
        }
    }

    #[tokio::test]
    async fn test_save_list_delete_run() {
        let db = Database::in_memory().await.unwrap();
        let repo = SelectionHistoryRepository::new(db.pool.clone());
        let date: NaiveDate = "2024-01-15".parse().unwrap();

        let results = vec![scored("600519", 88.0), scored("000001", 72.5)];
        repo.save_run("run-1", Some(StrategyId::TrendFollowing), date, &results)
            .await
            .unwrap();

        assert_eq!(repo.count_for_run("run-1").await.unwrap(), 2);

        let listed = repo.list(Some(StrategyId::TrendFollowing), 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].composite_score, 88.0);
        assert_eq!(listed[0].strategy_name.as_deref(), Some("趋势跟随"));
        assert_eq!(listed[0].risk_advice.as_deref(), Some("中"));

        assert_eq!(repo.delete_run("run-1").await.unwrap(), 2);
        assert_eq!(repo.total_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_filters_by_strategy() {
        let db = Database::in_memory().await.unwrap();
        let repo = SelectionHistoryRepository::new(db.pool.clone());
        let date: NaiveDate = "2024-01-15".parse().unwrap();

        repo.save_run("r1", Some(StrategyId::ValueGrowth), date, &[scored("600519", 80.0)])
            .await
            .unwrap();
        repo.save_run("r2", Some(StrategyId::SuperLeader), date, &[scored("300750", 91.0)])
            .await
            .unwrap();

        let value_only = repo.list(Some(StrategyId::ValueGrowth), 10).await.unwrap();
        assert_eq!(value_only.len(), 1);
        assert_eq!(value_only[0].stock_code, "600519");

        let all = repo.list(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}

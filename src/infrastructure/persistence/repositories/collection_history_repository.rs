//! Lifecycle of `collection_history` rows: the authoritative record of
//! what each ingestion run touched. Status only ever advances
//! pending → running → completed | failed.

use crate::domain::types::{CollectionRun, CollectionStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// Row counts accumulated by one ingestion run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionCounts {
    pub stocks: i64,
    pub klines: i64,
    pub flows: i64,
    pub indicators: i64,
}

#[derive(Clone)]
pub struct CollectionHistoryRepository {
    pool: SqlitePool,
}

impl CollectionHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        collection_type: &str,
        start_date: &str,
        end_date: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO collection_history
            (collection_type, start_date, end_date, status, created_at, updated_at)
            VALUES (?, ?, ?, 'pending', datetime('now'), datetime('now'))
            "#,
        )
        .bind(collection_type)
        .bind(start_date)
        .bind(end_date)
        .execute(&self.pool)
        .await
        .context("Failed to create collection_history row")?;
        Ok(result.last_insert_rowid())
    }

    pub async fn mark_running(&self, id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE collection_history
            SET status = 'running', updated_at = datetime('now')
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn complete(&self, id: i64, counts: CollectionCounts, elapsed_secs: f64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE collection_history
            SET stock_count = ?, kline_count = ?, flow_count = ?, indicator_count = ?,
                status = 'completed', elapsed_time = ?, updated_at = datetime('now')
            WHERE id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(counts.stocks)
        .bind(counts.klines)
        .bind(counts.flows)
        .bind(counts.indicators)
        .bind(elapsed_secs)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to complete collection_history row")?;
        Ok(())
    }

    pub async fn fail(&self, id: i64, error_message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE collection_history
            SET status = 'failed', error_message = ?, updated_at = datetime('now')
            WHERE id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark collection_history row failed")?;
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Option<CollectionRun>> {
        let row = sqlx::query("SELECT * FROM collection_history WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::map_run(&r)).transpose()
    }

    /// Completion time of the most recent successful run.
    pub async fn latest_completed_at(&self) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT MAX(created_at) as latest FROM collection_history WHERE status = 'completed'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("latest")?)
    }

    pub async fn completed_count_since(&self, days: i64) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count FROM collection_history
            WHERE status = 'completed' AND created_at >= datetime('now', ?)
            "#,
        )
        .bind(format!("-{} days", days))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("count")?)
    }

    fn map_run(row: &sqlx::sqlite::SqliteRow) -> Result<CollectionRun> {
        let status_str: String = row.try_get("status")?;
        Ok(CollectionRun {
            id: row.try_get("id")?,
            collection_type: row.try_get("collection_type")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            stock_count: row.try_get("stock_count")?,
            kline_count: row.try_get("kline_count")?,
            flow_count: row.try_get("flow_count")?,
            indicator_count: row.try_get("indicator_count")?,
            status: CollectionStatus::from_str(&status_str)
                .unwrap_or(CollectionStatus::Failed),
            error_message: row.try_get("error_message")?,
            elapsed_secs: row
                .try_get::<Option<f64>, _>("elapsed_time")?
                .unwrap_or(0.0),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::Database;

    #[tokio::test]
    async fn test_lifecycle_advances_forward_only() {
        let db = Database::in_memory().await.unwrap();
        let repo = CollectionHistoryRepository::new(db.pool.clone());

        let id = repo
            .create("incremental", "2024-01-09", "2024-01-15")
            .await
            .unwrap();

        let run = repo.get(id).await.unwrap().unwrap();
        assert_eq!(run.status, CollectionStatus::Pending);

        repo.mark_running(id).await.unwrap();
        let run = repo.get(id).await.unwrap().unwrap();
        assert_eq!(run.status, CollectionStatus::Running);

        repo.complete(
            id,
            CollectionCounts {
                stocks: 5000,
                klines: 35000,
                flows: 34000,
                indicators: 35000,
            },
            42.5,
        )
        .await
        .unwrap();

        let run = repo.get(id).await.unwrap().unwrap();
        assert_eq!(run.status, CollectionStatus::Completed);
        assert_eq!(run.kline_count, 35000);
        assert!(run.elapsed_secs >= 0.0);

        // A terminal row cannot transition back.
        repo.fail(id, "late failure").await.unwrap();
        let run = repo.get(id).await.unwrap().unwrap();
        assert_eq!(run.status, CollectionStatus::Completed);
        assert_eq!(run.error_message, None);
    }

    #[tokio::test]
    async fn test_failed_run_records_message() {
        let db = Database::in_memory().await.unwrap();
        let repo = CollectionHistoryRepository::new(db.pool.clone());

        let id = repo
            .create("incremental", "2024-01-09", "2024-01-15")
            .await
            .unwrap();
        repo.mark_running(id).await.unwrap();
        repo.fail(id, "cancelled").await.unwrap();

        let run = repo.get(id).await.unwrap().unwrap();
        assert_eq!(run.status, CollectionStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_completed_counters() {
        let db = Database::in_memory().await.unwrap();
        let repo = CollectionHistoryRepository::new(db.pool.clone());

        assert_eq!(repo.completed_count_since(7).await.unwrap(), 0);
        assert!(repo.latest_completed_at().await.unwrap().is_none());

        let id = repo.create("full", "2024-01-01", "2024-01-07").await.unwrap();
        repo.mark_running(id).await.unwrap();
        repo.complete(id, CollectionCounts::default(), 1.0)
            .await
            .unwrap();

        assert_eq!(repo.completed_count_since(7).await.unwrap(), 1);
        assert!(repo.latest_completed_at().await.unwrap().is_some());
    }
}

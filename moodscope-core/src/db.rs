use crate::config::DatabaseConfig;
use crate::error::MoodscopeError;
use crate::models::{AnalysisRow, HistoryEntry, NewAnalysis};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;

/// Maximum number of records returned by `/history`.
pub const HISTORY_LIMIT: i64 = 50;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS analysis (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    text      TEXT NOT NULL,
    sentiment TEXT,
    emotion   TEXT,
    date      DATETIME NOT NULL
)
"#;

pub async fn create_pool(config: &DatabaseConfig) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
}

pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(SCHEMA).execute(pool).await?;
    Ok(())
}

pub async fn health_check(pool: &SqlitePool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT sqlite_version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Append-only store of analyses, with bulk clear.
#[derive(Debug, Clone)]
pub struct AnalysisStore {
    pool: SqlitePool,
}

impl AnalysisStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert one record stamped with the current UTC time. Returns its id.
    pub async fn append(&self, record: &NewAnalysis) -> Result<i64, MoodscopeError> {
        if record.text.trim().is_empty() {
            return Err(MoodscopeError::InvalidRecord(
                "analysis text must not be empty".to_string(),
            ));
        }

        let sentiment = serde_json::to_string(&record.sentiment)?;
        let emotion = serde_json::to_string(&record.emotion)?;
        let date = Utc::now().naive_utc();

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO analysis (text, sentiment, emotion, date) VALUES (?, ?, ?, ?)",
        )
        .bind(&record.text)
        .bind(&sentiment)
        .bind(&emotion)
        .bind(date)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(result) => {
                tx.commit().await?;
                let id = result.last_insert_rowid();
                tracing::info!(id = id, "Stored analysis");
                Ok(id)
            }
            Err(e) => {
                rollback(tx, "append").await;
                Err(e.into())
            }
        }
    }

    /// Most recent records first, at most `limit` of them.
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<HistoryEntry>, MoodscopeError> {
        let rows: Vec<AnalysisRow> = sqlx::query_as(
            "SELECT id, text, sentiment, emotion, date FROM analysis \
             ORDER BY date DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let entries = rows
            .into_iter()
            .map(HistoryEntry::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// `list_recent` capped at `HISTORY_LIMIT`.
    pub async fn history(&self) -> Result<Vec<HistoryEntry>, MoodscopeError> {
        self.list_recent(HISTORY_LIMIT).await
    }

    /// Delete every record. Returns the number of rows removed.
    pub async fn clear(&self) -> Result<u64, MoodscopeError> {
        let mut tx = self.pool.begin().await?;

        match sqlx::query("DELETE FROM analysis").execute(&mut *tx).await {
            Ok(result) => {
                tx.commit().await?;
                let removed = result.rows_affected();
                tracing::info!(removed = removed, "Cleared analysis history");
                Ok(removed)
            }
            Err(e) => {
                rollback(tx, "clear").await;
                Err(e.into())
            }
        }
    }

    pub async fn count(&self) -> Result<i64, MoodscopeError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM analysis")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

async fn rollback(tx: Transaction<'_, Sqlite>, operation: &str) {
    match tx.rollback().await {
        Ok(()) => tracing::warn!(operation = operation, "Transaction rolled back"),
        Err(e) => tracing::error!(operation = operation, error = %e, "Rollback failed"),
    }
}

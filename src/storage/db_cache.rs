// src/storage/db_cache.rs
//! Database-backed result cache with explicit expiry.
//!
//! Reads only return rows whose `expires_at` is in the future. The periodic
//! sweep deletes expired rows to reclaim space; correctness never depends on
//! when it runs.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::fiscal_year::FiscalYear;
use crate::utils::error::StorageError;

/// Compound unique key of a cached document, depending on its class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentKey {
    Annual {
        symbol: String,
        fiscal_year: FiscalYear,
        report_type: String,
    },
    Quarterly {
        symbol: String,
        quarter: String,
        fiscal_year: FiscalYear,
    },
}

impl DocumentKey {
    pub fn annual(symbol: &str, fiscal_year: FiscalYear, report_type: &str) -> Self {
        DocumentKey::Annual {
            symbol: symbol.to_uppercase(),
            fiscal_year,
            report_type: report_type.to_string(),
        }
    }

    pub fn quarterly(symbol: &str, quarter: &str, fiscal_year: FiscalYear) -> Self {
        DocumentKey::Quarterly {
            symbol: symbol.to_uppercase(),
            quarter: quarter.to_uppercase(),
            fiscal_year,
        }
    }

    // (symbol, fiscal_year, document_class, period)
    fn columns(&self) -> (String, String, &'static str, String) {
        match self {
            DocumentKey::Annual { symbol, fiscal_year, report_type } => {
                (symbol.to_uppercase(), fiscal_year.to_string(), "annual", report_type.clone())
            }
            DocumentKey::Quarterly { symbol, quarter, fiscal_year } => {
                (symbol.to_uppercase(), fiscal_year.to_string(), "quarterly", quarter.to_uppercase())
            }
        }
    }
}

pub struct DbCache {
    pool: SqlitePool,
}

impl DbCache {
    /// Opens (creating if needed) the sqlite database at `path`.
    pub async fn connect(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let cache = Self { pool };
        cache.migrate().await?;
        Ok(cache)
    }

    /// A private in-memory database, used by tests and cache-less runs.
    pub async fn in_memory() -> Result<Self, StorageError> {
        // Every connection to :memory: is a separate database, so pin one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let cache = Self { pool };
        cache.migrate().await?;
        Ok(cache)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS report_cache (
                symbol TEXT NOT NULL,
                fiscal_year TEXT NOT NULL,
                document_class TEXT NOT NULL,
                period TEXT NOT NULL,
                document TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(symbol, fiscal_year, document_class, period)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_report_cache_expires_at ON report_cache(expires_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Inserts or replaces the document for `key` in one atomic statement.
    pub async fn upsert<T: Serialize>(&self, key: &DocumentKey, document: &T, expires_at: DateTime<Utc>) -> Result<(), StorageError> {
        let (symbol, fiscal_year, class, period) = key.columns();
        let body = serde_json::to_string(document)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO report_cache (symbol, fiscal_year, document_class, period, document, expires_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol, fiscal_year, document_class, period) DO UPDATE SET
                document = excluded.document,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&symbol)
        .bind(&fiscal_year)
        .bind(class)
        .bind(&period)
        .bind(&body)
        .bind(expires_at.timestamp())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        tracing::debug!("Cached {} {} {} {} until {}", symbol, fiscal_year, class, period, expires_at);
        Ok(())
    }

    /// The document for `key` if it has not expired.
    pub async fn find_fresh<T: DeserializeOwned>(&self, key: &DocumentKey) -> Result<Option<T>, StorageError> {
        let (symbol, fiscal_year, class, period) = key.columns();
        let row: Option<String> = sqlx::query_scalar(
            r#"
            SELECT document FROM report_cache
            WHERE symbol = ? AND fiscal_year = ? AND document_class = ? AND period = ? AND expires_at > ?
            "#,
        )
        .bind(&symbol)
        .bind(&fiscal_year)
        .bind(class)
        .bind(&period)
        .bind(Utc::now().timestamp())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|body| serde_json::from_str(&body).map_err(|e| StorageError::SerializationError(e.to_string())))
            .transpose()
    }

    /// Deletes every expired row, returning how many were removed.
    pub async fn sweep_expired(&self) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM report_cache WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Runs [`sweep_expired`](Self::sweep_expired) every `interval` until the
    /// returned handle is aborted.
    pub fn spawn_ttl_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match self.sweep_expired().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("TTL sweep removed {} expired cache row(s)", n),
                    Err(e) => tracing::warn!("TTL sweep failed: {}", e),
                }
            }
        })
    }

    #[cfg(test)]
    async fn row_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM report_cache")
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}

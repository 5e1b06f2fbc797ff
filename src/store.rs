//! Record store gateway.
//!
//! Wraps create/read/delete operations against a collection of captured
//! `{input, output}` records. Readiness is an externally-signaled
//! precondition: callers await [`RecordStore::wait_until_ready`] before
//! invoking operations, and operations invoked before readiness fail fast
//! with [`StoreError::NotReady`] rather than hanging.
//!
//! Reads always re-fetch; the gateway holds no record cache. Fetches retry
//! with linearly increasing backoff (`300ms * attempt`).

use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::models::{NewRecord, Record};

/// Backoff unit for both the readiness poll and the fetch retry loop.
const BACKOFF_STEP: Duration = Duration::from_millis(300);

/// Store gateway failure. Callers match on this to pick a degraded path.
#[derive(Debug)]
pub enum StoreError {
    /// The underlying connection has not been initialized yet.
    NotReady,
    /// A remote operation failed after exhausting its attempts.
    Exhausted { attempts: u32, last: sqlx::Error },
    /// A single-shot operation failed.
    Query(sqlx::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotReady => write!(f, "store connection not initialized"),
            StoreError::Exhausted { attempts, last } => {
                write!(f, "store unavailable after {} attempts: {}", attempts, last)
            }
            StoreError::Query(e) => write!(f, "store query failed: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// Gateway to the records collection.
pub struct RecordStore {
    db_path: PathBuf,
    collection: String,
    pool: RwLock<Option<SqlitePool>>,
}

impl RecordStore {
    /// Create an unconnected gateway. No I/O happens until
    /// [`wait_until_ready`](RecordStore::wait_until_ready) or the first
    /// operation.
    pub fn new(config: &Config) -> Self {
        Self {
            db_path: config.db.path.clone(),
            collection: config.db.collection.clone(),
            pool: RwLock::new(None),
        }
    }

    /// The collection this gateway reads and writes.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Poll for the backing database until it is connectable and migrated,
    /// or `max_ms` elapses. Returns whether the store became ready.
    pub async fn wait_until_ready(&self, max_ms: u64) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(max_ms);

        loop {
            if self.pool.read().await.is_some() {
                return true;
            }

            if let Ok(pool) = db::connect(&self.db_path).await {
                if schema_present(&pool).await {
                    *self.pool.write().await = Some(pool);
                    return true;
                }
                pool.close().await;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(BACKOFF_STEP).await;
        }
    }

    async fn pool(&self) -> Result<SqlitePool, StoreError> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or(StoreError::NotReady)
    }

    /// Fetch every record in the collection, oldest first.
    ///
    /// Retries up to `max_attempts` times with linearly increasing backoff
    /// before giving up with [`StoreError::Exhausted`].
    pub async fn fetch_all(&self, max_attempts: u32) -> Result<Vec<Record>, StoreError> {
        let pool = self.pool().await?;
        let mut last_err = None;

        for attempt in 1..=max_attempts.max(1) {
            if attempt > 1 {
                tokio::time::sleep(BACKOFF_STEP * (attempt - 1)).await;
            }

            match fetch_records(&pool, &self.collection).await {
                Ok(records) => return Ok(records),
                Err(e) => last_err = Some(e),
            }
        }

        Err(StoreError::Exhausted {
            attempts: max_attempts.max(1),
            last: last_err.unwrap_or(sqlx::Error::PoolClosed),
        })
    }

    /// Append a record and return its new identifier.
    ///
    /// Fails fast with [`StoreError::NotReady`] if the connection has not
    /// been initialized.
    pub async fn append(&self, record: NewRecord) -> Result<String, StoreError> {
        let pool = self.pool().await?;

        let id = Uuid::new_v4().to_string();
        let created_at = record
            .timestamp
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());

        sqlx::query(
            r#"
            INSERT INTO records (id, collection, input, output, raw_input, raw_output, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&self.collection)
        .bind(&record.input)
        .bind(&record.output)
        .bind(&record.raw_input)
        .bind(&record.raw_output)
        .bind(&created_at)
        .execute(&pool)
        .await
        .map_err(StoreError::Query)?;

        Ok(id)
    }

    /// Delete a record by identifier. Returns whether a row was removed.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let pool = self.pool().await?;

        let result = sqlx::query("DELETE FROM records WHERE id = ? AND collection = ?")
            .bind(id)
            .bind(&self.collection)
            .execute(&pool)
            .await
            .map_err(StoreError::Query)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn close(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
    }
}

async fn schema_present(pool: &SqlitePool) -> bool {
    sqlx::query_scalar::<_, bool>(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='records'",
    )
    .fetch_one(pool)
    .await
    .unwrap_or(false)
}

async fn fetch_records(pool: &SqlitePool, collection: &str) -> Result<Vec<Record>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, input, output, raw_input, raw_output, created_at
        FROM records
        WHERE collection = ?
        ORDER BY rowid ASC
        "#,
    )
    .bind(collection)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Record {
            id: row.get("id"),
            input: row.get("input"),
            output: row.get("output"),
            raw_input: row.get("raw_input"),
            raw_output: row.get("raw_output"),
            timestamp: row.get("created_at"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DbConfig, ServerConfig};
    use crate::migrate;
    use tempfile::TempDir;

    fn test_config(tmp: &TempDir) -> Config {
        Config {
            db: DbConfig {
                path: tmp.path().join("test.sqlite"),
                collection: "mails".to_string(),
            },
            page: Default::default(),
            watcher: Default::default(),
            model: Default::default(),
            retrieval: Default::default(),
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn operations_fail_fast_before_readiness() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let store = RecordStore::new(&config);

        let err = store.append(NewRecord::pair("q", "a")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotReady));

        let err = store.fetch_all(3).await.unwrap_err();
        assert!(matches!(err, StoreError::NotReady));
    }

    #[tokio::test]
    async fn readiness_times_out_without_schema() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let store = RecordStore::new(&config);

        // Database file can be created, but the records table never appears.
        assert!(!store.wait_until_ready(100).await);
    }

    #[tokio::test]
    async fn append_then_fetch_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        migrate::run_migrations(&config).await.unwrap();

        let store = RecordStore::new(&config);
        assert!(store.wait_until_ready(2_000).await);

        let id = store
            .append(NewRecord {
                input: "short q".to_string(),
                output: "short a".to_string(),
                raw_input: Some("raw q".to_string()),
                raw_output: Some("raw a".to_string()),
                timestamp: None,
            })
            .await
            .unwrap();

        store.append(NewRecord::pair("q2", "a2")).await.unwrap();

        let records = store.fetch_all(3).await.unwrap();
        assert_eq!(records.len(), 2);
        // Insertion order is preserved.
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].input, "short q");
        assert_eq!(records[0].raw_input.as_deref(), Some("raw q"));
        assert!(records[0].timestamp.is_some());
        assert_eq!(records[1].input, "q2");

        store.close().await;
    }

    #[tokio::test]
    async fn fetch_retries_with_backoff_then_reports_exhaustion() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        migrate::run_migrations(&config).await.unwrap();

        let store = RecordStore::new(&config);
        assert!(store.wait_until_ready(2_000).await);

        // Pull the table out from under the connected store so every
        // fetch attempt fails.
        let pool = crate::db::connect(&config.db.path).await.unwrap();
        sqlx::query("DROP TABLE records").execute(&pool).await.unwrap();
        pool.close().await;

        let started = tokio::time::Instant::now();
        let err = store.fetch_all(3).await.unwrap_err();
        match err {
            StoreError::Exhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected exhaustion, got {}", other),
        }
        // Linear backoff between attempts: 300ms then 600ms.
        assert!(started.elapsed() >= Duration::from_millis(900));

        store.close().await;
    }

    #[tokio::test]
    async fn delete_removes_only_named_record() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        migrate::run_migrations(&config).await.unwrap();

        let store = RecordStore::new(&config);
        assert!(store.wait_until_ready(2_000).await);

        let id = store.append(NewRecord::pair("q", "a")).await.unwrap();
        store.append(NewRecord::pair("q2", "a2")).await.unwrap();

        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());

        let records = store.fetch_all(3).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].input, "q2");

        store.close().await;
    }
}

use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;

    // Create records table. The collection column is the sole namespace
    // partition; no schema enforcement beyond it.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            collection TEXT NOT NULL,
            input TEXT NOT NULL,
            output TEXT NOT NULL,
            raw_input TEXT,
            raw_output TEXT,
            created_at TEXT
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}

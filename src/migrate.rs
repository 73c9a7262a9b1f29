use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Search log: one row per search attempt
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS searches (
            id TEXT NOT NULL,
            uid TEXT NOT NULL,
            keyword TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (uid, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Saved results: one row per save action, never deduplicated
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS results (
            id TEXT NOT NULL,
            uid TEXT NOT NULL,
            asin TEXT NOT NULL,
            item_json TEXT NOT NULL,
            saved_at INTEGER NOT NULL,
            PRIMARY KEY (uid, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_searches_uid_created ON searches(uid, created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_results_uid_saved ON results(uid, saved_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}

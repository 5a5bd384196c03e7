//! SQLite schema for the local catalog and search backends.
//!
//! Both are idempotent and safe to run on every start.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn create_catalog_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS templates (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            slug TEXT NOT NULL,
            category TEXT NOT NULL,
            subcategory TEXT,
            source_path TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            variables_json TEXT NOT NULL DEFAULT '[]',
            variable_count INTEGER NOT NULL DEFAULT 0,
            word_count INTEGER NOT NULL DEFAULT 0,
            preview TEXT NOT NULL DEFAULT '',
            imported_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_templates_category ON templates(category)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_templates_slug ON templates(slug)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_search_schema(pool: &SqlitePool) -> Result<()> {
    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='templates_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE templates_fts USING fts5(
                template_id UNINDEXED,
                source_path UNINDEXED,
                title,
                category,
                variables,
                preview
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    Ok(())
}

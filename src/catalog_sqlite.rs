//! SQLite template catalog.
//!
//! Local stand-in for the Postgres `templates` table, with the same columns.
//! Used for offline imports and tests; each batch is upserted in one
//! transaction.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};

use crate::db;
use crate::migrate;
use crate::models::TemplateRecord;
use crate::traits::TemplateCatalog;

pub struct SqliteCatalog {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteCatalog {
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }
}

#[async_trait]
impl TemplateCatalog for SqliteCatalog {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn prepare(&self) -> Result<()> {
        migrate::create_catalog_schema(&self.pool).await
    }

    async fn upsert(&self, records: &[TemplateRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            let variables_json = serde_json::to_string(&record.variables)?;
            sqlx::query(
                r#"
                INSERT INTO templates (id, title, slug, category, subcategory, source_path, storage_path, file_size, content_hash, variables_json, variable_count, word_count, preview, imported_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    slug = excluded.slug,
                    category = excluded.category,
                    subcategory = excluded.subcategory,
                    source_path = excluded.source_path,
                    storage_path = excluded.storage_path,
                    file_size = excluded.file_size,
                    content_hash = excluded.content_hash,
                    variables_json = excluded.variables_json,
                    variable_count = excluded.variable_count,
                    word_count = excluded.word_count,
                    preview = excluded.preview,
                    imported_at = excluded.imported_at
                "#,
            )
            .bind(&record.id)
            .bind(&record.title)
            .bind(&record.slug)
            .bind(&record.category)
            .bind(&record.subcategory)
            .bind(&record.source_path)
            .bind(&record.storage_path)
            .bind(record.file_size)
            .bind(&record.content_hash)
            .bind(&variables_json)
            .bind(record.variable_count)
            .bind(record.word_count)
            .bind(&record.preview)
            .bind(&record.imported_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to upsert template {}", record.source_path))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM templates")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn health(&self) -> Result<String> {
        let count = self.count().await.with_context(|| {
            format!(
                "{} has no templates table; run `nyaya-import init`",
                self.path.display()
            )
        })?;
        Ok(format!("{} ({} rows)", self.path.display(), count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TemplateVariable, VariableKind};
    use tempfile::TempDir;

    fn record(id: &str, title: &str) -> TemplateRecord {
        TemplateRecord {
            id: id.to_string(),
            title: title.to_string(),
            slug: crate::models::slugify(title),
            category: "Property".to_string(),
            subcategory: None,
            source_path: format!("Property/{}.docx", id),
            storage_path: format!("property/{}.docx", id),
            file_size: 100,
            content_hash: "abc".to_string(),
            variables: vec![TemplateVariable {
                key: "tenant_name".to_string(),
                label: "Tenant Name".to_string(),
                kind: VariableKind::Text,
                occurrences: 1,
            }],
            variable_count: 1,
            word_count: 10,
            preview: "preview".to_string(),
            imported_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_id() {
        let tmp = TempDir::new().unwrap();
        let catalog = SqliteCatalog::open(&tmp.path().join("catalog.sqlite"))
            .await
            .unwrap();
        catalog.prepare().await.unwrap();
        catalog.prepare().await.unwrap();

        catalog
            .upsert(&[record("a", "Rent Agreement"), record("b", "Sale Deed")])
            .await
            .unwrap();
        catalog
            .upsert(&[record("a", "Rent Agreement v2")])
            .await
            .unwrap();
        assert_eq!(catalog.count().await.unwrap(), 2);

        let title: String = sqlx::query_scalar("SELECT title FROM templates WHERE id = 'a'")
            .fetch_one(&catalog.pool)
            .await
            .unwrap();
        assert_eq!(title, "Rent Agreement v2");

        let vars: String = sqlx::query_scalar("SELECT variables_json FROM templates WHERE id = 'b'")
            .fetch_one(&catalog.pool)
            .await
            .unwrap();
        assert!(vars.contains("tenant_name"));
    }

    #[tokio::test]
    async fn health_fails_without_schema() {
        let tmp = TempDir::new().unwrap();
        let catalog = SqliteCatalog::open(&tmp.path().join("catalog.sqlite"))
            .await
            .unwrap();
        assert!(catalog.health().await.is_err());
        catalog.prepare().await.unwrap();
        assert!(catalog.health().await.unwrap().contains("0 rows"));
    }
}

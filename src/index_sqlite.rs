//! SQLite FTS5 search index.
//!
//! Offline substitute for Typesense. Documents live in the `templates_fts`
//! virtual table; FTS5 has no upsert, so each document is deleted and
//! re-inserted inside one transaction per batch.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};

use crate::db;
use crate::migrate;
use crate::models::{SearchDocument, SearchHit};
use crate::traits::SearchIndex;

pub struct SqliteIndex {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteIndex {
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }
}

/// Turn free text into an FTS5 query of quoted terms, so user input can't
/// inject `NEAR`, column filters, or unbalanced quotes.
fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

#[async_trait]
impl SearchIndex for SqliteIndex {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn prepare(&self) -> Result<()> {
        migrate::create_search_schema(&self.pool).await
    }

    async fn upsert(&self, docs: &[SearchDocument]) -> Result<Vec<Result<(), String>>> {
        let mut tx = self.pool.begin().await?;

        for doc in docs {
            sqlx::query("DELETE FROM templates_fts WHERE template_id = ?")
                .bind(&doc.id)
                .execute(&mut *tx)
                .await?;

            let category = match &doc.subcategory {
                Some(sub) => format!("{} {}", doc.category, sub),
                None => doc.category.clone(),
            };
            sqlx::query(
                "INSERT INTO templates_fts (template_id, source_path, title, category, variables, preview) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&doc.id)
            .bind(&doc.source_path)
            .bind(&doc.title)
            .bind(&category)
            .bind(doc.variables.join(" "))
            .bind(&doc.preview)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to index {}", doc.source_path))?;
        }

        tx.commit().await?;
        Ok(docs.iter().map(|_| Ok(())).collect())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let Some(fts) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT template_id, title, category, source_path, rank
            FROM templates_fts
            WHERE templates_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&fts)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let hits = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                SearchHit {
                    id: row.get("template_id"),
                    title: row.get("title"),
                    category: row.get("category"),
                    source_path: row.get("source_path"),
                    score: -rank, // bm25: lower is better
                }
            })
            .collect();
        Ok(hits)
    }

    async fn health(&self) -> Result<String> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM templates_fts")
            .fetch_one(&self.pool)
            .await
            .with_context(|| {
                format!(
                    "{} has no search table; run `nyaya-import init`",
                    self.path.display()
                )
            })?;
        Ok(format!("{} ({} documents)", self.path.display(), count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(id: &str, title: &str, vars: &[&str]) -> SearchDocument {
        SearchDocument {
            id: id.to_string(),
            title: title.to_string(),
            category: "Property".to_string(),
            subcategory: Some("Lease".to_string()),
            variables: vars.iter().map(|v| v.to_string()).collect(),
            variable_count: vars.len() as i64,
            preview: format!("This {} is made between the parties", title),
            source_path: format!("Property/Lease/{}.docx", id),
        }
    }

    #[test]
    fn fts_query_quotes_terms() {
        assert_eq!(
            fts_query("rent agreement").as_deref(),
            Some("\"rent\" \"agreement\"")
        );
        assert_eq!(
            fts_query("title:\"x\" NEAR(").as_deref(),
            Some("\"title\" \"x\" \"NEAR\"")
        );
        assert_eq!(fts_query("  -- ** "), None);
    }

    #[tokio::test]
    async fn upsert_replaces_and_search_ranks() {
        let tmp = TempDir::new().unwrap();
        let index = SqliteIndex::open(&tmp.path().join("search.sqlite"))
            .await
            .unwrap();
        index.prepare().await.unwrap();
        index.prepare().await.unwrap();

        let results = index
            .upsert(&[
                doc("a", "Rent Agreement", &["tenant_name", "monthly_rent"]),
                doc("b", "Sale Deed", &["buyer_name"]),
            ])
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.is_ok()));

        index
            .upsert(&[doc("a", "Leave and License Agreement", &["licensee_name"])])
            .await
            .unwrap();

        let hits = index.search("agreement", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].title, "Leave and License Agreement");

        assert!(index.search("tenant_name", 10).await.unwrap().is_empty());
        let by_var = index.search("buyer", 10).await.unwrap();
        assert_eq!(by_var.len(), 1);
        assert_eq!(by_var[0].id, "b");
        assert!(by_var[0].score.is_finite());

        assert!(index.health().await.unwrap().contains("2 documents"));
    }
}

//! Supabase (PostgREST) template catalog.
//!
//! Writes rows to the project's `templates` table through the REST API,
//! using a bulk upsert keyed on `id`:
//!
//! ```text
//! POST {url}/rest/v1/{table}?on_conflict=id
//! Prefer: resolution=merge-duplicates,return=minimal
//! ```
//!
//! The table is owned by the app's migrations; `prepare()` does nothing.
//! Credentials: `SUPABASE_SERVICE_ROLE_KEY` (bypasses row-level security).

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::{require_env, CatalogConfig};
use crate::http::{base_url, HttpClient};
use crate::models::TemplateRecord;
use crate::traits::TemplateCatalog;

pub struct PostgrestCatalog {
    http: HttpClient,
    endpoint: String,
    service_key: String,
}

impl PostgrestCatalog {
    pub fn new(config: &CatalogConfig, http: HttpClient) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("catalog.url is required for the postgrest backend"))?;
        Ok(Self {
            http,
            endpoint: format!("{}/rest/v1/{}", base_url(url), config.table),
            service_key: require_env("SUPABASE_SERVICE_ROLE_KEY")?,
        })
    }
}

/// Row shape expected by the `templates` table; `variables` is a `jsonb` column.
fn to_row(record: &TemplateRecord) -> serde_json::Value {
    serde_json::json!({
        "id": record.id,
        "title": record.title,
        "slug": record.slug,
        "category": record.category,
        "subcategory": record.subcategory,
        "source_path": record.source_path,
        "storage_path": record.storage_path,
        "file_size": record.file_size,
        "content_hash": record.content_hash,
        "variables": record.variables,
        "variable_count": record.variable_count,
        "word_count": record.word_count,
        "preview": record.preview,
        "imported_at": record.imported_at,
    })
}

/// Total from a `Content-Range` header: `0-24/3300` or `*/3300`.
fn parse_content_range_total(header: &str) -> Option<i64> {
    header.rsplit('/').next()?.trim().parse().ok()
}

#[async_trait]
impl TemplateCatalog for PostgrestCatalog {
    fn name(&self) -> &str {
        "postgrest"
    }

    async fn upsert(&self, records: &[TemplateRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let rows: Vec<serde_json::Value> = records.iter().map(to_row).collect();
        let url = format!("{}?on_conflict=id", self.endpoint);
        self.http
            .send(&format!("catalog upsert ({} rows)", rows.len()), |client| {
                client
                    .post(&url)
                    .bearer_auth(&self.service_key)
                    .header("apikey", &self.service_key)
                    .header("Prefer", "resolution=merge-duplicates,return=minimal")
                    .json(&rows)
            })
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let url = format!("{}?select=id&limit=1", self.endpoint);
        let response = self
            .http
            .send("catalog count", |client| {
                client
                    .get(&url)
                    .bearer_auth(&self.service_key)
                    .header("apikey", &self.service_key)
                    .header("Prefer", "count=exact")
            })
            .await?;
        let range = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .context("catalog count: response has no Content-Range header")?;
        parse_content_range_total(range)
            .with_context(|| format!("catalog count: unparseable Content-Range '{}'", range))
    }

    async fn health(&self) -> Result<String> {
        let count = self.count().await?;
        Ok(format!("{} ({} rows)", self.endpoint, count))
    }
}

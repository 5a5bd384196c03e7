//! Backend traits for the three sinks of an import.
//!
//! ```text
//!            ┌────────────┐   ┌──────────────┐   ┌─────────────┐
//! docx ────▶ │ ObjectStore│──▶│TemplateCatalog│──▶│ SearchIndex │
//!            │ fs/supabase│   │sqlite/postgrest│  │sqlite/typesense│
//!            │ /s3        │   └──────────────┘   └─────────────┘
//!            └────────────┘
//! ```
//!
//! Every write is an upsert keyed by the template's stable ID (or a path
//! derived from it), so replaying a batch after a crash is harmless.
//! Backends are built from config by [`crate::backends`].

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{SearchDocument, SearchHit, TemplateRecord};

/// Binary storage for the original `.docx` files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name for status output (e.g. `"supabase"`).
    fn name(&self) -> &str;

    /// Human-readable location of an object (`s3://bucket/key`, a file path, a URL).
    fn locate(&self, path: &str) -> String;

    /// Create buckets/directories if the backend needs it. Idempotent.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Write `bytes` at `path`, replacing any existing object.
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Check connectivity and credentials.
    async fn health(&self) -> Result<String>;
}

/// Relational metadata for each template.
#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    fn name(&self) -> &str;

    /// Create tables if the backend owns its schema. Idempotent.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Insert or update records by `id`.
    async fn upsert(&self, records: &[TemplateRecord]) -> Result<()>;

    async fn count(&self) -> Result<i64>;

    async fn health(&self) -> Result<String>;
}

/// Full-text search index over template metadata.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Create the collection/table if missing. Idempotent.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Upsert documents. The outer error means the whole call failed; the
    /// inner results line up with `docs` and report per-document failures.
    async fn upsert(&self, docs: &[SearchDocument]) -> Result<Vec<Result<(), String>>>;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;

    async fn health(&self) -> Result<String>;
}

/// Search backend used when `search.backend = "disabled"`.
pub struct DisabledIndex;

#[async_trait]
impl SearchIndex for DisabledIndex {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn upsert(&self, docs: &[SearchDocument]) -> Result<Vec<Result<(), String>>> {
        Ok(docs.iter().map(|_| Ok(())).collect())
    }

    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchHit>> {
        anyhow::bail!("Search is disabled. Set [search] backend in config.")
    }

    async fn health(&self) -> Result<String> {
        Ok("disabled".to_string())
    }
}

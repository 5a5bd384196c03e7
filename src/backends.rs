//! Construct the configured backends and the `init` / `backends` commands.

use anyhow::{Context, Result};

use crate::catalog_postgrest::PostgrestCatalog;
use crate::catalog_sqlite::SqliteCatalog;
use crate::config::Config;
use crate::http::HttpClient;
use crate::index_sqlite::SqliteIndex;
use crate::index_typesense::TypesenseIndex;
use crate::store_fs::FsStore;
use crate::store_s3::S3Store;
use crate::store_supabase::SupabaseStore;
use crate::traits::{DisabledIndex, ObjectStore, SearchIndex, TemplateCatalog};

pub struct Backends {
    pub store: Box<dyn ObjectStore>,
    pub catalog: Box<dyn TemplateCatalog>,
    pub index: Box<dyn SearchIndex>,
}

impl Backends {
    /// Build all three backends. Fails if a required secret is missing.
    pub async fn build(config: &Config) -> Result<Self> {
        let http = HttpClient::new(&config.http)?;
        Ok(Self {
            store: build_store(config, &http)?,
            catalog: build_catalog(config, &http).await?,
            index: build_index(config, &http).await?,
        })
    }

    /// Create whatever each backend owns (dirs, tables, collections).
    pub async fn prepare(&self) -> Result<()> {
        self.store
            .prepare()
            .await
            .with_context(|| format!("Failed to prepare {} storage", self.store.name()))?;
        self.catalog
            .prepare()
            .await
            .with_context(|| format!("Failed to prepare {} catalog", self.catalog.name()))?;
        self.index
            .prepare()
            .await
            .with_context(|| format!("Failed to prepare {} search index", self.index.name()))?;
        Ok(())
    }
}

pub fn build_store(config: &Config, http: &HttpClient) -> Result<Box<dyn ObjectStore>> {
    let store: Box<dyn ObjectStore> = match config.storage.backend.as_str() {
        "fs" => Box::new(FsStore::new(&config.storage)?),
        "supabase" => Box::new(SupabaseStore::new(&config.storage, http.clone())?),
        "s3" => Box::new(S3Store::new(&config.storage, http.clone())?),
        other => anyhow::bail!("Unknown storage backend: '{}'", other),
    };
    Ok(store)
}

pub async fn build_catalog(config: &Config, http: &HttpClient) -> Result<Box<dyn TemplateCatalog>> {
    let catalog: Box<dyn TemplateCatalog> = match config.catalog.backend.as_str() {
        "sqlite" => {
            let path = config
                .catalog
                .path
                .as_deref()
                .context("catalog.path is required for the sqlite backend")?;
            Box::new(SqliteCatalog::open(path).await?)
        }
        "postgrest" => Box::new(PostgrestCatalog::new(&config.catalog, http.clone())?),
        other => anyhow::bail!("Unknown catalog backend: '{}'", other),
    };
    Ok(catalog)
}

pub async fn build_index(config: &Config, http: &HttpClient) -> Result<Box<dyn SearchIndex>> {
    let index: Box<dyn SearchIndex> = match config.search.backend.as_str() {
        "disabled" => Box::new(DisabledIndex),
        "sqlite" => {
            let path = config
                .search
                .path
                .as_deref()
                .context("search.path is required for the sqlite backend")?;
            Box::new(SqliteIndex::open(path).await?)
        }
        "typesense" => Box::new(TypesenseIndex::new(&config.search, http.clone())?),
        other => anyhow::bail!("Unknown search backend: '{}'", other),
    };
    Ok(index)
}

pub async fn run_init(config: &Config) -> Result<()> {
    let backends = Backends::build(config).await?;
    backends.prepare().await?;

    println!("storage: {} ready", backends.store.name());
    println!("catalog: {} ready", backends.catalog.name());
    println!("search:  {} ready", backends.index.name());
    println!("ok");
    Ok(())
}

/// Print a health table; returns an error if any backend is unhealthy.
pub async fn run_backends(config: &Config) -> Result<()> {
    let backends = Backends::build(config).await?;

    let checks = [
        ("storage", backends.store.name(), backends.store.health().await),
        ("catalog", backends.catalog.name(), backends.catalog.health().await),
        ("search", backends.index.name(), backends.index.health().await),
    ];

    println!("{:<10} {:<12} {:<8} DETAIL", "ROLE", "BACKEND", "HEALTHY");
    let mut unhealthy = 0;
    for (role, name, result) in &checks {
        match result {
            Ok(detail) => println!("{:<10} {:<12} {:<8} {}", role, name, "true", detail),
            Err(e) => {
                unhealthy += 1;
                println!("{:<10} {:<12} {:<8} {:#}", role, name, "false", e);
            }
        }
    }

    if unhealthy > 0 {
        anyhow::bail!("{} backend(s) unhealthy", unhealthy);
    }
    Ok(())
}

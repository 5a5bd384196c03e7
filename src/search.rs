//! `search` command: query the configured index to verify an import.

use anyhow::{bail, Result};

use crate::backends::build_index;
use crate::config::Config;
use crate::http::HttpClient;

pub async fn run_search(config: &Config, query: &str, limit: usize) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    if !config.search.is_enabled() {
        bail!("Search is disabled. Set [search] backend in config.");
    }

    let http = HttpClient::new(&config.http)?;
    let index = build_index(config, &http).await?;
    let hits = index.search(query, limit).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.2}] {} / {}", i + 1, hit.score, hit.category, hit.title);
        println!("    source: {}", hit.source_path);
        println!("    id: {}", hit.id);
        println!();
    }
    Ok(())
}

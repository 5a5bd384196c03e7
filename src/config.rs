//! TOML configuration parsing and validation.
//!
//! The importer is configured by a single TOML file (default
//! `./config/import.toml`). Backend credentials are never read from the file;
//! they come from the environment (optionally seeded from a `.env` file).
//!
//! ```toml
//! [import]
//! roots = ["./templates"]
//! ledger_path = "./data/import-ledger.json"
//!
//! [storage]
//! backend = "supabase"
//! url = "https://abcd.supabase.co"
//! bucket = "templates"
//!
//! [catalog]
//! backend = "postgrest"
//! url = "https://abcd.supabase.co"
//!
//! [search]
//! backend = "typesense"
//! url = "http://localhost:8108"
//! ```

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default pattern: `{{ client_name }}`.
pub const DEFAULT_VARIABLE_PATTERN: &str = r"\{\{\s*([^{}]+?)\s*\}\}";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub import: ImportConfig,
    #[serde(default)]
    pub variables: VariablesConfig,
    pub storage: StorageConfig,
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    pub roots: Vec<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.docx".to_string()]
}
fn default_batch_size() -> usize {
    25
}
fn default_concurrency() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_max_file_bytes() -> u64 {
    20 * 1024 * 1024
}
fn default_ledger_path() -> PathBuf {
    PathBuf::from("./data/import-ledger.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct VariablesConfig {
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub merge_fields: bool,
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,
}

impl Default for VariablesConfig {
    fn default() -> Self {
        Self {
            patterns: default_patterns(),
            merge_fields: true,
            max_name_len: default_max_name_len(),
        }
    }
}

fn default_patterns() -> Vec<String> {
    vec![DEFAULT_VARIABLE_PATTERN.to_string()]
}
fn default_true() -> bool {
    true
}
fn default_max_name_len() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    /// Target directory for the `fs` backend.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Supabase project URL for the `supabase` backend.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// S3-compatible endpoint (MinIO, LocalStack); enables path-style addressing.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_bucket() -> String {
    "templates".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    pub backend: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_table")]
    pub table: String,
}

fn default_table() -> String {
    "templates".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_backend")]
    pub backend: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: default_search_backend(),
            path: None,
            url: None,
            collection: default_collection(),
        }
    }
}

impl SearchConfig {
    pub fn is_enabled(&self) -> bool {
        self.backend != "disabled"
    }
}

fn default_search_backend() -> String {
    "disabled".to_string()
}
fn default_collection() -> String {
    "templates".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}

/// Read a required secret from the environment.
pub fn require_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => bail!("{} environment variable not set", name),
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let import = &config.import;
    if import.roots.is_empty() {
        bail!("import.roots must list at least one directory");
    }
    if import.batch_size == 0 {
        bail!("import.batch_size must be > 0");
    }
    if import.concurrency == 0 {
        bail!("import.concurrency must be > 0");
    }
    if import.max_attempts == 0 {
        bail!("import.max_attempts must be > 0");
    }
    if import.include_globs.is_empty() {
        bail!("import.include_globs must not be empty");
    }

    if config.variables.patterns.is_empty() && !config.variables.merge_fields {
        bail!("variables.patterns is empty and merge_fields is off; nothing would be extracted");
    }
    for pattern in &config.variables.patterns {
        let re = Regex::new(pattern)
            .with_context(|| format!("Invalid variables.patterns entry: {}", pattern))?;
        // captures_len counts the implicit whole-match group
        if re.captures_len() != 2 {
            bail!(
                "variables.patterns entry '{}' must have exactly one capture group",
                pattern
            );
        }
    }

    let storage = &config.storage;
    match storage.backend.as_str() {
        "fs" => {
            if storage.root.is_none() {
                bail!("storage.root is required when storage.backend = 'fs'");
            }
        }
        "supabase" => {
            if storage.url.is_none() {
                bail!("storage.url is required when storage.backend = 'supabase'");
            }
        }
        "s3" => {}
        other => bail!(
            "Unknown storage backend: '{}'. Must be fs, supabase, or s3.",
            other
        ),
    }
    if storage.bucket.trim().is_empty() {
        bail!("storage.bucket must not be empty");
    }

    let catalog = &config.catalog;
    match catalog.backend.as_str() {
        "sqlite" => {
            if catalog.path.is_none() {
                bail!("catalog.path is required when catalog.backend = 'sqlite'");
            }
        }
        "postgrest" => {
            if catalog.url.is_none() {
                bail!("catalog.url is required when catalog.backend = 'postgrest'");
            }
        }
        other => bail!(
            "Unknown catalog backend: '{}'. Must be sqlite or postgrest.",
            other
        ),
    }

    let search = &config.search;
    match search.backend.as_str() {
        "disabled" => {}
        "sqlite" => {
            if search.path.is_none() {
                bail!("search.path is required when search.backend = 'sqlite'");
            }
        }
        "typesense" => {
            if search.url.is_none() {
                bail!("search.url is required when search.backend = 'typesense'");
            }
        }
        other => bail!(
            "Unknown search backend: '{}'. Must be disabled, sqlite, or typesense.",
            other
        ),
    }

    if config.http.timeout_secs == 0 {
        bail!("http.timeout_secs must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    const MINIMAL: &str = r#"
[import]
roots = ["./templates"]

[storage]
backend = "fs"
root = "./data/objects"

[catalog]
backend = "sqlite"
path = "./data/catalog.sqlite"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.import.batch_size, 25);
        assert_eq!(config.import.concurrency, 4);
        assert_eq!(config.import.max_attempts, 3);
        assert_eq!(config.import.include_globs, vec!["**/*.docx"]);
        assert_eq!(config.storage.bucket, "templates");
        assert!(!config.search.is_enabled());
        assert_eq!(config.variables.patterns, vec![DEFAULT_VARIABLE_PATTERN]);
        assert!(config.variables.merge_fields);
    }

    #[test]
    fn rejects_unknown_storage_backend() {
        let bad = MINIMAL.replace("backend = \"fs\"", "backend = \"ftp\"");
        let err = parse(&bad).unwrap_err().to_string();
        assert!(err.contains("Unknown storage backend"), "{}", err);
    }

    #[test]
    fn rejects_zero_batch_size() {
        let bad = MINIMAL.replace(
            "roots = [\"./templates\"]",
            "roots = [\"./templates\"]\nbatch_size = 0",
        );
        assert!(parse(&bad).is_err());
    }

    #[test]
    fn rejects_pattern_without_single_group() {
        let bad = format!("{}\n[variables]\npatterns = ['\\[\\[\\w+\\]\\]']\n", MINIMAL);
        let err = parse(&bad).unwrap_err().to_string();
        assert!(err.contains("capture group"), "{}", err);
    }

    #[test]
    fn typesense_requires_url() {
        let bad = format!("{}\n[search]\nbackend = \"typesense\"\n", MINIMAL);
        let err = parse(&bad).unwrap_err().to_string();
        assert!(err.contains("search.url"), "{}", err);
    }

    #[test]
    fn postgrest_catalog_parses() {
        let cfg = MINIMAL.replace(
            "backend = \"sqlite\"\npath = \"./data/catalog.sqlite\"",
            "backend = \"postgrest\"\nurl = \"https://abcd.supabase.co\"",
        );
        let config = parse(&cfg).unwrap();
        assert_eq!(config.catalog.backend, "postgrest");
        assert_eq!(config.catalog.table, "templates");
    }

    #[test]
    fn example_config_is_valid() {
        let config = parse(include_str!("../config/import.example.toml")).unwrap();
        assert_eq!(config.variables.patterns.len(), 2);
        assert_eq!(config.search.backend, "sqlite");
        assert_eq!(config.import.exclude_globs, vec!["**/Drafts/**"]);
    }
}

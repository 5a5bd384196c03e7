//! # NyayaMitra template importer
//!
//! Bulk, resumable import of `.docx` legal templates into the NyayaMitra
//! catalog. Walks template folders, extracts fillable variables, uploads the
//! original files to object storage, upserts catalog rows, and indexes each
//! template for search, keeping a persisted ledger of what is done and what
//! failed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌──────────────┐   ┌───────────────────────────────┐
//! │  scan   │──▶│   pipeline   │──▶│ storage → catalog → search    │
//! │ walkdir │   │ extract+vars │   │ fs/s3/supabase  sqlite/rest   │
//! └─────────┘   └──────┬───────┘   └───────────────────────────────┘
//!                      │
//!                      ▼
//!                ┌──────────┐
//!                │  ledger  │  import-ledger.json (+ .lock)
//!                └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! nyaya-import init                 # create storage dir, tables, collection
//! nyaya-import scan                 # what would be imported
//! nyaya-import run --progress human # import; rerun to resume
//! nyaya-import status               # completed / failed counts
//! nyaya-import search "rent agreement"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`scan`] | Directory scanner and stable template IDs |
//! | [`extract`] | `.docx` text and field extraction |
//! | [`variables`] | Template variable detection |
//! | [`traits`] | Storage, catalog, and search backend traits |
//! | [`store_fs`] / [`store_supabase`] / [`store_s3`] | Object storage backends |
//! | [`catalog_sqlite`] / [`catalog_postgrest`] | Catalog backends |
//! | [`index_sqlite`] / [`index_typesense`] | Search backends |
//! | [`backends`] | Build backends from config; `init` and `backends` commands |
//! | [`ledger`] | Persisted progress/error ledger and run lock |
//! | [`pipeline`] | Import orchestration |
//! | [`progress`] | Progress reporting on stderr |
//! | [`http`] | Shared HTTP client with retry |

pub mod backends;
pub mod catalog_postgrest;
pub mod catalog_sqlite;
pub mod config;
pub mod db;
pub mod extract;
pub mod http;
pub mod index_sqlite;
pub mod index_typesense;
pub mod inspect;
pub mod ledger;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod scan;
pub mod search;
pub mod status;
pub mod store_fs;
pub mod store_s3;
pub mod store_supabase;
pub mod traits;
pub mod variables;

//! # NyayaMitra importer CLI (`nyaya-import`)
//!
//! ## Usage
//!
//! ```bash
//! nyaya-import --config ./config/import.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nyaya-import init` | Prepare storage, catalog tables, and search collection |
//! | `nyaya-import backends` | Health-check the configured backends |
//! | `nyaya-import scan` | List templates an import would pick up |
//! | `nyaya-import inspect <file>` | Show title, words, and variables of one `.docx` |
//! | `nyaya-import run` | Import (resumable; rerun to continue) |
//! | `nyaya-import status` | Summarize the ledger |
//! | `nyaya-import retry <path>` | Clear a failure so the next run retries it |
//! | `nyaya-import search "<query>"` | Query the search index |
//!
//! Secrets come from the environment (or `.env`): `SUPABASE_SERVICE_ROLE_KEY`,
//! `TYPESENSE_API_KEY`, `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`.
//! Logging goes to stderr and is controlled with `RUST_LOG`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use nyaya_import::config::{self, VariablesConfig};
use nyaya_import::pipeline::{self, RunOptions};
use nyaya_import::progress::ProgressMode;
use nyaya_import::{backends, inspect, scan, search, status};

/// NyayaMitra template importer: resumable bulk import of `.docx` legal
/// templates into storage, catalog, and search.
#[derive(Parser)]
#[command(name = "nyaya-import", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/import.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare backends: storage directory, catalog tables, search collection.
    ///
    /// Idempotent; safe to run before every import.
    Init,

    /// Health-check the configured storage, catalog, and search backends.
    Backends,

    /// List the templates an import would pick up.
    Scan {
        /// One JSON object per template on stdout.
        #[arg(long)]
        json: bool,
    },

    /// Extract and print one `.docx` file's title, word count, and variables.
    ///
    /// Uses `[variables]` from the config if it loads, otherwise defaults.
    Inspect {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Run the import.
    ///
    /// Skips templates the ledger marks completed and unchanged, retries
    /// failures up to `import.max_attempts`, and saves the ledger after
    /// every batch. Interrupting with Ctrl-C finishes the current batch.
    Run {
        /// Ignore the ledger and reprocess every template.
        #[arg(long)]
        fresh: bool,

        /// Scan, plan, and extract without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of templates to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Override `import.batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Also retry templates that used up their attempts.
        #[arg(long)]
        retry_failed: bool,

        /// Take over a stale run lock left by a crashed import.
        #[arg(long)]
        force: bool,

        /// Exit non-zero if any template is exhausted, even if skipped.
        #[arg(long)]
        strict: bool,

        /// Progress on stderr: auto, human, json, off.
        #[arg(long, default_value = "auto")]
        progress: String,
    },

    /// Summarize the ledger: completed, failed, exhausted, recent failures.
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Clear recorded failures so the next run retries them.
    Retry {
        /// Source path (as shown by `status`) or template ID.
        target: Option<String>,

        /// Clear every failure.
        #[arg(long)]
        all: bool,
    },

    /// Query the configured search index.
    Search {
        query: String,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; secrets may already be in the environment.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Inspect { file, json } = &cli.command {
        let variables = if cli.config.exists() {
            config::load_config(&cli.config)?.variables
        } else {
            VariablesConfig::default()
        };
        inspect::run_inspect(file, &variables, *json)?;
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            backends::run_init(&cfg).await?;
        }
        Commands::Backends => {
            backends::run_backends(&cfg).await?;
        }
        Commands::Scan { json } => {
            scan::run_scan(&cfg.import, json)?;
        }
        Commands::Run {
            fresh,
            dry_run,
            limit,
            batch_size,
            retry_failed,
            force,
            strict,
            progress,
        } => {
            let mode = ProgressMode::parse(&progress)?;
            let reporter = mode.reporter();
            let options = RunOptions {
                fresh,
                dry_run,
                limit,
                batch_size,
                retry_failed,
                force,
            };
            let summary = pipeline::run_import(&cfg, &options, reporter.as_ref()).await?;
            pipeline::print_summary(&summary);
            if summary.is_failure(strict) {
                anyhow::bail!(
                    "import finished with {} failure(s), {} exhausted; see `nyaya-import status`",
                    summary.failed,
                    summary.skipped_exhausted
                );
            }
        }
        Commands::Status { json } => {
            status::run_status(&cfg, json)?;
        }
        Commands::Retry { target, all } => {
            status::run_retry(&cfg, target.as_deref(), all)?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Inspect { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

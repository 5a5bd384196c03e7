//! Import pipeline orchestration.
//!
//! Coordinates one import run:
//!
//! ```text
//! scan → plan (ledger) → per batch:
//!     [concurrent] read → hash → extract → variables → upload
//!     catalog upsert (batch, then per-record fallback)
//!     search upsert (per-document results)
//!     ledger marks → ledger save
//! ```
//!
//! A template is marked completed only after all three sinks accepted it.
//! Every sink write is an upsert by stable ID, so a crash between a write
//! and the ledger save costs a redo, never a duplicate. Ctrl-C finishes the
//! current batch, saves, and stops.

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::backends::Backends;
use crate::config::Config;
use crate::extract::extract_docx;
use crate::ledger::{Decision, Ledger, RunLock, Stage};
use crate::models::{slugify, SearchDocument, TemplateFile, TemplateRecord, MIME_DOCX};
use crate::progress::{ImportProgressEvent, ImportProgressReporter};
use crate::scan::scan_templates;
use crate::traits::{ObjectStore, SearchIndex, TemplateCatalog};
use crate::variables::VariableExtractor;

const PREVIEW_CHARS: usize = 280;

/// Flags for a single `run`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Ignore the ledger and reprocess everything.
    pub fresh: bool,
    /// Scan, plan, and extract only. Nothing is written.
    pub dry_run: bool,
    pub limit: Option<usize>,
    pub batch_size: Option<usize>,
    /// Also retry templates that used up `max_attempts`.
    pub retry_failed: bool,
    /// Take over a stale run lock.
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub discovered: usize,
    pub skipped_unchanged: usize,
    pub skipped_exhausted: usize,
    pub pending: usize,
    pub imported: usize,
    /// Touched on disk but byte-identical to what was imported.
    pub content_unchanged: usize,
    pub failed: usize,
    pub variables_found: usize,
    pub interrupted: bool,
    pub dry_run: bool,
    pub catalog_rows: Option<i64>,
}

impl ImportSummary {
    /// Whether the run should exit non-zero. `strict` also counts templates
    /// skipped because they used up their attempts.
    pub fn is_failure(&self, strict: bool) -> bool {
        self.failed > 0 || (strict && self.skipped_exhausted > 0)
    }
}

/// A failure pinned to the stage it happened in.
#[derive(Debug, thiserror::Error)]
#[error("{stage}: {message}")]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
}

impl StageError {
    fn new(stage: Stage, err: impl std::fmt::Display) -> Self {
        Self {
            stage,
            message: err.to_string(),
        }
    }

    fn from_anyhow(stage: Stage, err: &anyhow::Error) -> Self {
        Self {
            stage,
            message: format!("{:#}", err),
        }
    }
}

/// Result of the concurrent per-file stages.
enum Prepared {
    /// Ready for the catalog and index.
    Ready {
        file: TemplateFile,
        record: TemplateRecord,
    },
    /// Same bytes as the completed entry; only the stat changed.
    SameContent { file: TemplateFile },
    Failed { file: TemplateFile, error: StageError },
}

struct FileContext<'a> {
    config: &'a Config,
    extractor: &'a VariableExtractor,
    store: Option<&'a dyn ObjectStore>,
    ledger: &'a Ledger,
    fresh: bool,
}

pub async fn run_import(
    config: &Config,
    options: &RunOptions,
    progress: &dyn ImportProgressReporter,
) -> Result<ImportSummary> {
    let import = &config.import;
    let extractor = VariableExtractor::from_config(&config.variables)?;
    let batch_size = options.batch_size.unwrap_or(import.batch_size).max(1);

    // Lock before reading the ledger so nobody writes it underneath us.
    let _lock = if options.dry_run {
        None
    } else {
        Some(RunLock::acquire(&import.ledger_path, options.force)?)
    };

    let mut ledger = if options.fresh {
        Ledger::fresh(&import.ledger_path)
    } else {
        Ledger::load_or_create(&import.ledger_path)?
    };

    for root in &import.roots {
        progress.report(ImportProgressEvent::Scanning {
            root: root.display().to_string(),
        });
    }
    let files = scan_templates(import)?;

    let mut summary = ImportSummary {
        discovered: files.len(),
        dry_run: options.dry_run,
        ..Default::default()
    };

    let mut pending = Vec::new();
    for file in files {
        match ledger.decide(&file, import.max_attempts) {
            decision if decision.needs_processing() => pending.push(file),
            Decision::Exhausted { .. } if options.retry_failed => pending.push(file),
            Decision::Exhausted { attempts } => {
                tracing::debug!(path = %file.source_path, attempts, "skipping exhausted template");
                summary.skipped_exhausted += 1;
            }
            _ => summary.skipped_unchanged += 1,
        }
    }
    if let Some(limit) = options.limit {
        pending.truncate(limit);
    }
    summary.pending = pending.len();
    progress.report(ImportProgressEvent::Planned {
        discovered: summary.discovered as u64,
        pending: pending.len() as u64,
    });

    let backends = if options.dry_run {
        None
    } else {
        let backends = Backends::build(config).await?;
        backends.prepare().await?;
        ledger.begin_run();
        Some(backends)
    };

    let stop = Arc::new(AtomicBool::new(false));
    let signal_task = {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; finishing current batch");
                stop.store(true, Ordering::SeqCst);
            }
        })
    };

    let total = pending.len() as u64;
    let mut processed = 0u64;

    for (batch_no, batch) in pending.chunks(batch_size).enumerate() {
        if stop_requested(&stop, &mut summary) {
            break;
        }
        tracing::info!(batch = batch_no + 1, files = batch.len(), "processing batch");

        let ctx = FileContext {
            config,
            extractor: &extractor,
            store: backends.as_ref().map(|b| b.store.as_ref()),
            ledger: &ledger,
            fresh: options.fresh,
        };
        let mut prepared: Vec<Prepared> = stream::iter(batch.iter().cloned())
            .map(|file| prepare_file(&ctx, file))
            .buffer_unordered(import.concurrency)
            .collect()
            .await;
        prepared.sort_by(|a, b| source_of(a).cmp(source_of(b)));

        let mut ready = Vec::new();
        for item in prepared {
            match item {
                Prepared::Ready { file, record } => ready.push((file, record)),
                Prepared::SameContent { file } => {
                    summary.content_unchanged += 1;
                    if !options.dry_run {
                        ledger.refresh_stat(&file);
                    }
                }
                Prepared::Failed { file, error } => {
                    summary.failed += 1;
                    record_failure(&mut ledger, &file, &error, options.dry_run);
                }
            }
        }

        match &backends {
            None => {
                for (_, record) in &ready {
                    summary.imported += 1;
                    summary.variables_found += record.variables.len();
                }
            }
            Some(backends) => {
                let outcomes =
                    publish(backends.catalog.as_ref(), backends.index.as_ref(), ready).await;
                for (file, record, result) in outcomes {
                    match result {
                        Ok(()) => {
                            summary.imported += 1;
                            summary.variables_found += record.variables.len();
                            ledger.mark_completed(
                                &file,
                                &record.content_hash,
                                &record.storage_path,
                                record.variables.len(),
                            );
                        }
                        Err(error) => {
                            summary.failed += 1;
                            record_failure(&mut ledger, &file, &error, false);
                        }
                    }
                }
                ledger.save()?;
            }
        }

        processed += batch.len() as u64;
        progress.report(ImportProgressEvent::Importing {
            n: processed,
            total,
            failed: summary.failed as u64,
        });
    }

    signal_task.abort();
    // Ctrl-C during the last batch
    stop_requested(&stop, &mut summary);

    if let Some(backends) = &backends {
        if pending.is_empty() {
            // Record the run even when there was nothing to do.
            ledger.save()?;
        }
        summary.catalog_rows = match backends.catalog.count().await {
            Ok(n) => Some(n),
            Err(e) => {
                let error = format!("{:#}", e);
                tracing::warn!(%error, "could not count catalog rows");
                None
            }
        };
    }

    Ok(summary)
}

fn stop_requested(stop: &AtomicBool, summary: &mut ImportSummary) -> bool {
    let stopped = stop.load(Ordering::SeqCst);
    if stopped {
        summary.interrupted = true;
    }
    stopped
}

fn source_of(item: &Prepared) -> &str {
    match item {
        Prepared::Ready { file, .. }
        | Prepared::SameContent { file }
        | Prepared::Failed { file, .. } => &file.source_path,
    }
}

fn record_failure(ledger: &mut Ledger, file: &TemplateFile, error: &StageError, dry_run: bool) {
    if dry_run {
        tracing::warn!(path = %file.source_path, stage = %error.stage, error = %error.message, "template would fail");
        return;
    }
    let attempts = ledger.mark_failed(file, error.stage, &error.message);
    tracing::warn!(
        path = %file.source_path,
        stage = %error.stage,
        attempts,
        error = %error.message,
        "template failed"
    );
}

pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn storage_path(prefix: &str, file: &TemplateFile) -> String {
    let mut category = slugify(&file.category);
    if category.is_empty() {
        category = "uncategorized".to_string();
    }
    format!("{}{}/{}.docx", prefix, category, file.id)
}

/// Read, hash, extract, and upload one template.
async fn prepare_file(ctx: &FileContext<'_>, file: TemplateFile) -> Prepared {
    match prepare_file_inner(ctx, &file).await {
        Ok(Some(record)) => Prepared::Ready { file, record },
        Ok(None) => Prepared::SameContent { file },
        Err(error) => Prepared::Failed { file, error },
    }
}

async fn prepare_file_inner(
    ctx: &FileContext<'_>,
    file: &TemplateFile,
) -> Result<Option<TemplateRecord>, StageError> {
    let max_bytes = ctx.config.import.max_file_bytes;
    if file.size > max_bytes {
        return Err(StageError::new(
            Stage::Read,
            format!("file is {} bytes, over the {} byte limit", file.size, max_bytes),
        ));
    }

    let bytes = tokio::fs::read(&file.absolute_path)
        .await
        .map_err(|e| StageError::new(Stage::Read, e))?;
    if bytes.len() as u64 > max_bytes {
        return Err(StageError::new(
            Stage::Read,
            format!("file grew to {} bytes, over the {} byte limit", bytes.len(), max_bytes),
        ));
    }

    let hash = content_hash(&bytes);
    let object_path = storage_path(&ctx.config.storage.prefix, file);
    if !ctx.fresh && ctx.ledger.is_current(&file.id, &hash) {
        let stored = match ctx.store {
            Some(store) => store
                .exists(&object_path)
                .await
                .map_err(|e| StageError::from_anyhow(Stage::Upload, &e))?,
            None => true,
        };
        if stored {
            return Ok(None);
        }
        tracing::info!(path = %file.source_path, object = %object_path, "stored object missing; re-importing");
    }

    let (bytes, extracted) = tokio::task::spawn_blocking(move || {
        let extracted = extract_docx(&bytes);
        (bytes, extracted)
    })
    .await
    .map_err(|e| StageError::new(Stage::Extract, e))?;
    let content = extracted.map_err(|e| StageError::new(Stage::Extract, e))?;

    let variables = ctx.extractor.extract(&content);
    let record = TemplateRecord {
        id: file.id.clone(),
        title: file.title.clone(),
        slug: slugify(&file.title),
        category: file.category.clone(),
        subcategory: file.subcategory.clone(),
        source_path: file.source_path.clone(),
        storage_path: object_path,
        file_size: bytes.len() as i64,
        content_hash: hash,
        variable_count: variables.len() as i64,
        variables,
        word_count: content.word_count as i64,
        preview: content.preview(PREVIEW_CHARS),
        imported_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    };

    if let Some(store) = ctx.store {
        store
            .put(&record.storage_path, &bytes, MIME_DOCX)
            .await
            .map_err(|e| StageError::from_anyhow(Stage::Upload, &e))?;
        tracing::debug!(path = %file.source_path, object = %store.locate(&record.storage_path), "uploaded");
    }

    Ok(Some(record))
}

/// Push uploaded templates to the catalog, then the search index.
async fn publish(
    catalog: &dyn TemplateCatalog,
    index: &dyn SearchIndex,
    ready: Vec<(TemplateFile, TemplateRecord)>,
) -> Vec<(TemplateFile, TemplateRecord, Result<(), StageError>)> {
    if ready.is_empty() {
        return Vec::new();
    }

    let records: Vec<TemplateRecord> = ready.iter().map(|(_, r)| r.clone()).collect();
    let mut catalog_results: Vec<Result<(), StageError>> = Vec::with_capacity(records.len());
    match catalog.upsert(&records).await {
        Ok(()) => catalog_results.extend(records.iter().map(|_| Ok(()))),
        Err(batch_err) => {
            let error = format!("{:#}", batch_err);
            tracing::warn!(%error, "catalog batch upsert failed; retrying rows one at a time");
            for record in &records {
                let result = catalog
                    .upsert(std::slice::from_ref(record))
                    .await
                    .map_err(|e| StageError::from_anyhow(Stage::Catalog, &e));
                catalog_results.push(result);
            }
        }
    }

    let docs: Vec<SearchDocument> = records
        .iter()
        .zip(&catalog_results)
        .filter(|(_, r)| r.is_ok())
        .map(|(record, _)| SearchDocument::from(record))
        .collect();
    let mut index_results = match index.upsert(&docs).await {
        Ok(results) => results
            .into_iter()
            .map(|r| r.map_err(|e| StageError::new(Stage::Index, e)))
            .collect::<Vec<_>>(),
        Err(e) => {
            let message = format!("{:#}", e);
            docs.iter()
                .map(|_| Err(StageError::new(Stage::Index, &message)))
                .collect()
        }
    }
    .into_iter();

    ready
        .into_iter()
        .zip(catalog_results)
        .map(|((file, record), catalog)| {
            let result = match catalog {
                Err(e) => Err(e),
                Ok(()) => index_results.next().unwrap_or_else(|| {
                    Err(StageError::new(Stage::Index, "no result from search index"))
                }),
            };
            (file, record, result)
        })
        .collect()
}

/// Print a run summary to stdout.
pub fn print_summary(summary: &ImportSummary) {
    if summary.dry_run {
        println!("import (dry-run)");
    } else {
        println!("import");
    }
    println!("  discovered: {}", summary.discovered);
    println!("  skipped (unchanged): {}", summary.skipped_unchanged);
    println!("  skipped (exhausted): {}", summary.skipped_exhausted);
    println!("  pending: {}", summary.pending);
    if summary.dry_run {
        println!("  would import: {}", summary.imported);
    } else {
        println!("  imported: {}", summary.imported);
    }
    if summary.content_unchanged > 0 {
        println!("  unchanged content: {}", summary.content_unchanged);
    }
    println!("  failed: {}", summary.failed);
    println!("  variables found: {}", summary.variables_found);
    if let Some(rows) = summary.catalog_rows {
        println!("  catalog rows: {}", rows);
    }
    if summary.interrupted {
        println!("interrupted; rerun to resume");
    } else if summary.failed == 0 {
        println!("ok");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SearchHit;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn file(category: &str) -> TemplateFile {
        TemplateFile {
            id: "0b9c6c1e-0000-5000-8000-000000000000".to_string(),
            source_path: format!("{}/x.docx", category),
            absolute_path: PathBuf::from("/tmp/x.docx"),
            title: "X".to_string(),
            category: category.to_string(),
            subcategory: None,
            size: 1,
            modified: 0,
        }
    }

    #[test]
    fn storage_path_is_deterministic() {
        let f = file("Property & Real Estate");
        assert_eq!(
            storage_path("", &f),
            "property-real-estate/0b9c6c1e-0000-5000-8000-000000000000.docx"
        );
        assert_eq!(
            storage_path("v1/", &f),
            "v1/property-real-estate/0b9c6c1e-0000-5000-8000-000000000000.docx"
        );
    }

    #[test]
    fn storage_path_falls_back_for_unsluggable_category() {
        let f = file("विविध");
        assert!(storage_path("", &f).starts_with("uncategorized/"));
    }

    #[test]
    fn content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    /// Catalog that refuses one record id, in batches and one at a time.
    struct RejectingCatalog {
        reject: String,
        calls: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl TemplateCatalog for RejectingCatalog {
        fn name(&self) -> &str {
            "rejecting"
        }

        async fn upsert(&self, records: &[TemplateRecord]) -> Result<()> {
            self.calls.lock().unwrap().push(records.len());
            if records.iter().any(|r| r.id == self.reject) {
                anyhow::bail!("violates check constraint for {}", self.reject);
            }
            Ok(())
        }

        async fn count(&self) -> Result<i64> {
            Ok(0)
        }

        async fn health(&self) -> Result<String> {
            Ok("ok".to_string())
        }
    }

    /// Index that fails one document id and remembers what it was sent.
    struct PartialIndex {
        reject: String,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SearchIndex for PartialIndex {
        fn name(&self) -> &str {
            "partial"
        }

        async fn upsert(&self, docs: &[SearchDocument]) -> Result<Vec<Result<(), String>>> {
            let mut seen = self.seen.lock().unwrap();
            Ok(docs
                .iter()
                .map(|d| {
                    seen.push(d.id.clone());
                    if d.id == self.reject {
                        Err("invalid field".to_string())
                    } else {
                        Ok(())
                    }
                })
                .collect())
        }

        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchHit>> {
            Ok(Vec::new())
        }

        async fn health(&self) -> Result<String> {
            Ok("ok".to_string())
        }
    }

    fn ready_item(id: &str) -> (TemplateFile, TemplateRecord) {
        let mut f = file("Civil");
        f.id = id.to_string();
        f.source_path = format!("Civil/{}.docx", id);
        let record = TemplateRecord {
            id: id.to_string(),
            title: id.to_string(),
            slug: id.to_string(),
            category: "Civil".to_string(),
            subcategory: None,
            source_path: f.source_path.clone(),
            storage_path: storage_path("", &f),
            file_size: 1,
            content_hash: "h".to_string(),
            variables: Vec::new(),
            variable_count: 0,
            word_count: 1,
            preview: String::new(),
            imported_at: "2026-01-01T00:00:00Z".to_string(),
        };
        (f, record)
    }

    #[tokio::test]
    async fn partial_batch_failures_stay_with_their_rows() {
        let catalog = RejectingCatalog {
            reject: "b".to_string(),
            calls: Mutex::new(Vec::new()),
        };
        let index = PartialIndex {
            reject: "c".to_string(),
            seen: Mutex::new(Vec::new()),
        };
        let ready = ["a", "b", "c", "d"].into_iter().map(ready_item).collect();

        let outcomes = publish(&catalog, &index, ready).await;

        // one batch attempt, then each row on its own
        assert_eq!(*catalog.calls.lock().unwrap(), vec![4, 1, 1, 1, 1]);
        // the row the catalog refused never reaches the index
        assert_eq!(*index.seen.lock().unwrap(), vec!["a", "c", "d"]);

        let results: Vec<(&str, Option<Stage>)> = outcomes
            .iter()
            .map(|(file, _, r)| (file.id.as_str(), r.as_ref().err().map(|e| e.stage)))
            .collect();
        assert_eq!(
            results,
            vec![
                ("a", None),
                ("b", Some(Stage::Catalog)),
                ("c", Some(Stage::Index)),
                ("d", None),
            ]
        );
        let (_, _, c) = &outcomes[2];
        assert_eq!(c.as_ref().unwrap_err().to_string(), "index: invalid field");
    }

    #[tokio::test]
    async fn healthy_batch_is_upserted_once() {
        let catalog = RejectingCatalog {
            reject: "none".to_string(),
            calls: Mutex::new(Vec::new()),
        };
        let index = PartialIndex {
            reject: "none".to_string(),
            seen: Mutex::new(Vec::new()),
        };
        let ready = ["a", "b"].into_iter().map(ready_item).collect();

        let outcomes = publish(&catalog, &index, ready).await;
        assert_eq!(*catalog.calls.lock().unwrap(), vec![2]);
        assert!(outcomes.iter().all(|(_, _, r)| r.is_ok()));
    }

    #[test]
    fn stop_flag_marks_summary_interrupted() {
        let stop = AtomicBool::new(false);
        let mut summary = ImportSummary::default();
        assert!(!stop_requested(&stop, &mut summary));
        assert!(!summary.interrupted);

        stop.store(true, Ordering::SeqCst);
        assert!(stop_requested(&stop, &mut summary));
        assert!(summary.interrupted);
    }

    #[test]
    fn stage_error_display() {
        let e = StageError::new(Stage::Upload, "HTTP 403");
        assert_eq!(e.to_string(), "upload: HTTP 403");
    }
}

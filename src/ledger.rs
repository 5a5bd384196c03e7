//! Persisted progress and error ledger.
//!
//! The ledger is a JSON file recording which templates have been fully
//! imported (uploaded, upserted, and indexed) and which failed, at what stage,
//! and how many times. It is what makes an import resumable: a crashed or
//! interrupted run picks up from the last saved batch, skipping finished
//! files and retrying failed ones.
//!
//! A template is in at most one of `completed` / `failed`. Entries are keyed
//! by the template's stable ID, so renaming a file is a new template.
//!
//! Writes are atomic (temp file + fsync + rename); a crash mid-save leaves
//! the previous ledger intact. A separate `<ledger>.lock` file stops two
//! runs from sharing one ledger.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::models::TemplateFile;

pub const LEDGER_VERSION: u32 = 1;

/// Pipeline stage at which a template failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Read,
    Extract,
    Upload,
    Catalog,
    Index,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Read => "read",
            Stage::Extract => "extract",
            Stage::Upload => "upload",
            Stage::Catalog => "catalog",
            Stage::Index => "index",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedEntry {
    pub source_path: String,
    pub content_hash: String,
    pub size: u64,
    pub modified: i64,
    pub storage_path: String,
    pub variable_count: usize,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedEntry {
    pub source_path: String,
    pub stage: Stage,
    pub message: String,
    pub attempts: u32,
    pub size: u64,
    pub modified: i64,
    pub last_attempt_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerState {
    version: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    runs: u64,
    #[serde(default)]
    completed: BTreeMap<String, CompletedEntry>,
    #[serde(default)]
    failed: BTreeMap<String, FailedEntry>,
}

/// What the planner should do with a scanned file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Never seen.
    New,
    /// Completed before, but size or mtime differ; re-hash to confirm.
    Changed,
    /// Failed before with attempts left.
    Retry { attempts: u32 },
    /// Completed and untouched since.
    Unchanged,
    /// Failed `max_attempts` times and untouched since.
    Exhausted { attempts: u32 },
}

impl Decision {
    pub fn needs_processing(&self) -> bool {
        matches!(
            self,
            Decision::New | Decision::Changed | Decision::Retry { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerSummary {
    pub path: String,
    pub runs: u64,
    pub completed: usize,
    pub failed: usize,
    pub exhausted: usize,
    pub failed_by_stage: BTreeMap<String, usize>,
    pub variables_total: usize,
    pub updated_at: DateTime<Utc>,
}

pub struct Ledger {
    path: PathBuf,
    state: LedgerState,
}

impl Ledger {
    /// An empty ledger that will be written to `path` on the first save.
    pub fn fresh(path: &Path) -> Self {
        let now = Utc::now();
        Self {
            path: path.to_path_buf(),
            state: LedgerState {
                version: LEDGER_VERSION,
                created_at: now,
                updated_at: now,
                runs: 0,
                completed: BTreeMap::new(),
                failed: BTreeMap::new(),
            },
        }
    }

    /// Load the ledger at `path`, or start a fresh one if none exists.
    ///
    /// A ledger that exists but cannot be parsed is an error; it is never
    /// replaced silently, since that would re-import everything.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::fresh(path));
        }
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read ledger: {}", path.display()))?;
        let state: LedgerState = serde_json::from_slice(&data).with_context(|| {
            format!(
                "Ledger {} is corrupt; fix it or rerun with --fresh",
                path.display()
            )
        })?;
        if state.version != LEDGER_VERSION {
            bail!(
                "Ledger {} has version {}, expected {}",
                path.display(),
                state.version,
                LEDGER_VERSION
            );
        }
        Ok(Self {
            path: path.to_path_buf(),
            state,
        })
    }

    pub fn begin_run(&mut self) {
        self.state.runs += 1;
    }

    /// Atomically persist the ledger.
    pub fn save(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create ledger directory: {}", parent.display())
                })?;
            }
        }
        self.state.updated_at = Utc::now();
        let serialized = serde_json::to_vec_pretty(&self.state)?;

        let tmp_path = sibling_with_suffix(&self.path, ".tmp");
        {
            let mut tmp = std::fs::File::create(&tmp_path)
                .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
            tmp.write_all(&serialized)?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace ledger {}", self.path.display()))?;
        Ok(())
    }

    pub fn decide(&self, file: &TemplateFile, max_attempts: u32) -> Decision {
        if let Some(failed) = self.state.failed.get(&file.id) {
            let touched = failed.size != file.size || failed.modified != file.modified;
            if touched {
                return Decision::Changed;
            }
            if failed.attempts >= max_attempts {
                return Decision::Exhausted {
                    attempts: failed.attempts,
                };
            }
            return Decision::Retry {
                attempts: failed.attempts,
            };
        }
        match self.state.completed.get(&file.id) {
            Some(done) if done.size == file.size && done.modified == file.modified => {
                Decision::Unchanged
            }
            Some(_) => Decision::Changed,
            None => Decision::New,
        }
    }

    /// True if the template was completed with exactly this content.
    pub fn is_current(&self, id: &str, content_hash: &str) -> bool {
        self.state
            .completed
            .get(id)
            .is_some_and(|done| done.content_hash == content_hash)
    }

    /// Record new size/mtime for a template whose content hash did not change.
    pub fn refresh_stat(&mut self, file: &TemplateFile) {
        if let Some(done) = self.state.completed.get_mut(&file.id) {
            done.size = file.size;
            done.modified = file.modified;
        }
    }

    pub fn mark_completed(
        &mut self,
        file: &TemplateFile,
        content_hash: &str,
        storage_path: &str,
        variable_count: usize,
    ) {
        self.state.failed.remove(&file.id);
        self.state.completed.insert(
            file.id.clone(),
            CompletedEntry {
                source_path: file.source_path.clone(),
                content_hash: content_hash.to_string(),
                size: file.size,
                modified: file.modified,
                storage_path: storage_path.to_string(),
                variable_count,
                completed_at: Utc::now(),
            },
        );
    }

    /// Record a failure; returns the attempt count including this one.
    ///
    /// The count restarts when the file's size or mtime differ from the
    /// previous failure, so an edited file gets a full set of attempts.
    pub fn mark_failed(&mut self, file: &TemplateFile, stage: Stage, message: &str) -> u32 {
        self.state.completed.remove(&file.id);
        let attempts = match self.state.failed.get(&file.id) {
            Some(prev) if prev.size == file.size && prev.modified == file.modified => {
                prev.attempts + 1
            }
            _ => 1,
        };
        self.state.failed.insert(
            file.id.clone(),
            FailedEntry {
                source_path: file.source_path.clone(),
                stage,
                message: message.to_string(),
                attempts,
                size: file.size,
                modified: file.modified,
                last_attempt_at: Utc::now(),
            },
        );
        attempts
    }

    /// Drop failure entries so the next run retries them. `filter` matches a
    /// source path or template ID; `None` clears everything.
    pub fn clear_failures(&mut self, filter: Option<&str>) -> usize {
        let before = self.state.failed.len();
        match filter {
            Some(needle) => self
                .state
                .failed
                .retain(|id, f| id != needle && f.source_path != needle),
            None => self.state.failed.clear(),
        }
        before - self.state.failed.len()
    }

    pub fn completed_count(&self) -> usize {
        self.state.completed.len()
    }

    pub fn failed_count(&self) -> usize {
        self.state.failed.len()
    }

    /// Failures, most recent first.
    pub fn failures(&self) -> Vec<(&str, &FailedEntry)> {
        let mut entries: Vec<(&str, &FailedEntry)> = self
            .state
            .failed
            .iter()
            .map(|(id, f)| (id.as_str(), f))
            .collect();
        entries.sort_by(|a, b| {
            b.1.last_attempt_at
                .cmp(&a.1.last_attempt_at)
                .then_with(|| a.1.source_path.cmp(&b.1.source_path))
        });
        entries
    }

    pub fn summary(&self, max_attempts: u32) -> LedgerSummary {
        let mut failed_by_stage = BTreeMap::new();
        for f in self.state.failed.values() {
            *failed_by_stage.entry(f.stage.to_string()).or_insert(0) += 1;
        }
        LedgerSummary {
            path: self.path.display().to_string(),
            runs: self.state.runs,
            completed: self.state.completed.len(),
            failed: self.state.failed.len(),
            exhausted: self
                .state
                .failed
                .values()
                .filter(|f| f.attempts >= max_attempts)
                .count(),
            failed_by_stage,
            variables_total: self
                .state
                .completed
                .values()
                .map(|c| c.variable_count)
                .sum(),
            updated_at: self.state.updated_at,
        }
    }
}

/// Exclusive lock held for the duration of an import run.
///
/// The lock file is created with `create_new`, so a second run against the
/// same ledger fails instead of interleaving writes. It is removed on drop;
/// after a hard crash it stays behind and `--force` takes it over.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(ledger_path: &Path, force: bool) -> Result<Self> {
        let path = sibling_with_suffix(ledger_path, ".lock");
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        if force && path.exists() {
            tracing::warn!(lock = %path.display(), "taking over existing run lock");
            std::fs::remove_file(&path)?;
        }
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path).unwrap_or_default();
                bail!(
                    "Another import holds {} ({}). If no import is running, rerun with --force.",
                    path.display(),
                    holder.trim()
                );
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", path.display()))
            }
        };
        writeln!(
            file,
            "pid={} started_at={}",
            std::process::id(),
            Utc::now().to_rfc3339()
        )?;
        Ok(Self { path })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file(id: &str, size: u64, modified: i64) -> TemplateFile {
        TemplateFile {
            id: id.to_string(),
            source_path: format!("Civil/{}.docx", id),
            absolute_path: PathBuf::from(format!("/tmp/{}.docx", id)),
            title: id.to_string(),
            category: "Civil".to_string(),
            subcategory: None,
            size,
            modified,
        }
    }

    #[test]
    fn missing_ledger_starts_fresh() {
        let tmp = TempDir::new().unwrap();
        let ledger = Ledger::load_or_create(&tmp.path().join("ledger.json")).unwrap();
        assert_eq!(ledger.completed_count(), 0);
        assert_eq!(ledger.decide(&file("a", 1, 1), 3), Decision::New);
    }

    #[test]
    fn save_and_reload_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data/ledger.json");
        let mut ledger = Ledger::fresh(&path);
        ledger.begin_run();
        ledger.mark_completed(&file("a", 10, 100), "hash-a", "civil/a.docx", 2);
        ledger.mark_failed(&file("b", 20, 200), Stage::Upload, "HTTP 503");
        ledger.save().unwrap();
        assert!(!sibling_with_suffix(&path, ".tmp").exists());

        let reloaded = Ledger::load_or_create(&path).unwrap();
        assert_eq!(reloaded.completed_count(), 1);
        assert_eq!(reloaded.failed_count(), 1);
        assert!(reloaded.is_current("a", "hash-a"));
        assert!(!reloaded.is_current("a", "other"));
        let summary = reloaded.summary(3);
        assert_eq!(summary.runs, 1);
        assert_eq!(summary.variables_total, 2);
        assert_eq!(summary.failed_by_stage.get("upload"), Some(&1));
    }

    #[test]
    fn corrupt_ledger_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ledger.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let err = Ledger::load_or_create(&path).err().unwrap();
        assert!(err.to_string().contains("corrupt"));
    }

    #[test]
    fn decide_tracks_changes_and_attempts() {
        let tmp = TempDir::new().unwrap();
        let mut ledger = Ledger::fresh(&tmp.path().join("l.json"));
        let a = file("a", 10, 100);
        ledger.mark_completed(&a, "h", "p", 0);
        assert_eq!(ledger.decide(&a, 3), Decision::Unchanged);
        assert_eq!(ledger.decide(&file("a", 11, 100), 3), Decision::Changed);

        let b = file("b", 5, 50);
        ledger.mark_failed(&b, Stage::Extract, "bad zip");
        assert_eq!(ledger.decide(&b, 3), Decision::Retry { attempts: 1 });
        ledger.mark_failed(&b, Stage::Extract, "bad zip");
        ledger.mark_failed(&b, Stage::Extract, "bad zip");
        assert_eq!(ledger.decide(&b, 3), Decision::Exhausted { attempts: 3 });
        // Editing the file makes it eligible again
        assert_eq!(ledger.decide(&file("b", 6, 60), 3), Decision::Changed);
    }

    #[test]
    fn edited_file_gets_fresh_attempts() {
        let tmp = TempDir::new().unwrap();
        let mut ledger = Ledger::fresh(&tmp.path().join("l.json"));
        let b = file("b", 5, 50);
        for _ in 0..3 {
            ledger.mark_failed(&b, Stage::Extract, "bad zip");
        }
        assert_eq!(ledger.decide(&b, 3), Decision::Exhausted { attempts: 3 });

        let edited = file("b", 6, 60);
        assert_eq!(ledger.decide(&edited, 3), Decision::Changed);
        assert_eq!(ledger.mark_failed(&edited, Stage::Extract, "still bad"), 1);
        assert_eq!(ledger.decide(&edited, 3), Decision::Retry { attempts: 1 });
        assert_eq!(ledger.mark_failed(&edited, Stage::Extract, "still bad"), 2);
        assert_eq!(ledger.summary(3).exhausted, 0);
    }

    #[test]
    fn completed_and_failed_are_disjoint() {
        let tmp = TempDir::new().unwrap();
        let mut ledger = Ledger::fresh(&tmp.path().join("l.json"));
        let a = file("a", 1, 1);
        ledger.mark_completed(&a, "h", "p", 0);
        ledger.mark_failed(&a, Stage::Index, "down");
        assert_eq!(ledger.completed_count(), 0);
        assert_eq!(ledger.failed_count(), 1);
        ledger.mark_completed(&a, "h", "p", 0);
        assert_eq!(ledger.completed_count(), 1);
        assert_eq!(ledger.failed_count(), 0);
    }

    #[test]
    fn clear_failures_by_path_or_all() {
        let tmp = TempDir::new().unwrap();
        let mut ledger = Ledger::fresh(&tmp.path().join("l.json"));
        ledger.mark_failed(&file("a", 1, 1), Stage::Read, "x");
        ledger.mark_failed(&file("b", 1, 1), Stage::Read, "y");
        assert_eq!(ledger.clear_failures(Some("Civil/a.docx")), 1);
        assert_eq!(ledger.clear_failures(Some("missing")), 0);
        assert_eq!(ledger.clear_failures(None), 1);
        assert_eq!(ledger.failed_count(), 0);
    }

    #[test]
    fn run_lock_is_exclusive() {
        let tmp = TempDir::new().unwrap();
        let ledger_path = tmp.path().join("ledger.json");
        let lock = RunLock::acquire(&ledger_path, false).unwrap();
        assert!(RunLock::acquire(&ledger_path, false).is_err());
        drop(lock);
        let again = RunLock::acquire(&ledger_path, false).unwrap();
        // force takes over a lock left behind
        std::mem::forget(again);
        assert!(RunLock::acquire(&ledger_path, true).is_ok());
    }
}

//! Import progress reporting.
//!
//! Reports observable progress during `nyaya-import run` so operators see what
//! is being scanned, how much is left, and how many files have failed.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for an import run.
#[derive(Clone, Debug)]
pub enum ImportProgressEvent {
    /// Walking an import root. Total unknown.
    Scanning { root: String },
    /// Scan done and planned against the ledger.
    Planned { discovered: u64, pending: u64 },
    /// `n` of `total` pending files processed, `failed` of them failed.
    Importing { n: u64, total: u64, failed: u64 },
}

/// Reports import progress. Implementations write to stderr (human or JSON).
pub trait ImportProgressReporter: Send + Sync {
    fn report(&self, event: ImportProgressEvent);
}

/// Human-friendly progress on stderr: "import  1,234 / 3,300 files  (2 failed)".
pub struct StderrProgress;

impl ImportProgressReporter for StderrProgress {
    fn report(&self, event: ImportProgressEvent) {
        let line = match &event {
            ImportProgressEvent::Scanning { root } => format!("import  scanning {}...\n", root),
            ImportProgressEvent::Planned {
                discovered,
                pending,
            } => format!(
                "import  {} templates found, {} to process\n",
                format_number(*discovered),
                format_number(*pending)
            ),
            ImportProgressEvent::Importing { n, total, failed } => {
                let mut line = format!(
                    "import  {} / {} files",
                    format_number(*n),
                    format_number(*total)
                );
                if *failed > 0 {
                    line.push_str(&format!("  ({} failed)", format_number(*failed)));
                }
                line.push('\n');
                line
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ImportProgressReporter for JsonProgress {
    fn report(&self, event: ImportProgressEvent) {
        let obj = match &event {
            ImportProgressEvent::Scanning { root } => serde_json::json!({
                "event": "progress",
                "phase": "scanning",
                "root": root,
            }),
            ImportProgressEvent::Planned {
                discovered,
                pending,
            } => serde_json::json!({
                "event": "progress",
                "phase": "planned",
                "discovered": discovered,
                "pending": pending,
            }),
            ImportProgressEvent::Importing { n, total, failed } => serde_json::json!({
                "event": "progress",
                "phase": "importing",
                "n": n,
                "total": total,
                "failed": failed,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ImportProgressReporter for NoProgress {
    fn report(&self, _event: ImportProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Parse a `--progress` value. `auto` means human on a TTY, otherwise off.
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "auto" => Ok(Self::default_for_tty()),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            "off" => Ok(ProgressMode::Off),
            other => anyhow::bail!(
                "Unknown progress mode: '{}'. Use auto, human, json, or off.",
                other
            ),
        }
    }

    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ImportProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(3300), "3,300");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn parse_progress_modes() {
        assert_eq!(ProgressMode::parse("json").unwrap(), ProgressMode::Json);
        assert_eq!(ProgressMode::parse("off").unwrap(), ProgressMode::Off);
        assert!(ProgressMode::parse("loud").is_err());
    }
}

//! `inspect` command: show what the importer would extract from one file.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::VariablesConfig;
use crate::extract::extract_docx;
use crate::scan::humanize_title;
use crate::variables::VariableExtractor;

pub fn run_inspect(path: &Path, variables: &VariablesConfig, json: bool) -> Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let content =
        extract_docx(&bytes).with_context(|| format!("Failed to extract {}", path.display()))?;
    let found = VariableExtractor::from_config(variables)?.extract(&content);

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let title = humanize_title(&stem);

    if json {
        let out = serde_json::json!({
            "path": path.display().to_string(),
            "title": title,
            "bytes": bytes.len(),
            "word_count": content.word_count,
            "variables": found,
            "preview": content.preview(280),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", title);
    println!("  file: {}", path.display());
    println!("  size: {} bytes", bytes.len());
    println!("  words: {}", content.word_count);
    println!("  variables: {}", found.len());
    for v in &found {
        println!(
            "    {:<32} {:<10} x{}  \"{}\"",
            v.key,
            v.kind.as_str(),
            v.occurrences,
            v.label
        );
    }
    let preview = content.preview(160);
    if !preview.is_empty() {
        println!("  preview: \"{}\"", preview);
    }
    Ok(())
}

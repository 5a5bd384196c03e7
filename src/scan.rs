//! Directory scanner.
//!
//! Walks every configured import root, filters files with include/exclude
//! globs, and turns each match into a [`TemplateFile`] with a stable ID,
//! a category derived from its folder, and a human-readable title.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::ImportConfig;
use crate::models::TemplateFile;

/// Namespace for template IDs. Changing it re-keys every template.
const TEMPLATE_NAMESPACE: Uuid = Uuid::from_u128(0x6e79_6179_612d_4d69_7472_612d_7470_6c00);

const UNCATEGORIZED: &str = "Uncategorized";

pub fn scan_templates(config: &ImportConfig) -> Result<Vec<TemplateFile>> {
    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        // Word lock files
        "**/~$*".to_string(),
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut items = Vec::new();
    let mut seen = HashSet::new();

    for root in &config.roots {
        if !root.exists() {
            bail!("Import root does not exist: {}", root.display());
        }

        let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if exclude_set.is_match(&rel_str) {
                continue;
            }
            if !include_set.is_match(&rel_str) {
                continue;
            }

            let item = file_to_template(path, &rel_str)?;
            if !seen.insert(item.id.clone()) {
                tracing::warn!(
                    path = %path.display(),
                    source_path = %item.source_path,
                    "duplicate template path across roots, keeping first"
                );
                continue;
            }
            items.push(item);
        }
    }

    // Sort for deterministic ordering
    items.sort_by(|a, b| a.source_path.cmp(&b.source_path));

    Ok(items)
}

/// Stable template ID for a root-relative path.
pub fn template_id(source_path: &str) -> String {
    Uuid::new_v5(&TEMPLATE_NAMESPACE, source_path.as_bytes()).to_string()
}

fn file_to_template(path: &Path, relative_path: &str) -> Result<TemplateFile> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    let modified = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let (category, subcategory) = categorize(relative_path);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(TemplateFile {
        id: template_id(relative_path),
        source_path: relative_path.to_string(),
        absolute_path: path.to_path_buf(),
        title: humanize_title(&stem),
        category,
        subcategory,
        size: metadata.len(),
        modified,
    })
}

/// First folder is the category, second (if any) the subcategory.
pub fn categorize(relative_path: &str) -> (String, Option<String>) {
    let dirs: Vec<&str> = relative_path.split('/').collect();
    let dirs = &dirs[..dirs.len().saturating_sub(1)];
    let category = dirs
        .first()
        .map(|d| humanize_title(d))
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| UNCATEGORIZED.to_string());
    let subcategory = dirs
        .get(1)
        .map(|d| humanize_title(d))
        .filter(|d| !d.is_empty());
    (category, subcategory)
}

/// Turn a file stem or folder name into a display title.
///
/// `"03_Sale-Deed  (Final)"` becomes `"Sale Deed (Final)"`.
pub fn humanize_title(raw: &str) -> String {
    let trimmed = strip_numbering(raw.trim());
    let spaced: String = trimmed
        .chars()
        .map(|c| if c == '_' || c == '-' { ' ' } else { c })
        .collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop a leading ordinal such as `01_`, `12 - ` or `3.` but keep `1st`.
fn strip_numbering(s: &str) -> &str {
    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 || digits == s.len() {
        return s;
    }
    let rest = &s[digits..];
    let is_separator = |c: char| c == '_' || c == '-' || c == '.' || c == ')' || c.is_whitespace();
    if !rest.starts_with(is_separator) {
        return s;
    }
    let stripped = rest.trim_start_matches(is_separator);
    if stripped.is_empty() {
        s
    } else {
        stripped
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// `scan` command: list what an import would pick up.
pub fn run_scan(config: &ImportConfig, json: bool) -> Result<()> {
    let files = scan_templates(config)?;

    if json {
        for f in &files {
            let line = serde_json::json!({
                "id": f.id,
                "source_path": f.source_path,
                "title": f.title,
                "category": f.category,
                "subcategory": f.subcategory,
                "size": f.size,
                "modified": f.modified,
            });
            println!("{}", line);
        }
        return Ok(());
    }

    let mut by_category: BTreeMap<&str, usize> = BTreeMap::new();
    let mut total_bytes = 0u64;
    for f in &files {
        *by_category.entry(f.category.as_str()).or_insert(0) += 1;
        total_bytes += f.size;
    }

    println!("scan");
    println!("  templates found: {}", files.len());
    println!("  total size: {} bytes", total_bytes);
    if !by_category.is_empty() {
        println!();
        println!("  {:<40} {:>6}", "CATEGORY", "FILES");
        for (category, count) in &by_category {
            println!("  {:<40} {:>6}", category, count);
        }
    }
    Ok(())
}

//! Core data models used throughout the importer.
//!
//! These types represent the templates that flow from the directory scanner
//! through extraction into storage, the catalog, and the search index.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// A `.docx` file discovered by the scanner.
#[derive(Debug, Clone)]
pub struct TemplateFile {
    /// Stable UUIDv5 derived from `source_path`.
    pub id: String,
    /// Path relative to its import root, always `/`-separated.
    pub source_path: String,
    pub absolute_path: PathBuf,
    pub title: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub size: u64,
    /// Modification time in unix seconds.
    pub modified: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    Text,
    LongText,
    Date,
    Number,
    Email,
    Phone,
}

impl VariableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariableKind::Text => "text",
            VariableKind::LongText => "long_text",
            VariableKind::Date => "date",
            VariableKind::Number => "number",
            VariableKind::Email => "email",
            VariableKind::Phone => "phone",
        }
    }
}

/// A fillable placeholder found in a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateVariable {
    /// Normalized `snake_case` key used by the drafting form.
    pub key: String,
    pub label: String,
    pub kind: VariableKind,
    pub occurrences: u32,
}

/// Row written to the relational catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub source_path: String,
    pub storage_path: String,
    pub file_size: i64,
    pub content_hash: String,
    pub variables: Vec<TemplateVariable>,
    pub variable_count: i64,
    pub word_count: i64,
    pub preview: String,
    /// RFC 3339 timestamp.
    pub imported_at: String,
}

/// Document pushed to the search index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDocument {
    pub id: String,
    pub title: String,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    pub variables: Vec<String>,
    pub variable_count: i64,
    pub preview: String,
    pub source_path: String,
}

impl From<&TemplateRecord> for SearchDocument {
    fn from(record: &TemplateRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            category: record.category.clone(),
            subcategory: record.subcategory.clone(),
            variables: record.variables.iter().map(|v| v.key.clone()).collect(),
            variable_count: record.variable_count,
            preview: record.preview.clone(),
            source_path: record.source_path.clone(),
        }
    }
}

/// A search hit returned from an index backend.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    pub category: String,
    pub source_path: String,
    pub score: f64,
}

/// Lowercase, hyphen-separated ASCII slug.
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_dash = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

//! Template variable extraction.
//!
//! Finds fillable placeholders in extracted docx text. Two sources are
//! supported: configurable text patterns (default `{{ name }}`) and Word
//! `MERGEFIELD` instructions. Every raw name is normalized to a `snake_case`
//! key, deduplicated, and given a display label and an inferred input kind.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashMap;

use crate::config::VariablesConfig;
use crate::extract::DocxContent;
use crate::models::{TemplateVariable, VariableKind};

pub struct VariableExtractor {
    patterns: Vec<Regex>,
    merge_fields: bool,
    max_name_len: usize,
}

impl VariableExtractor {
    pub fn from_config(config: &VariablesConfig) -> Result<Self> {
        let patterns = config
            .patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("Invalid variable pattern: {}", p)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            patterns,
            merge_fields: config.merge_fields,
            max_name_len: config.max_name_len,
        })
    }

    /// Variables in order of first appearance, text patterns before merge fields.
    pub fn extract(&self, content: &DocxContent) -> Vec<TemplateVariable> {
        let mut order: Vec<String> = Vec::new();
        let mut found: HashMap<String, TemplateVariable> = HashMap::new();

        let mut record = |raw: &str| {
            let Some(key) = normalize_key(raw, self.max_name_len) else {
                return;
            };
            match found.get_mut(&key) {
                Some(existing) => existing.occurrences += 1,
                None => {
                    order.push(key.clone());
                    found.insert(
                        key.clone(),
                        TemplateVariable {
                            label: label_for(&key),
                            kind: infer_kind(&key),
                            key,
                            occurrences: 1,
                        },
                    );
                }
            }
        };

        for pattern in &self.patterns {
            for caps in pattern.captures_iter(&content.text) {
                if let Some(name) = caps.get(1) {
                    record(name.as_str());
                }
            }
        }

        if self.merge_fields {
            for instr in &content.field_instructions {
                if let Some(name) = merge_field_name(instr) {
                    record(name);
                }
            }
        }

        order
            .into_iter()
            .filter_map(|key| found.remove(&key))
            .collect()
    }
}

/// `" MERGEFIELD  ClientName \* MERGEFORMAT "` → `Some("ClientName")`.
///
/// Quoted names (`MERGEFIELD "Office Address"`) may contain spaces.
fn merge_field_name(instr: &str) -> Option<&str> {
    let trimmed = instr.trim_start();
    let keyword = trimmed.split_whitespace().next()?;
    if !keyword.eq_ignore_ascii_case("MERGEFIELD") {
        return None;
    }
    let rest = trimmed[keyword.len()..].trim_start();
    if let Some(quoted) = rest.strip_prefix('"') {
        return quoted.split('"').next().filter(|name| !name.is_empty());
    }
    rest.split_whitespace().next()
}

/// Normalize a raw placeholder name to a `snake_case` key.
///
/// Filter syntax (`{{ date | upper }}`) is cut at the first `|`.
pub fn normalize_key(raw: &str, max_len: usize) -> Option<String> {
    let name = raw.split('|').next().unwrap_or_default();
    let mut key = String::with_capacity(name.len());
    let mut pending_sep = false;
    let mut prev_lower = false;
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            // camelCase boundary: clientName -> client_name
            if c.is_ascii_uppercase() && prev_lower {
                pending_sep = true;
            }
            if pending_sep && !key.is_empty() {
                key.push('_');
            }
            pending_sep = false;
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            key.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
            prev_lower = false;
        }
    }
    if key.is_empty() || key.len() > max_len {
        None
    } else {
        Some(key)
    }
}

fn label_for(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn infer_kind(key: &str) -> VariableKind {
    let words: Vec<&str> = key.split('_').collect();
    let has = |candidates: &[&str]| words.iter().any(|w| candidates.iter().any(|c| c == w));

    if has(&["date", "dob", "day"]) {
        VariableKind::Date
    } else if has(&[
        "amount", "price", "fee", "fees", "rent", "salary", "number", "age", "count",
    ]) {
        VariableKind::Number
    } else if has(&["email"]) {
        VariableKind::Email
    } else if has(&["phone", "mobile"]) {
        VariableKind::Phone
    } else if has(&["address", "description"]) {
        VariableKind::LongText
    } else {
        VariableKind::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> VariableExtractor {
        VariableExtractor::from_config(&VariablesConfig::default()).unwrap()
    }

    fn content(text: &str, fields: &[&str]) -> DocxContent {
        DocxContent {
            text: text.to_string(),
            field_instructions: fields.iter().map(|s| s.to_string()).collect(),
            word_count: 0,
        }
    }

    #[test]
    fn normalize_handles_case_spacing_and_filters() {
        assert_eq!(normalize_key(" Client Name ", 64).as_deref(), Some("client_name"));
        assert_eq!(normalize_key("clientName", 64).as_deref(), Some("client_name"));
        assert_eq!(normalize_key("party.1.name", 64).as_deref(), Some("party_1_name"));
        assert_eq!(normalize_key("date | upper", 64).as_deref(), Some("date"));
        assert_eq!(normalize_key("PAN", 64).as_deref(), Some("pan"));
        assert_eq!(normalize_key("---", 64), None);
        assert_eq!(normalize_key("abcdef", 5), None);
    }

    #[test]
    fn extracts_in_first_appearance_order_with_counts() {
        let vars = extractor().extract(&content(
            "This deed is made on {{ agreement_date }} between {{Landlord Name}} and {{tenant_name}}.\n\
             The rent of {{monthly_rent}} is payable by {{ tenant_name }}.",
            &[],
        ));
        let keys: Vec<&str> = vars.iter().map(|v| v.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["agreement_date", "landlord_name", "tenant_name", "monthly_rent"]
        );
        assert_eq!(vars[2].occurrences, 2);
        assert_eq!(vars[0].kind, VariableKind::Date);
        assert_eq!(vars[1].label, "Landlord Name");
        assert_eq!(vars[3].kind, VariableKind::Number);
    }

    #[test]
    fn merge_fields_are_included_and_deduplicated() {
        let vars = extractor().extract(&content(
            "Client: {{client_name}}",
            &[
                " MERGEFIELD ClientName \\* MERGEFORMAT ",
                " MERGEFIELD \"Office Address\" ",
                " PAGE ",
            ],
        ));
        let keys: Vec<&str> = vars.iter().map(|v| v.key.as_str()).collect();
        assert_eq!(keys, vec!["client_name", "office_address"]);
        assert_eq!(vars[0].occurrences, 2);
        assert_eq!(vars[1].kind, VariableKind::LongText);
    }

    #[test]
    fn merge_fields_can_be_disabled() {
        let config = VariablesConfig {
            merge_fields: false,
            ..VariablesConfig::default()
        };
        let vars = VariableExtractor::from_config(&config)
            .unwrap()
            .extract(&content("none here", &[" MERGEFIELD ClientName "]));
        assert!(vars.is_empty());
    }

    #[test]
    fn custom_bracket_pattern() {
        let config = VariablesConfig {
            patterns: vec![r"\[([A-Z][A-Z _]+)\]".to_string()],
            ..VariablesConfig::default()
        };
        let vars = VariableExtractor::from_config(&config)
            .unwrap()
            .extract(&content("I, [DEPONENT NAME], residing at [ADDRESS], state", &[]));
        let keys: Vec<&str> = vars.iter().map(|v| v.key.as_str()).collect();
        assert_eq!(keys, vec!["deponent_name", "address"]);
        assert_eq!(vars[1].kind, VariableKind::LongText);
    }

    #[test]
    fn infers_contact_kinds() {
        assert_eq!(infer_kind("client_email"), VariableKind::Email);
        assert_eq!(infer_kind("mobile_no"), VariableKind::Phone);
        assert_eq!(infer_kind("father_name"), VariableKind::Text);
    }

    #[test]
    fn kind_words_must_stand_alone() {
        assert_eq!(infer_kind("date_of_birth"), VariableKind::Date);
        assert_eq!(infer_kind("birthday"), VariableKind::Text);
        assert_eq!(infer_kind("candidate_name"), VariableKind::Text);
    }
}

//! Typesense search index.
//!
//! ```text
//! GET  {url}/collections/{c}                                   prepare (404 → create)
//! POST {url}/collections                                       create with schema
//! POST {url}/collections/{c}/documents/import?action=upsert    JSONL in, JSONL results out
//! GET  {url}/collections/{c}/documents/search?q=..&query_by=..
//! GET  {url}/health
//! ```
//!
//! Credentials: `TYPESENSE_API_KEY` (an admin key; search-only keys can't import).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::{require_env, SearchConfig};
use crate::http::{base_url, ensure_success, HttpClient};
use crate::models::{SearchDocument, SearchHit};
use crate::traits::SearchIndex;

const API_KEY_HEADER: &str = "X-TYPESENSE-API-KEY";
const QUERY_BY: &str = "title,variables,preview,category";

pub struct TypesenseIndex {
    http: HttpClient,
    url: String,
    collection: String,
    api_key: String,
}

impl TypesenseIndex {
    pub fn new(config: &SearchConfig, http: HttpClient) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("search.url is required for the typesense backend"))?;
        Ok(Self {
            http,
            url: base_url(url),
            collection: config.collection.clone(),
            api_key: require_env("TYPESENSE_API_KEY")?,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.url, self.collection)
    }
}

fn collection_schema(name: &str) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "fields": [
            { "name": "title", "type": "string" },
            { "name": "category", "type": "string", "facet": true },
            { "name": "subcategory", "type": "string", "facet": true, "optional": true },
            { "name": "variables", "type": "string[]" },
            { "name": "variable_count", "type": "int32" },
            { "name": "preview", "type": "string" },
            { "name": "source_path", "type": "string", "index": false, "optional": true }
        ]
    })
}

fn to_jsonl(docs: &[SearchDocument]) -> Result<String> {
    let mut body = String::new();
    for doc in docs {
        body.push_str(&serde_json::to_string(doc)?);
        body.push('\n');
    }
    Ok(body)
}

#[derive(Deserialize)]
struct ImportLine {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Map the import endpoint's JSONL response back onto the submitted documents.
fn parse_import_response(body: &str, expected: usize) -> Result<Vec<Result<(), String>>> {
    let mut results = Vec::with_capacity(expected);
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let parsed: ImportLine = serde_json::from_str(line)
            .with_context(|| format!("Unexpected Typesense import line: {}", line))?;
        results.push(if parsed.success {
            Ok(())
        } else {
            Err(parsed
                .error
                .unwrap_or_else(|| "typesense rejected document".to_string()))
        });
    }
    if results.len() != expected {
        bail!(
            "Typesense import returned {} results for {} documents",
            results.len(),
            expected
        );
    }
    Ok(results)
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<SearchResponseHit>,
}

#[derive(Deserialize)]
struct SearchResponseHit {
    document: HitDocument,
    #[serde(default)]
    text_match: Option<f64>,
}

#[derive(Deserialize)]
struct HitDocument {
    id: String,
    title: String,
    category: String,
    #[serde(default)]
    source_path: String,
}

#[async_trait]
impl SearchIndex for TypesenseIndex {
    fn name(&self) -> &str {
        "typesense"
    }

    async fn prepare(&self) -> Result<()> {
        let url = self.collection_url();
        let response = self
            .http
            .send_raw("typesense collection lookup", |client| {
                client.get(&url).header(API_KEY_HEADER, &self.api_key)
            })
            .await?;
        if response.status().as_u16() != 404 {
            ensure_success("typesense collection lookup", response).await?;
            return Ok(());
        }

        tracing::info!(collection = %self.collection, "creating typesense collection");
        let create_url = format!("{}/collections", self.url);
        let schema = collection_schema(&self.collection);
        self.http
            .send("typesense collection create", |client| {
                client
                    .post(&create_url)
                    .header(API_KEY_HEADER, &self.api_key)
                    .json(&schema)
            })
            .await?;
        Ok(())
    }

    async fn upsert(&self, docs: &[SearchDocument]) -> Result<Vec<Result<(), String>>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let body = to_jsonl(docs)?;
        let url = format!("{}/documents/import?action=upsert", self.collection_url());
        let response = self
            .http
            .send(&format!("typesense import ({} docs)", docs.len()), |client| {
                client
                    .post(&url)
                    .header(API_KEY_HEADER, &self.api_key)
                    .header("Content-Type", "text/plain")
                    .body(body.clone())
            })
            .await?;
        let text = response.text().await?;
        parse_import_response(&text, docs.len())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let url = format!("{}/documents/search", self.collection_url());
        let per_page = limit.clamp(1, 250).to_string();
        let response = self
            .http
            .send("typesense search", |client| {
                client
                    .get(&url)
                    .header(API_KEY_HEADER, &self.api_key)
                    .query(&[
                        ("q", query),
                        ("query_by", QUERY_BY),
                        ("per_page", per_page.as_str()),
                    ])
            })
            .await?;
        let parsed: SearchResponse = response.json().await?;
        Ok(parsed
            .hits
            .into_iter()
            .map(|hit| SearchHit {
                id: hit.document.id,
                title: hit.document.title,
                category: hit.document.category,
                source_path: hit.document.source_path,
                score: hit.text_match.unwrap_or(0.0),
            })
            .collect())
    }

    async fn health(&self) -> Result<String> {
        let url = format!("{}/health", self.url);
        self.http
            .send("typesense health", |client| {
                client.get(&url).header(API_KEY_HEADER, &self.api_key)
            })
            .await?;
        Ok(format!("{} (collection '{}')", self.url, self.collection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_response_maps_per_document() {
        let body = "{\"success\":true}\n{\"success\":false,\"error\":\"Bad JSON.\",\"document\":\"{}\"}\n";
        let results = parse_import_response(body, 2).unwrap();
        assert!(results[0].is_ok());
        assert_eq!(results[1].as_ref().unwrap_err(), "Bad JSON.");
    }

    #[test]
    fn import_response_count_mismatch_is_error() {
        assert!(parse_import_response("{\"success\":true}\n", 2).is_err());
    }

    #[test]
    fn jsonl_has_one_line_per_document() {
        let docs = vec![
            SearchDocument {
                id: "a".into(),
                title: "Will".into(),
                category: "Family".into(),
                subcategory: None,
                variables: vec!["testator_name".into()],
                variable_count: 1,
                preview: String::new(),
                source_path: "Family/will.docx".into(),
            };
            3
        ];
        let body = to_jsonl(&docs).unwrap();
        assert_eq!(body.lines().count(), 3);
        assert!(!body.contains("subcategory"));
    }

    #[test]
    fn schema_marks_category_as_facet() {
        let schema = collection_schema("templates");
        let fields = schema["fields"].as_array().unwrap();
        let category = fields.iter().find(|f| f["name"] == "category").unwrap();
        assert_eq!(category["facet"], true);
    }

    #[test]
    fn search_response_parses_hits() {
        let body = r#"{"found":1,"hits":[{"document":{"id":"x","title":"Rent Agreement","category":"Property","source_path":"Property/rent.docx"},"text_match":578730123}]}"#;
        let parsed: SearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.hits.len(), 1);
        assert_eq!(parsed.hits[0].document.title, "Rent Agreement");
    }
}

//! S3-compatible object store.
//!
//! Uploads objects with the S3 REST API and AWS Signature V4, implemented with
//! pure-Rust `hmac` + `sha2` (no C dependencies). Works against AWS S3 and,
//! through `endpoint_url`, against S3-compatible services (MinIO, LocalStack,
//! Supabase's S3 gateway) using path-style addressing.
//!
//! # Configuration
//!
//! ```toml
//! [storage]
//! backend = "s3"
//! bucket = "nyaya-templates"
//! prefix = "docx/"
//! region = "ap-south-1"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! ```
//!
//! Credentials come from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, and
//! optionally `AWS_SESSION_TOKEN`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::{require_env, StorageConfig};
use crate::http::HttpClient;
use crate::traits::ObjectStore;

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
#[derive(Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

pub struct S3Store {
    http: HttpClient,
    creds: AwsCredentials,
    bucket: String,
    region: String,
    /// `scheme://host[:port]` of a custom endpoint; `None` means AWS virtual-host style.
    endpoint: Option<String>,
}

/// A request ready to send: URL plus the headers that were signed.
struct SignedRequest {
    url: String,
    headers: Vec<(String, String)>,
}

impl S3Store {
    pub fn new(config: &StorageConfig, http: HttpClient) -> Result<Self> {
        Ok(Self {
            http,
            creds: AwsCredentials::from_env()?,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: config
                .endpoint_url
                .as_deref()
                .map(|e| e.trim_end_matches('/').to_string()),
        })
    }

    /// Host header value and canonical URI for an object key (or the bucket when `key` is empty).
    fn host_and_uri(&self, key: &str) -> (String, String, String) {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        match &self.endpoint {
            Some(endpoint) => {
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .to_string();
                let uri = if key.is_empty() {
                    format!("/{}", uri_encode(&self.bucket))
                } else {
                    format!("/{}/{}", uri_encode(&self.bucket), encoded_key)
                };
                let url = format!("{}{}", endpoint, uri);
                (host, uri, url)
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.region);
                let uri = format!("/{}", encoded_key);
                let url = format!("https://{}{}", host, uri);
                (host, uri, url)
            }
        }
    }

    fn sign(&self, method: &str, key: &str, payload: &[u8], now: DateTime<Utc>) -> SignedRequest {
        let (host, canonical_uri, url) = self.host_and_uri(key);
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(payload);

        let mut headers = vec![
            ("host".to_string(), host),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method, canonical_uri, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key =
            derive_signing_key(&self.creds.secret_access_key, &date_stamp, &self.region, "s3");
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut out_headers: Vec<(String, String)> = headers
            .into_iter()
            // reqwest sets Host itself
            .filter(|(k, _)| k != "host")
            .collect();
        out_headers.push(("Authorization".to_string(), authorization));

        SignedRequest {
            url,
            headers: out_headers,
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        "s3"
    }

    fn locate(&self, path: &str) -> String {
        format!("s3://{}/{}", self.bucket, path)
    }

    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        self.http
            .send(&format!("S3 PutObject {}", path), |client| {
                // Re-sign per attempt so x-amz-date stays fresh across backoff
                let signed = self.sign("PUT", path, bytes, Utc::now());
                let mut req = client
                    .put(&signed.url)
                    .header("Content-Type", content_type)
                    .body(bytes.to_vec());
                for (k, v) in &signed.headers {
                    req = req.header(k.as_str(), v.as_str());
                }
                req
            })
            .await
            .with_context(|| format!("Failed to upload s3://{}/{}", self.bucket, path))?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let response = self
            .http
            .send_raw(&format!("S3 HeadObject {}", path), |client| {
                let signed = self.sign("HEAD", path, b"", Utc::now());
                let mut req = client.head(&signed.url);
                for (k, v) in &signed.headers {
                    req = req.header(k.as_str(), v.as_str());
                }
                req
            })
            .await?;
        Ok(response.status().is_success())
    }

    async fn health(&self) -> Result<String> {
        self.http
            .send("S3 HeadBucket", |client| {
                let signed = self.sign("HEAD", "", b"", Utc::now());
                let mut req = client.head(&signed.url);
                for (k, v) in &signed.headers {
                    req = req.header(k.as_str(), v.as_str());
                }
                req
            })
            .await?;
        Ok(format!("bucket '{}' reachable", self.bucket))
    }
}

// ============ AWS SigV4 Helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986.
///
/// Encodes all characters except unreserved characters:
/// `A-Z a-z 0-9 - _ . ~`
pub fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

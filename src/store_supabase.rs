//! Supabase Storage object store.
//!
//! Uploads through the Storage REST API with the project's service-role key:
//!
//! ```text
//! POST {url}/storage/v1/object/{bucket}/{path}    (x-upsert: true)
//! HEAD {url}/storage/v1/object/{bucket}/{path}
//! GET  {url}/storage/v1/bucket/{bucket}
//! ```
//!
//! Credentials: `SUPABASE_SERVICE_ROLE_KEY`.

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{require_env, StorageConfig};
use crate::http::{base_url, HttpClient};
use crate::store_s3::uri_encode;
use crate::traits::ObjectStore;

pub struct SupabaseStore {
    http: HttpClient,
    url: String,
    bucket: String,
    service_key: String,
}

impl SupabaseStore {
    pub fn new(config: &StorageConfig, http: HttpClient) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("storage.url is required for the supabase backend"))?;
        Ok(Self {
            http,
            url: base_url(url),
            bucket: config.bucket.clone(),
            service_key: require_env("SUPABASE_SERVICE_ROLE_KEY")?,
        })
    }

    fn object_url(&self, path: &str) -> String {
        let encoded = path.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        format!(
            "{}/storage/v1/object/{}/{}",
            self.url,
            uri_encode(&self.bucket),
            encoded
        )
    }
}

#[async_trait]
impl ObjectStore for SupabaseStore {
    fn name(&self) -> &str {
        "supabase"
    }

    fn locate(&self, path: &str) -> String {
        self.object_url(path)
    }

    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let url = self.object_url(path);
        self.http
            .send(&format!("upload {}", path), |client| {
                client
                    .post(&url)
                    .bearer_auth(&self.service_key)
                    .header("apikey", &self.service_key)
                    .header("x-upsert", "true")
                    .header("Content-Type", content_type)
                    .body(bytes.to_vec())
            })
            .await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let url = self.object_url(path);
        let response = self
            .http
            .send_raw(&format!("head {}", path), |client| {
                client
                    .head(&url)
                    .bearer_auth(&self.service_key)
                    .header("apikey", &self.service_key)
            })
            .await?;
        Ok(response.status().is_success())
    }

    async fn health(&self) -> Result<String> {
        let url = format!("{}/storage/v1/bucket/{}", self.url, uri_encode(&self.bucket));
        self.http
            .send("storage bucket lookup", |client| {
                client
                    .get(&url)
                    .bearer_auth(&self.service_key)
                    .header("apikey", &self.service_key)
            })
            .await?;
        Ok(format!("bucket '{}' reachable", self.bucket))
    }
}

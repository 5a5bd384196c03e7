//! Shared HTTP client with retry and backoff.
//!
//! Every remote backend (Supabase Storage, PostgREST, S3, Typesense) goes
//! through [`HttpClient`], so they all retry the same way:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Network errors → retry
//! - Any other status → returned to the caller immediately
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::HttpConfig;

#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("nyaya-import/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            max_retries: config.max_retries,
        })
    }

    /// Send a request built by `build`, retrying transient failures.
    ///
    /// Returns the final response whatever its status; callers that only
    /// accept success should use [`HttpClient::send`].
    pub async fn send_raw<F>(&self, label: &str, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(%label, attempt, ?delay, "retrying request");
                tokio::time::sleep(delay).await;
            }

            match build(&self.client).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "{} failed (HTTP {}): {}",
                            label,
                            status,
                            truncate(&body_text)
                        ));
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!("{} failed: {}", label, e));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} failed after retries", label)))
    }

    /// Like [`HttpClient::send_raw`], but non-2xx responses become errors.
    pub async fn send<F>(&self, label: &str, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let response = self.send_raw(label, build).await?;
        ensure_success(label, response).await
    }
}

pub async fn ensure_success(label: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body_text = response.text().await.unwrap_or_default();
    bail!("{} failed (HTTP {}): {}", label, status, truncate(&body_text));
}

/// Keep error messages (and therefore the ledger) small.
fn truncate(body: &str) -> String {
    body.chars().take(500).collect()
}

/// Strip a trailing slash from a base URL.
pub fn base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_limits_length() {
        let long = "x".repeat(2000);
        assert_eq!(truncate(&long).len(), 500);
        assert_eq!(truncate("short"), "short");
    }

    #[test]
    fn base_url_strips_trailing_slash() {
        assert_eq!(base_url("https://a.supabase.co/"), "https://a.supabase.co");
        assert_eq!(base_url("http://localhost:8108"), "http://localhost:8108");
    }
}

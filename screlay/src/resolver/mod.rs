//! Translation of foreign streaming links (Spotify, Apple Music, ...) to
//! SoundCloud links through an IDHS server.
//!
//! `POST <base>/api/search?v=1` with the link and the SoundCloud adapter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;

use crate::utils::http_client::build_client;
use crate::utils::links::{contains_soundcloud_url, extract_soundcloud_url};
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdhsConfig {
    pub base_url: String,
    /// Deadline for the whole request.
    pub timeout: Duration,
}

impl Default for IdhsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            timeout: Duration::from_millis(15_000),
        }
    }
}

/// Turns a link into a native SoundCloud link.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// `Ok(None)` when the service answered but had no usable link.
    /// Transport failures and timeouts are errors.
    async fn resolve(&self, url: &str) -> Result<Option<String>>;
}

pub struct IdhsResolver {
    endpoint: Url,
    client: Client,
}

impl IdhsResolver {
    pub fn new(config: &IdhsConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| Error::config(format!("Invalid IDHS_API_BASE_URL: {e}")))?;
        let endpoint = base
            .join("/api/search?v=1")
            .map_err(|e| Error::config(format!("Invalid IDHS_API_BASE_URL: {e}")))?;
        Ok(Self {
            endpoint,
            client: build_client(config.timeout)?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl LinkResolver for IdhsResolver {
    async fn resolve(&self, url: &str) -> Result<Option<String>> {
        let payload = json!({ "link": url, "adapters": ["soundCloud"] });

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Failed to resolve link via IDHS");
                Error::Http(e)
            })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(status = %status, body = %body, "IDHS request failed");
            return Ok(None);
        }

        let parsed: Value = match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Unable to parse IDHS response as JSON");
                return Ok(None);
            }
        };

        if let Some(error) = parsed.get("error").filter(|e| !e.is_null()) {
            warn!(error = %error, "IDHS responded with an error");
            return Ok(None);
        }

        let picked = pick_soundcloud_link(&parsed);
        debug!(url = %url, resolved = ?picked, "IDHS lookup finished");
        Ok(picked)
    }
}

fn is_usable_entry(entry: &Value) -> bool {
    let not_available = entry
        .get("notAvailable")
        .is_some_and(|v| !matches!(v, Value::Null | Value::Bool(false)));
    let kind = entry
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase);
    !not_available && entry.get("url").is_some_and(Value::is_string) && kind.as_deref() == Some("soundcloud")
}

/// Pick the SoundCloud link out of an IDHS search result.
pub fn pick_soundcloud_link(result: &Value) -> Option<String> {
    if let Some(links) = result.get("links").and_then(Value::as_array)
        && let Some(url) = links
            .iter()
            .find(|entry| is_usable_entry(entry))
            .and_then(|entry| entry.get("url"))
            .and_then(Value::as_str)
    {
        return Some(url.to_string());
    }

    if let Some(items) = result.as_array() {
        return items
            .iter()
            .filter_map(Value::as_str)
            .find(|item| contains_soundcloud_url(item))
            .and_then(extract_soundcloud_url);
    }

    result
        .get("source")
        .and_then(Value::as_str)
        .and_then(extract_soundcloud_url)
}

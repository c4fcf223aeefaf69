//! Per-worker cache of station response documents.
//!
//! Responses are fetched from an FDSN station service on first use and kept
//! for the lifetime of the worker, keyed by stream id.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::debug;

use wfcollector_core::identity::FileIdentity;

pub struct InventoryCache {
    client: reqwest::Client,
    base_url: String,
    entries: HashMap<String, String>,
}

impl InventoryCache {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            entries: HashMap::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Response document for the stream of `identity`.
    pub async fn response(&mut self, identity: &FileIdentity) -> Result<&str> {
        let stream_id = identity.stream_id();
        if !self.entries.contains_key(&stream_id) {
            let xml = self.fetch(identity).await?;
            self.entries.insert(stream_id.clone(), xml);
        }
        Ok(self.entries[&stream_id].as_str())
    }

    async fn fetch(&self, identity: &FileIdentity) -> Result<String> {
        let url = identity.response_query(&self.base_url);
        debug!("Requesting instrument response from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to request response for {}", identity.stream_id()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("FDSN station service error {}: {}", status, body.trim());
        }

        Ok(response.text().await?)
    }
}

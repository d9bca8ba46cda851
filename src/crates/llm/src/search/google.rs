//! Google Custom Search JSON API client.

use crate::config::read_env;
use crate::error::{LlmError, Result};
use async_trait::async_trait;
use pipeline_core::{SearchError, SearchProvider, SearchResult};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Default Custom Search endpoint.
pub const GOOGLE_SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";

/// The API returns at most ten items per request.
const MAX_PAGE_SIZE: usize = 10;

/// Credentials and endpoint for Google Custom Search.
#[derive(Clone)]
pub struct GoogleSearchConfig {
    pub api_key: String,
    /// Programmable Search Engine ID (`cx`).
    pub engine_id: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl GoogleSearchConfig {
    pub fn new(api_key: impl Into<String>, engine_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            engine_id: engine_id.into(),
            base_url: GOOGLE_SEARCH_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Read the key and engine ID from the environment.
    pub fn from_env(api_key_env: &str, engine_id_env: &str) -> Result<Self> {
        let api_key = read_env(api_key_env)?;
        let engine_id = read_env(engine_id_env)
            .map_err(|_| LlmError::ConfigError(format!("{} is not set", engine_id_env)))?;
        Ok(Self::new(api_key, engine_id))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// [`SearchProvider`] backed by Google Custom Search.
#[derive(Clone)]
pub struct GoogleSearchClient {
    config: GoogleSearchConfig,
    client: Client,
}

impl GoogleSearchClient {
    pub fn new(config: GoogleSearchConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn parse_items(body: GoogleResponse, max_results: usize) -> Vec<SearchResult> {
        body.items
            .into_iter()
            .take(max_results)
            .map(|item| SearchResult::new(item.title, item.snippet, item.link))
            .collect()
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let num = max_results.clamp(1, MAX_PAGE_SIZE).to_string();
        debug!(query = %query, num = %num, "Querying Google Custom Search");

        let response = self
            .client
            .get(&self.config.base_url)
            .query(&[
                ("key", self.config.api_key.as_str()),
                ("cx", self.config.engine_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status("Google Search", status, error_text));
        }

        let body: GoogleResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(Self::parse_items(body, max_results))
    }
}

#[async_trait]
impl SearchProvider for GoogleSearchClient {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> std::result::Result<Vec<SearchResult>, SearchError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }
        self.fetch(query, max_results)
            .await
            .map_err(SearchError::from)
    }

    fn name(&self) -> &str {
        "google"
    }
}

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    // Absent when nothing matched.
    #[serde(default)]
    items: Vec<GoogleItem>,
}

#[derive(Debug, Deserialize)]
struct GoogleItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    link: String,
}

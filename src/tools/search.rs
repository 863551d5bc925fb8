//! Web search providers
//!
//! Search is a best-effort capability: transport or decode failures are
//! logged and surface as an empty result list, never as an error.

use crate::utils::toml_config::SearchConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub max_results: u32,
    pub topic: String,
    pub include_raw_content: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, max_results: u32, topic: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results,
            topic: topic.into(),
            include_raw_content: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub raw_content: Option<String>,
}

impl SearchHit {
    /// Full page text when the provider returned it, otherwise the snippet.
    pub fn best_content(&self) -> &str {
        self.raw_content
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .unwrap_or(&self.content)
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Vec<SearchHit>;

    fn name(&self) -> &str;
}

/// Build the provider selected by `[search]`.
pub fn create_provider(config: &SearchConfig) -> Arc<dyn SearchProvider> {
    match config.provider.as_str() {
        "duckduckgo" => Arc::new(DuckDuckGoSearch::new()),
        _ => {
            let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
            if api_key.is_none() {
                warn!(env = %config.api_key_env, "Tavily API key not set, searches will fail");
            }
            Arc::new(TavilyClient::new(
                config.base_url.clone(),
                api_key,
                Duration::from_secs(config.timeout_secs),
            ))
        }
    }
}

// ============= Tavily =============

pub struct TavilyClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    raw_content: Option<String>,
}

impl TavilyClient {
    pub fn new(base_url: String, api_key: Option<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn try_search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, String> {
        let mut http_request = self.http.post(format!("{}/search", self.base_url)).json(&json!({
            "query": request.query,
            "max_results": request.max_results,
            "topic": request.topic,
            "include_raw_content": request.include_raw_content,
        }));
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("status {}", status));
        }

        let body: TavilyResponse = response.json().await.map_err(|e| e.to_string())?;
        Ok(body
            .results
            .into_iter()
            .map(|r| SearchHit {
                url: r.url,
                title: r.title,
                content: r.content,
                raw_content: r.raw_content,
            })
            .collect())
    }
}

#[async_trait]
impl SearchProvider for TavilyClient {
    async fn search(&self, request: &SearchRequest) -> Vec<SearchHit> {
        match self.try_search(request).await {
            Ok(hits) => {
                debug!(query = %request.query, hits = hits.len(), "Tavily search");
                hits
            }
            Err(e) => {
                warn!(query = %request.query, error = %e, "Tavily search failed");
                Vec::new()
            }
        }
    }

    fn name(&self) -> &str {
        "tavily"
    }
}

// ============= DuckDuckGo =============

/// Keyless search through daedra's DuckDuckGo backend. Only snippets are
/// available, so `raw_content` is always empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct DuckDuckGoSearch;

impl DuckDuckGoSearch {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    async fn search(&self, request: &SearchRequest) -> Vec<SearchHit> {
        let args = daedra::SearchArgs {
            query: request.query.clone(),
            options: Some(daedra::SearchOptions {
                num_results: request.max_results as usize,
                ..Default::default()
            }),
        };

        match daedra::tools::search::perform_search(&args).await {
            Ok(response) => response
                .data
                .iter()
                .map(|r| SearchHit {
                    url: r.url.clone(),
                    title: r.title.clone(),
                    content: r.description.clone(),
                    raw_content: None,
                })
                .collect(),
            Err(e) => {
                warn!(query = %request.query, error = %e, "DuckDuckGo search failed");
                Vec::new()
            }
        }
    }

    fn name(&self) -> &str {
        "duckduckgo"
    }
}

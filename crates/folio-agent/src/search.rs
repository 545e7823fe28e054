use async_trait::async_trait;
use folio_core::{FolioError, FolioResult, SearchHit, SearchProvider};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Web search through a SearxNG instance's JSON API.
pub struct SearxSearch {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct SearxResponse {
    #[serde(default)]
    results: Vec<SearxResult>,
}

#[derive(Deserialize)]
struct SearxResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

impl SearxSearch {
    pub fn new(base_url: impl Into<String>) -> FolioResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| FolioError::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl SearchProvider for SearxSearch {
    async fn search(&self, query: &str, limit: usize) -> FolioResult<Vec<SearchHit>> {
        let url = format!("{}/search", self.base_url);
        debug!(query = %query, limit, "Web search");

        let resp = self
            .http
            .get(&url)
            .query(&[("q", query), ("format", "json")])
            .send()
            .await
            .map_err(|e| FolioError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FolioError::Capability(format!("search failed with {status}")));
        }
        let body: SearxResponse = resp
            .json()
            .await
            .map_err(|e| FolioError::Capability(format!("unreadable search response: {e}")))?;

        Ok(body
            .results
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .take(limit)
            .map(|r| SearchHit {
                title: if r.title.is_empty() { r.url.clone() } else { r.title },
                url: r.url,
                snippet: r.content,
            })
            .collect())
    }
}

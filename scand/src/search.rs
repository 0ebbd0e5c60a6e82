use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SearchBackendError {
    #[error("search request failed: {0}")]
    Request(String),

    #[error("search provider returned http {0}")]
    Http(u16),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub description: String,
}

#[async_trait::async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchBackendError>;
}

const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";
const RESULT_COUNT: u32 = 5;

/// Grounded on `scan_agent.py::web_search`: GET with `X-Subscription-Token`,
/// `count=5`, results read from `data["web"]["results"]`.
pub struct BraveSearchClient {
    http: reqwest::Client,
    api_key: String,
}

impl BraveSearchClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("brave search http client"),
            api_key: api_key.into(),
        }
    }
}

#[async_trait::async_trait]
impl SearchClient for BraveSearchClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchBackendError> {
        let resp = self
            .http
            .get(BRAVE_SEARCH_URL)
            .header("X-Subscription-Token", &self.api_key)
            .header("Accept", "application/json")
            .query(&[("q", query), ("count", &RESULT_COUNT.to_string())])
            .send()
            .await
            .map_err(|e| SearchBackendError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SearchBackendError::Http(resp.status().as_u16()));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SearchBackendError::Request(e.to_string()))?;

        let results = body["web"]["results"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        Ok(results
            .into_iter()
            .map(|r| SearchResult {
                title: r["title"].as_str().unwrap_or_default().to_string(),
                url: r["url"].as_str().unwrap_or_default().to_string(),
                description: r["description"].as_str().unwrap_or_default().to_string(),
            })
            .collect())
    }
}

/// `"**<title>**\n<description>\nURL: <url>"`, joined by a blank line,
/// matching `web_search`'s rendering of results into agent-visible text.
pub fn format_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No results found.".to_string();
    }
    results
        .iter()
        .map(|r| format!("**{}**\n{}\nURL: {}", r.title, r.description, r.url))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_results_empty_is_friendly() {
        assert_eq!(format_results(&[]), "No results found.");
    }

    #[test]
    fn format_results_joins_with_blank_line() {
        let results = vec![
            SearchResult {
                title: "A".into(),
                url: "https://a.test".into(),
                description: "about a".into(),
            },
            SearchResult {
                title: "B".into(),
                url: "https://b.test".into(),
                description: "about b".into(),
            },
        ];
        let text = format_results(&results);
        assert!(text.contains("**A**\nabout a\nURL: https://a.test"));
        assert!(text.contains("\n\n**B**"));
    }
}

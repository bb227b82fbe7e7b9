use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A single web search result with provenance tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub source_domain: String,
    pub retrieved_at: String,
    pub score: f64,
}

/// Which backend answers web searches.
#[derive(Debug, Clone)]
pub enum WebSearchProvider {
    /// SearxNG-style metasearch JSON API. No API key.
    Searx { base_url: String },
    /// Tavily REST API. Key comes from the secret collaborator.
    Tavily { api_key: String },
}

/// Web search over one of the configured providers. Results are treated as
/// timestamped documents; failures degrade to an empty list.
pub struct WebSearchClient {
    client: reqwest::Client,
    provider: WebSearchProvider,
    max_results: usize,
}

impl WebSearchClient {
    pub fn new(provider: WebSearchProvider, max_results: usize) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            provider,
            max_results,
        }
    }

    pub async fn search(&self, query: &str, limit: Option<usize>) -> Vec<WebSearchResult> {
        let limit = limit.unwrap_or(self.max_results);
        let query = query.trim();
        if query.is_empty() {
            warn!("empty web search query");
            return Vec::new();
        }

        let results = match &self.provider {
            WebSearchProvider::Searx { base_url } => self.search_searx(base_url, query, limit).await,
            WebSearchProvider::Tavily { api_key } => self.search_tavily(api_key, query, limit).await,
        };

        match results {
            Ok(results) => {
                info!(query, count = results.len(), "web search complete");
                results
            }
            Err(e) => {
                warn!(query, error = %e, "web search failed");
                Vec::new()
            }
        }
    }

    async fn search_searx(
        &self,
        base_url: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<WebSearchResult>, reqwest::Error> {
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
            #[serde(default)]
            score: Option<f64>,
        }

        let url = format!("{}/search", base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .query(&[("q", query), ("format", "json")])
            .send()
            .await?
            .error_for_status()?;
        let body: SearxResponse = resp.json().await?;

        let retrieved_at = chrono::Utc::now().to_rfc3339();
        Ok(body
            .results
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, r)| WebSearchResult {
                source_domain: extract_domain(&r.url),
                title: if r.title.is_empty() { "Untitled".into() } else { r.title },
                snippet: r.content,
                // Position-based fallback score: first hit 1.0, decreasing.
                score: r.score.unwrap_or_else(|| (1.0 - i as f64 * 0.1).max(0.5)),
                url: r.url,
                retrieved_at: retrieved_at.clone(),
            })
            .collect())
    }

    async fn search_tavily(
        &self,
        api_key: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<WebSearchResult>, reqwest::Error> {
        #[derive(Deserialize)]
        struct TavilyResponse {
            #[serde(default)]
            results: Vec<TavilyResult>,
        }
        #[derive(Deserialize)]
        struct TavilyResult {
            #[serde(default)]
            title: String,
            #[serde(default)]
            url: String,
            #[serde(default)]
            content: String,
            #[serde(default)]
            score: Option<f64>,
        }

        let resp = self
            .client
            .post("https://api.tavily.com/search")
            .json(&serde_json::json!({
                "api_key": api_key,
                "query": query,
                "max_results": limit,
                "include_answer": false,
                "include_raw_content": false,
            }))
            .send()
            .await?
            .error_for_status()?;
        let body: TavilyResponse = resp.json().await?;

        let retrieved_at = chrono::Utc::now().to_rfc3339();
        Ok(body
            .results
            .into_iter()
            .map(|r| WebSearchResult {
                source_domain: extract_domain(&r.url),
                title: if r.title.is_empty() { "Untitled".into() } else { r.title },
                snippet: r.content,
                score: r.score.unwrap_or(0.5),
                url: r.url,
                retrieved_at: retrieved_at.clone(),
            })
            .collect())
    }

    pub async fn health_check(&self) -> bool {
        !self.search("test", Some(1)).await.is_empty()
    }

    /// Render results as a prompt block.
    pub fn format_results(results: &[WebSearchResult], max_snippet: usize) -> String {
        if results.is_empty() {
            return String::new();
        }
        let mut lines = vec!["**Web search results:**\n".to_string()];
        for (i, r) in results.iter().enumerate() {
            let mut snippet = r.snippet.clone();
            if snippet.len() > max_snippet {
                let mut cut = max_snippet;
                while !snippet.is_char_boundary(cut) {
                    cut -= 1;
                }
                snippet.truncate(cut);
                snippet = format!("{}...", snippet.trim_end());
            }
            lines.push(format!("{}. **{}**", i + 1, r.title));
            lines.push(format!("   {snippet}"));
            let date = r.retrieved_at.get(..10).unwrap_or("unknown");
            lines.push(format!("   _Source: {} | Retrieved: {}_\n", r.source_domain, date));
        }
        lines.join("\n")
    }
}

/// Extract the bare host from a URL, dropping any `www.` prefix.
pub fn extract_domain(url: &str) -> String {
    let rest = url.split("://").nth(1).unwrap_or(url);
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host = host.split('@').next_back().unwrap_or(host);
    let host = host.split(':').next().unwrap_or(host);
    host.strip_prefix("www.").unwrap_or(host).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_extraction_strips_scheme_path_and_www() {
        assert_eq!(extract_domain("https://www.example.com/a/b?q=1"), "example.com");
        assert_eq!(extract_domain("http://news.ycombinator.com"), "news.ycombinator.com");
        assert_eq!(extract_domain("https://host.io:8443/x"), "host.io");
        assert_eq!(extract_domain(""), "");
    }

    #[test]
    fn format_results_numbers_and_attributes() {
        let results = vec![WebSearchResult {
            title: "Rust 1.80 released".into(),
            url: "https://blog.rust-lang.org/post".into(),
            snippet: "The Rust team is happy to announce...".into(),
            source_domain: "blog.rust-lang.org".into(),
            retrieved_at: "2026-08-01T10:00:00Z".into(),
            score: 0.9,
        }];
        let block = WebSearchClient::format_results(&results, 200);
        assert!(block.contains("1. **Rust 1.80 released**"));
        assert!(block.contains("Source: blog.rust-lang.org | Retrieved: 2026-08-01"));
    }

    #[test]
    fn format_results_empty_is_empty() {
        assert_eq!(WebSearchClient::format_results(&[], 200), "");
    }

    #[tokio::test]
    async fn empty_query_short_circuits() {
        let client = WebSearchClient::new(
            WebSearchProvider::Searx { base_url: "http://127.0.0.1:1".into() },
            5,
        );
        assert!(client.search("   ", None).await.is_empty());
    }
}

use serde::Deserialize;
use tracing::{info, warn};

/// One hit from the semantic index.
#[derive(Debug, Clone, Deserialize)]
pub struct BrainSearchResult {
    #[serde(default)]
    pub entry: String,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub score: f64,
}

/// Client for the semantic-search service over the brain folder.
///
/// The service owns indexing and embeddings; the core only consumes
/// `GET /api/search`. Errors degrade to an empty result list.
pub struct SemanticSearchClient {
    client: reqwest::Client,
    base_url: String,
}

impl SemanticSearchClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn search(&self, query: &str, limit: usize) -> Vec<BrainSearchResult> {
        let url = format!("{}/api/search", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("q", query), ("limit", &limit.to_string())])
            .send()
            .await;

        let resp = match resp {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), "semantic search returned error status");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "semantic search request failed");
                return Vec::new();
            }
        };

        match resp.json::<Vec<BrainSearchResult>>().await {
            Ok(results) => {
                info!(query, count = results.len(), "brain search complete");
                results
            }
            Err(e) => {
                warn!(error = %e, "semantic search returned invalid JSON");
                Vec::new()
            }
        }
    }

    /// Filter results to a minimum relevance score; when that would empty
    /// the list, keep the single best hit so the model still sees
    /// something when anything matched at all.
    pub fn filter_relevant(
        mut results: Vec<BrainSearchResult>,
        min_score: f64,
    ) -> Vec<BrainSearchResult> {
        if results.is_empty() {
            return results;
        }
        let filtered: Vec<BrainSearchResult> = results
            .iter()
            .filter(|r| r.score >= min_score)
            .cloned()
            .collect();
        if filtered.is_empty() {
            results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            results.truncate(1);
            results
        } else {
            filtered
        }
    }

    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    pub async fn stats(&self) -> Option<serde_json::Value> {
        let url = format!("{}/api/stats", self.base_url);
        let resp = self.client.get(&url).send().await.ok()?;
        resp.json().await.ok()
    }
}

/// Render brain results as a prompt block.
pub fn format_results(results: &[BrainSearchResult], max_snippet: usize) -> String {
    if results.is_empty() {
        return String::new();
    }
    let mut lines = vec!["**Relevant notes from your knowledge base:**\n".to_string()];
    for r in results {
        let mut snippet = r.entry.clone();
        if snippet.len() > max_snippet {
            let mut cut = max_snippet;
            while !snippet.is_char_boundary(cut) {
                cut -= 1;
            }
            snippet.truncate(cut);
            snippet.push_str("...");
        }
        lines.push(format!("- _{}_ (score {:.2}): {}", r.file, r.score, snippet));
    }
    lines.join("\n")
}

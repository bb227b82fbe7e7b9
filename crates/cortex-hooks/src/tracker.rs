//! Per-request source tracking.
//!
//! Tools record which sources they consulted (brain documents, web hosts)
//! while a message is being processed; the citation post-hook reads the
//! records back. The tracker rides in task-local storage so hooks and
//! tools see the caller's tracker without it threading through every
//! signature: the pipeline installs a scope around the whole request and
//! the scope ends with it.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::debug;

tokio::task_local! {
    static CURRENT_TRACKER: Arc<SourceTracker>;
}

/// Run `f` with `tracker` installed as the current request's tracker.
pub async fn with_tracker<F>(tracker: Arc<SourceTracker>, f: F) -> F::Output
where
    F: std::future::Future,
{
    CURRENT_TRACKER.scope(tracker, f).await
}

/// The current request's tracker, if one is installed.
pub fn current_tracker() -> Option<Arc<SourceTracker>> {
    CURRENT_TRACKER.try_with(|t| t.clone()).ok()
}

/// Record of a single tool invocation and the sources it produced.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRecord {
    pub tool_name: String,
    pub success: bool,
    /// Source identifiers: document names, host names.
    pub sources: Vec<String>,
    /// Brief excerpts from the sources.
    pub snippets: Vec<String>,
    pub metadata: serde_json::Value,
}

/// Accumulates source records during one message's processing.
///
/// Scoped to a single request; never shared between pipelines.
#[derive(Default)]
pub struct SourceTracker {
    records: Mutex<Vec<SourceRecord>>,
}

impl SourceTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(
        &self,
        tool_name: &str,
        success: bool,
        sources: Vec<String>,
        snippets: Vec<String>,
    ) {
        self.record_with_metadata(tool_name, success, sources, snippets, serde_json::json!({}));
    }

    pub fn record_with_metadata(
        &self,
        tool_name: &str,
        success: bool,
        sources: Vec<String>,
        snippets: Vec<String>,
        metadata: serde_json::Value,
    ) {
        debug!(tool = tool_name, success, sources = sources.len(), "source recorded");
        self.records
            .lock()
            .expect("source tracker poisoned")
            .push(SourceRecord {
                tool_name: tool_name.to_string(),
                success,
                sources,
                snippets,
                metadata,
            });
    }

    /// Whether any successful record carries sources.
    pub fn has_sources(&self) -> bool {
        self.records
            .lock()
            .expect("source tracker poisoned")
            .iter()
            .any(|r| r.success && !r.sources.is_empty())
    }

    /// Unique sources for one tool, in first-seen order.
    pub fn sources_for(&self, tool_name: &str) -> Vec<String> {
        let records = self.records.lock().expect("source tracker poisoned");
        let mut seen = Vec::new();
        for record in records.iter().filter(|r| r.success && r.tool_name == tool_name) {
            for source in &record.sources {
                if !seen.contains(source) {
                    seen.push(source.clone());
                }
            }
        }
        seen
    }

    /// Source counts per tool, for logging.
    pub fn tool_stats(&self) -> Vec<(String, usize)> {
        let records = self.records.lock().expect("source tracker poisoned");
        let mut stats: Vec<(String, usize)> = Vec::new();
        for record in records.iter() {
            match stats.iter_mut().find(|(name, _)| name == &record.tool_name) {
                Some((_, count)) => *count += record.sources.len(),
                None => stats.push((record.tool_name.clone(), record.sources.len())),
            }
        }
        stats
    }

    /// Compact citation block: brain documents first (up to 3, italicized),
    /// then web hosts (up to 2), each with a `(+N more)` overflow marker.
    pub fn format_citations(&self) -> String {
        if !self.has_sources() {
            return String::new();
        }

        let brain = self.sources_for("brain_search");
        let web = self.sources_for("web_search");
        let mut parts = Vec::new();

        if !brain.is_empty() {
            let shown: Vec<String> = brain.iter().take(3).map(|s| format!("*{s}*")).collect();
            let mut line = format!("📚 Brain: {}", shown.join(", "));
            if brain.len() > 3 {
                line.push_str(&format!(" (+{} more)", brain.len() - 3));
            }
            parts.push(line);
        }

        if !web.is_empty() {
            let shown: Vec<String> = web.iter().take(2).cloned().collect();
            let mut line = format!("🌐 Web: {}", shown.join(", "));
            if web.len() > 2 {
                line.push_str(&format!(" (+{} more)", web.len() - 2));
            }
            parts.push(line);
        }

        parts.join("\n")
    }
}

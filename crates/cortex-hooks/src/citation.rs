//! Citation decoration post-hook.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::tracker::current_tracker;
use crate::{HookError, MessageEvent, PostHook};

/// Appends a compact source-citation block when the request's tracker
/// recorded brain or web sources. The block is separated from the body by
/// a horizontal rule; without sources the response passes through.
pub struct CitationHook;

#[async_trait]
impl PostHook for CitationHook {
    fn name(&self) -> &str {
        "citation"
    }

    async fn handle(
        &self,
        response: &str,
        _event: &MessageEvent,
    ) -> Result<Option<String>, HookError> {
        let Some(tracker) = current_tracker() else {
            debug!("no tracker in scope, skipping citations");
            return Ok(None);
        };

        if !tracker.has_sources() {
            return Ok(None);
        }

        let citations = tracker.format_citations();
        if citations.is_empty() {
            return Ok(None);
        }

        info!(stats = ?tracker.tool_stats(), "citations appended");
        Ok(Some(format!("{response}\n\n---\n{citations}")))
    }
}

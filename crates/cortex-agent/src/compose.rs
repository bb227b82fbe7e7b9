use std::sync::Arc;

use tracing::debug;

use cortex_conversation::{estimate_tokens, ConversationManager, StoredMessage};
use cortex_facts::FactsStore;
use cortex_hooks::{current_tracker, MessageEvent};
use cortex_provider::Message;
use cortex_search::semantic::{self, SemanticSearchClient};
use cortex_search::web::WebSearchClient;

use crate::tools::facts::message_references_personal_context;

/// Queries shorter than this skip brain search — one-word inputs retrieve
/// noise, not notes.
const MIN_QUERY_CHARS: usize = 10;

/// Minimum brain relevance; when everything scores lower, the single top
/// hit is kept.
const MIN_RELEVANCE: f64 = 0.7;

/// Retrieval widths.
const BRAIN_RESULTS: usize = 3;
const WEB_RESULTS: usize = 3;
const PAST_HITS: usize = 2;

/// The composed prompt plus which sources went into it, for turn metadata.
#[derive(Debug, Clone)]
pub struct ComposedContext {
    pub messages: Vec<Message>,
    pub facts_injected: bool,
    pub brain_used: bool,
    pub web_used: bool,
}

/// Builds the message list handed to the provider, under a token budget.
///
/// Layout: identity (plus facts when the message references personal
/// context) and the date at the head where they are cheap and stable;
/// summarized history in the middle; retrieved context just before the
/// final user turn, where recency-weighted attention helps small models.
pub struct ContextComposer {
    conversations: Arc<ConversationManager>,
    brain: Option<Arc<SemanticSearchClient>>,
    web: Option<Arc<WebSearchClient>>,
    facts_dir: Option<String>,
    max_context_tokens: usize,
    keep_recent: usize,
}

impl ContextComposer {
    pub fn new(
        conversations: Arc<ConversationManager>,
        brain: Option<Arc<SemanticSearchClient>>,
        web: Option<Arc<WebSearchClient>>,
        facts_dir: Option<String>,
        max_context_tokens: usize,
        keep_recent: usize,
    ) -> Self {
        Self {
            conversations,
            brain,
            web,
            facts_dir,
            max_context_tokens,
            keep_recent,
        }
    }

    pub async fn compose(
        &self,
        event: &MessageEvent,
        shim_tools: Option<&str>,
        attachment_text: Option<&str>,
    ) -> ComposedContext {
        let (enable_brain, enable_web, enable_facts) = event.context_flags();

        // System identity, with injected fact context when warranted.
        let mut identity = format!(
            "You are Cortex, a personal knowledge assistant talking with <@{}>. \
             Ground your answers in the provided context and say so plainly when \
             you don't know something.",
            event.user_id
        );
        let mut facts_injected = false;
        if enable_facts && message_references_personal_context(&event.text) {
            let store = FactsStore::new(&event.user_id, self.facts_dir.as_deref());
            let context = store.context_string(20);
            if !context.is_empty() {
                identity.push_str("\n\n");
                identity.push_str(&context);
                facts_injected = true;
            }
        }

        let date_block = format!("Today is {}", chrono::Utc::now().format("%Y-%m-%d"));

        let shim_block = shim_tools.filter(|s| !s.is_empty()).map(String::from);

        // Per-turn retrieved context, gathered before the history budget is
        // carved up.
        let (aux_block, brain_used, web_used) =
            self.gather_retrieved_context(event, enable_brain, enable_web).await;

        // User turn: extracted attachment content precedes the text.
        let user_turn = match attachment_text {
            Some(extracted) if !extracted.is_empty() => {
                format!("{extracted}\n\n{}", event.text)
            }
            _ => event.text.clone(),
        };

        // Budget: everything that isn't history is reserved first; aux
        // context is dropped entirely when it doesn't fit.
        let base_reserved = estimate_tokens(&identity)
            + estimate_tokens(&date_block)
            + shim_block.as_deref().map(estimate_tokens).unwrap_or(0)
            + estimate_tokens(&user_turn);

        let aux_block = match &aux_block {
            Some(aux)
                if estimate_tokens(aux)
                    <= self.max_context_tokens.saturating_sub(base_reserved) =>
            {
                Some(aux.clone())
            }
            Some(_) => {
                debug!("retrieved context dropped: over budget");
                None
            }
            None => None,
        };
        let reserved =
            base_reserved + aux_block.as_deref().map(estimate_tokens).unwrap_or(0);
        let history_budget = self.max_context_tokens.saturating_sub(reserved);

        let history = self.conversations.load(&event.user_id, &event.thread_id).await;
        let history = self
            .conversations
            .summarize_if_needed(history, history_budget, self.keep_recent)
            .await;

        let mut messages = Vec::with_capacity(history.len() + 5);
        messages.push(Message::system(identity));
        messages.push(Message::system(date_block));
        if let Some(shim) = shim_block {
            messages.push(Message::system(shim));
        }
        for stored in &history {
            messages.push(stored_to_message(stored));
        }
        if let Some(aux) = aux_block {
            messages.push(Message::system(aux));
        }
        messages.push(Message::user(user_turn));

        ComposedContext {
            messages,
            facts_injected,
            brain_used,
            web_used,
        }
    }

    /// Brain, web, and past-conversation context as one auxiliary system
    /// block. Records consulted sources into the request tracker.
    async fn gather_retrieved_context(
        &self,
        event: &MessageEvent,
        enable_brain: bool,
        enable_web: bool,
    ) -> (Option<String>, bool, bool) {
        let mut sections: Vec<String> = Vec::new();
        let mut brain_used = false;
        let mut web_used = false;

        if enable_brain
            && !event.has_attachments
            && event.text.len() > MIN_QUERY_CHARS
        {
            if let Some(brain) = &self.brain {
                let results = brain.search(&event.text, BRAIN_RESULTS).await;
                let results = SemanticSearchClient::filter_relevant(results, MIN_RELEVANCE);
                if !results.is_empty() {
                    if let Some(tracker) = current_tracker() {
                        tracker.record(
                            "brain_search",
                            true,
                            results.iter().map(|r| r.file.clone()).collect(),
                            results
                                .iter()
                                .map(|r| r.entry.chars().take(120).collect())
                                .collect(),
                        );
                    }
                    sections.push(semantic::format_results(&results, 300));
                    brain_used = true;
                }
            }
        }

        if enable_web && !event.has_attachments {
            if let Some(web) = &self.web {
                let results = web.search(&event.text, Some(WEB_RESULTS)).await;
                if !results.is_empty() {
                    if let Some(tracker) = current_tracker() {
                        tracker.record(
                            "web_search",
                            true,
                            results.iter().map(|r| r.source_domain.clone()).collect(),
                            results
                                .iter()
                                .map(|r| r.snippet.chars().take(120).collect())
                                .collect(),
                        );
                    }
                    sections.push(WebSearchClient::format_results(&results, 200));
                    web_used = true;
                }
            }
        }

        if enable_brain && !event.has_attachments {
            let hits = self
                .conversations
                .search_past(&event.text, Some(&event.user_id), PAST_HITS)
                .await;
            if !hits.is_empty() {
                let mut lines = vec!["**From past conversations:**".to_string()];
                for (question, answer) in &hits {
                    lines.push(format!(
                        "- You were asked: {} — you answered: {}",
                        clip(&question.content, 120),
                        clip(&answer.content, 150)
                    ));
                }
                sections.push(lines.join("\n"));
            }
        }

        if sections.is_empty() {
            (None, brain_used, web_used)
        } else {
            (Some(sections.join("\n\n")), brain_used, web_used)
        }
    }
}

fn stored_to_message(stored: &StoredMessage) -> Message {
    Message {
        role: stored.role,
        content: stored.content.clone(),
    }
}

fn clip(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

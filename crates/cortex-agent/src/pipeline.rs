use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{info, warn};

use cortex_conversation::ConversationManager;
use cortex_core::types::ConversationKey;
use cortex_hooks::{with_tracker, HookSet, MessageEvent, SourceTracker};
use cortex_provider::{
    GenerateRequest, GenerateResponse, LlmProvider, ModelManager, ProviderError, Role,
};
use cortex_tool::{build_shim_system_prompt, run_native_tool_loop, run_shim_tool_loop, ToolRegistry};

use crate::attach;
use crate::compose::{ComposedContext, ContextComposer};
use crate::platform::{ChannelKind, ChatPlatform, InboundMessage};

/// Events older than this fall out of the idempotence store.
const DEDUPE_TTL: Duration = Duration::from_secs(300);

/// Pause before the single retry of a transient provider failure.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

const WORKING_INDICATOR: &str = "🤔 Thinking…";
const BACKEND_DOWN_REPLY: &str =
    "🙇 The assistant backend is temporarily unavailable. Please try again in a moment.";
const AUTH_REJECTED_REPLY: &str =
    "🔑 Your API key was rejected by the provider. Use /apikey to update it.";
const POST_FAILED_REPLY: &str =
    "⚠️ I generated a reply but couldn't deliver it. The exchange has been saved.";
const TIMEOUT_REPLY: &str =
    "⏳ This is taking longer than expected and I had to give up. Please try again.";

/// Message patterns worth offering to save to the knowledge base.
const SAVEABLE_PATTERNS: &[&str] = &[
    "i use ", "my strategy", "my approach", "i learned", "i decided", "my workflow",
];

/// Why an inbound message was dropped without a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Duplicate,
    FromBot,
    NotDirectMessage,
    Empty,
}

/// What processing a message produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Skipped(SkipReason),
    /// A reply was posted; carries the final response text.
    Replied(String),
    /// Processing failed; a friendly error was posted instead.
    ErrorReplied(String),
}

struct Generated {
    event: MessageEvent,
    composed: ComposedContext,
    response: GenerateResponse,
    final_text: String,
    provider_id: String,
    fallback_from: Option<String>,
    latency_ms: u64,
}

/// Turns one inbound direct message into one outbound reply.
///
/// No failure escapes to the platform adapter: every error path posts a
/// friendly message and deletes the working indicator.
pub struct MessagePipeline {
    platform: Arc<dyn ChatPlatform>,
    composer: ContextComposer,
    conversations: Arc<ConversationManager>,
    registry: Arc<ToolRegistry>,
    models: Arc<ModelManager>,
    hooks: Arc<HookSet>,
    seen_events: DashMap<String, Instant>,
    /// Optional bound on generation; elapsed time past it posts a friendly
    /// timeout reply instead of leaving the user hanging.
    reply_timeout: Option<Duration>,
}

impl MessagePipeline {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        composer: ContextComposer,
        conversations: Arc<ConversationManager>,
        registry: Arc<ToolRegistry>,
        models: Arc<ModelManager>,
        hooks: Arc<HookSet>,
    ) -> Self {
        Self {
            platform,
            composer,
            conversations,
            registry,
            models,
            hooks,
            seen_events: DashMap::new(),
            reply_timeout: None,
        }
    }

    /// Bound the generation phase; the operator configures this.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(timeout);
        self
    }

    /// Process one inbound message end to end.
    pub async fn process(&self, msg: InboundMessage) -> Outcome {
        if !self.first_sighting(&msg.event_id) {
            return Outcome::Skipped(SkipReason::Duplicate);
        }
        if msg.from_bot {
            return Outcome::Skipped(SkipReason::FromBot);
        }
        if msg.channel_kind != ChannelKind::Dm {
            return Outcome::Skipped(SkipReason::NotDirectMessage);
        }
        if msg.text.trim().is_empty() && msg.attachments.is_empty() {
            return Outcome::Skipped(SkipReason::Empty);
        }

        let key = ConversationKey::new(&msg.user_id, &msg.thread());
        info!(conversation = %key, "processing direct message");

        // Working indicator: posted before processing, deleted on every
        // exit path.
        let working_id = match self
            .platform
            .post_message(&msg.channel, WORKING_INDICATOR, self.thread_arg(&msg))
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "failed to post working indicator");
                None
            }
        };

        let tracker = SourceTracker::new();
        let inner = with_tracker(tracker, self.run_inner(&msg));
        let generated = match self.reply_timeout {
            Some(bound) => match tokio::time::timeout(bound, inner).await {
                Ok(generated) => generated,
                Err(_) => {
                    warn!(user = %msg.user_id, bound_s = bound.as_secs(), "reply timed out");
                    self.delete_working(&msg.channel, working_id.as_deref()).await;
                    self.post_best_effort(&msg, TIMEOUT_REPLY).await;
                    return Outcome::ErrorReplied(TIMEOUT_REPLY.to_string());
                }
            },
            None => inner.await,
        };

        self.delete_working(&msg.channel, working_id.as_deref()).await;

        match generated {
            Ok(out) => self.deliver(&msg, out).await,
            Err(e) => {
                warn!(user = %msg.user_id, error = %e, "generation failed");
                let friendly = match e {
                    ProviderError::AuthRejected(_) => AUTH_REJECTED_REPLY,
                    _ => BACKEND_DOWN_REPLY,
                };
                self.post_best_effort(&msg, friendly).await;
                Outcome::ErrorReplied(friendly.to_string())
            }
        }
    }

    /// Hooks → attachments → compose → generate → post-hooks. Runs inside
    /// the tracker scope so tools and the citation hook share records.
    async fn run_inner(&self, msg: &InboundMessage) -> Result<Generated, ProviderError> {
        let mut event = MessageEvent {
            user_id: msg.user_id.to_string(),
            thread_id: msg.thread().to_string(),
            channel: msg.channel.clone(),
            text: msg.text.clone(),
            has_attachments: !msg.attachments.is_empty(),
            timestamp: msg.timestamp.clone(),
            intent: None,
        };

        self.hooks.run_pre(&mut event).await;

        let attachment_text = self.extract_attachments(msg).await;

        let (provider, model) = self.models.resolve_for_user(msg.user_id.as_str())?;
        let shim_prompt = if provider.supports_native_tools() {
            None
        } else {
            let descriptions = self.registry.prompt_descriptions(msg.user_id.as_str());
            Some(build_shim_system_prompt(&descriptions))
        };

        let composed = self
            .composer
            .compose(&event, shim_prompt.as_deref(), attachment_text.as_deref())
            .await;

        let started = Instant::now();
        let (response, provider_id, fallback_from) = self
            .generate(provider, &model, msg.user_id.as_str(), &composed)
            .await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        info!(
            user = %msg.user_id,
            provider = %provider_id,
            model = %response.model,
            tokens_in = response.tokens_in,
            tokens_out = response.tokens_out,
            latency_ms,
            "generation complete"
        );

        let final_text = self.hooks.run_post(response.content.clone(), &event).await;

        Ok(Generated {
            event,
            composed,
            response,
            final_text,
            provider_id,
            fallback_from,
            latency_ms,
        })
    }

    /// Run the appropriate tool loop. Transient failures get one retry
    /// after a short backoff; quota exhaustion on a non-default provider
    /// reruns once against the configured default.
    async fn generate(
        &self,
        provider: Arc<dyn LlmProvider>,
        model: &str,
        user_id: &str,
        composed: &ComposedContext,
    ) -> Result<(GenerateResponse, String, Option<String>), ProviderError> {
        let mut result = self.run_loop(provider.as_ref(), model, user_id, composed).await;
        if matches!(&result, Err(e) if e.is_transient()) {
            warn!(provider = provider.id(), "transient provider failure, retrying once");
            tokio::time::sleep(RETRY_BACKOFF).await;
            result = self.run_loop(provider.as_ref(), model, user_id, composed).await;
        }

        match result {
            Ok(response) => Ok((response, provider.id().to_string(), None)),
            Err(ProviderError::QuotaExhausted(msg))
                if provider.id() != self.models.default_provider_id() =>
            {
                warn!(
                    from = provider.id(),
                    to = self.models.default_provider_id(),
                    "quota exhausted, retrying on default provider: {msg}"
                );
                let (fallback, fallback_model) = self.models.default_route()?;
                let response = self
                    .run_loop(fallback.as_ref(), &fallback_model, user_id, composed)
                    .await?;
                Ok((
                    response,
                    fallback.id().to_string(),
                    Some(provider.id().to_string()),
                ))
            }
            Err(e) => Err(e),
        }
    }

    async fn run_loop(
        &self,
        provider: &dyn LlmProvider,
        model: &str,
        user_id: &str,
        composed: &ComposedContext,
    ) -> Result<GenerateResponse, ProviderError> {
        let req = GenerateRequest {
            model: model.to_string(),
            system: None,
            messages: composed.messages.clone(),
            max_tokens: 1024,
            temperature: 0.7,
            tools: if provider.supports_native_tools() {
                self.registry.tool_definitions(user_id)
            } else {
                Vec::new()
            },
            raw_messages: None,
            user_id: Some(user_id.to_string()),
        };

        if provider.supports_native_tools() {
            run_native_tool_loop(provider, req, &self.registry, user_id).await
        } else {
            run_shim_tool_loop(provider, req, &self.registry, user_id).await
        }
    }

    /// Post the reply and persist both turns. Posting failure still
    /// persists the exchange, then posts a friendly error.
    async fn deliver(&self, msg: &InboundMessage, out: Generated) -> Outcome {
        let posted = self
            .platform
            .post_message(&msg.channel, &out.final_text, self.thread_arg(msg))
            .await;

        self.persist_turns(msg, &out).await;

        match posted {
            Ok(_) => {
                self.offer_save_affordance(msg).await;
                Outcome::Replied(out.final_text)
            }
            Err(e) => {
                warn!(error = %e, "failed to post reply");
                self.post_best_effort(msg, POST_FAILED_REPLY).await;
                Outcome::ErrorReplied(POST_FAILED_REPLY.to_string())
            }
        }
    }

    async fn persist_turns(&self, msg: &InboundMessage, out: &Generated) {
        let (brain, web, facts) = out.event.context_flags();
        let user_metadata = serde_json::json!({
            "context": {
                "brain": brain && out.composed.brain_used,
                "web": web && out.composed.web_used,
                "facts": out.composed.facts_injected,
            },
        });
        if let Err(e) = self
            .conversations
            .save(msg.user_id.as_str(), msg.thread().as_str(), Role::User, &msg.text, Some(user_metadata))
            .await
        {
            warn!(error = %e, "failed to persist user turn");
        }

        let mut assistant_metadata = serde_json::json!({
            "model": out.response.model,
            "provider": out.provider_id,
            "tokens_in": out.response.tokens_in,
            "tokens_out": out.response.tokens_out,
            "latency_ms": out.latency_ms,
        });
        if let Some(ref from) = out.fallback_from {
            assistant_metadata["fallback_from"] = serde_json::json!(from);
        }
        if let Err(e) = self
            .conversations
            .save(
                msg.user_id.as_str(),
                msg.thread().as_str(),
                Role::Assistant,
                &out.final_text,
                Some(assistant_metadata),
            )
            .await
        {
            warn!(error = %e, "failed to persist assistant turn");
        }
    }

    /// Download and extract every attachment; failures become inline notes
    /// rather than aborting the message.
    async fn extract_attachments(&self, msg: &InboundMessage) -> Option<String> {
        if msg.attachments.is_empty() {
            return None;
        }

        let mut parts = Vec::new();
        for attachment in &msg.attachments {
            let extracted = match self
                .platform
                .download_file(&attachment.url, &attachment.bearer)
                .await
            {
                Ok(bytes) => {
                    attach::extract_text(&attachment.filename, &attachment.content_type, &bytes)
                        .unwrap_or_else(|e| {
                            format!("[Attachment '{}' could not be read: {e}]", attachment.filename)
                        })
                }
                Err(e) => {
                    warn!(file = %attachment.filename, error = %e, "attachment download failed");
                    format!("[Attachment '{}' could not be downloaded]", attachment.filename)
                }
            };
            parts.push(format!(
                "--- Attachment: {} ---\n{}",
                attachment.filename, extracted
            ));
        }
        Some(parts.join("\n\n"))
    }

    /// If the exchange looks worth keeping, offer to save it.
    async fn offer_save_affordance(&self, msg: &InboundMessage) {
        if !looks_saveable(&msg.text) {
            return;
        }
        let _ = self
            .platform
            .post_message(
                &msg.channel,
                "💾 That sounds worth keeping. Say \"save this\" and I'll add it to your notes.",
                self.thread_arg(msg),
            )
            .await;
    }

    fn thread_arg<'a>(&self, msg: &'a InboundMessage) -> Option<&'a str> {
        msg.thread_id.as_ref().map(|t| t.as_str())
    }

    async fn delete_working(&self, channel: &str, working_id: Option<&str>) {
        if let Some(id) = working_id {
            if let Err(e) = self.platform.delete_message(channel, id).await {
                warn!(error = %e, "failed to delete working indicator");
            }
        }
    }

    async fn post_best_effort(&self, msg: &InboundMessage, text: &str) {
        if let Err(e) = self
            .platform
            .post_message(&msg.channel, text, self.thread_arg(msg))
            .await
        {
            warn!(error = %e, "failed to post error reply");
        }
    }

    /// Idempotence store: true the first time an event id is seen within
    /// the TTL window.
    fn first_sighting(&self, event_id: &str) -> bool {
        if let Some(seen) = self.seen_events.get(event_id) {
            if seen.elapsed() < DEDUPE_TTL {
                return false;
            }
        }
        // Opportunistic prune keeps the map bounded under sustained load.
        if self.seen_events.len() > 1024 {
            self.seen_events.retain(|_, t| t.elapsed() < DEDUPE_TTL);
        }
        self.seen_events.insert(event_id.to_string(), Instant::now());
        true
    }
}

/// Does the user message match a pattern worth offering to save?
pub fn looks_saveable(text: &str) -> bool {
    let lower = text.to_lowercase();
    SAVEABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saveable_patterns_match() {
        assert!(looks_saveable("I use spaced repetition for studying"));
        assert!(looks_saveable("My strategy for interviews is preparation"));
        assert!(!looks_saveable("what's the weather like"));
    }
}

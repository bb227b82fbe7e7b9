//! Hook pipeline: ordered pre-process and post-process hooks around
//! message handling.
//!
//! Pre-hooks may mutate the event in place (the intent classifier adds its
//! classification); post-hooks may replace the response text (the citation
//! hook appends sources). Hooks run in registration order, and a failing
//! hook is logged and skipped — it never breaks the reply.

pub mod citation;
pub mod intent;
pub mod tracker;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub use citation::CitationHook;
pub use intent::{classify_intent, Intent, IntentClassification, IntentClassifierHook};
pub use tracker::{current_tracker, with_tracker, SourceRecord, SourceTracker};

#[derive(Debug, Error)]
#[error("{0}")]
pub struct HookError(pub String);

/// The per-message event envelope hooks operate on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub user_id: String,
    pub thread_id: String,
    /// Channel the reply will be posted to.
    pub channel: String,
    pub text: String,
    pub has_attachments: bool,
    /// RFC 3339 receive time.
    pub timestamp: String,
    /// Set by the intent classifier pre-hook.
    pub intent: Option<IntentClassification>,
}

impl MessageEvent {
    /// Context flags with the classifier's defaults when no classification
    /// ran (brain and facts enabled, web disabled).
    pub fn context_flags(&self) -> (bool, bool, bool) {
        match &self.intent {
            Some(c) => (c.enable_brain, c.enable_web, c.enable_facts),
            None => (true, false, true),
        }
    }
}

/// Runs before generation; may mutate the event.
#[async_trait]
pub trait PreHook: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, event: &mut MessageEvent) -> Result<(), HookError>;
}

/// Runs after generation; returning `Some` replaces the response text.
#[async_trait]
pub trait PostHook: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, response: &str, event: &MessageEvent)
        -> Result<Option<String>, HookError>;
}

/// Ordered hook registry. Registration order is execution order.
#[derive(Default)]
pub struct HookSet {
    pre: Vec<Arc<dyn PreHook>>,
    post: Vec<Arc<dyn PostHook>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_pre(&mut self, hook: Arc<dyn PreHook>) {
        debug!(hook = hook.name(), "pre-hook registered");
        self.pre.push(hook);
    }

    pub fn register_post(&mut self, hook: Arc<dyn PostHook>) {
        debug!(hook = hook.name(), "post-hook registered");
        self.post.push(hook);
    }

    /// Run all pre-hooks in order. A failing hook is logged and skipped.
    pub async fn run_pre(&self, event: &mut MessageEvent) {
        for hook in &self.pre {
            if let Err(e) = hook.handle(event).await {
                warn!(hook = hook.name(), error = %e, "pre-hook failed, skipping");
            }
        }
    }

    /// Run all post-hooks in order, chaining replacements. A failing hook
    /// preserves the response seen so far.
    pub async fn run_post(&self, response: String, event: &MessageEvent) -> String {
        let mut current = response;
        for hook in &self.post {
            match hook.handle(&current, event).await {
                Ok(Some(replaced)) => current = replaced,
                Ok(None) => {}
                Err(e) => {
                    warn!(hook = hook.name(), error = %e, "post-hook failed, keeping response");
                }
            }
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: &str) -> MessageEvent {
        MessageEvent {
            user_id: "U1".into(),
            thread_id: "t1".into(),
            channel: "D1".into(),
            text: text.into(),
            has_attachments: false,
            timestamp: "2026-08-01T00:00:00Z".into(),
            intent: None,
        }
    }

    struct TagPre(&'static str);

    #[async_trait]
    impl PreHook for TagPre {
        fn name(&self) -> &str {
            self.0
        }
        async fn handle(&self, event: &mut MessageEvent) -> Result<(), HookError> {
            event.text.push_str(self.0);
            Ok(())
        }
    }

    struct FailingPre;

    #[async_trait]
    impl PreHook for FailingPre {
        fn name(&self) -> &str {
            "failing"
        }
        async fn handle(&self, _event: &mut MessageEvent) -> Result<(), HookError> {
            Err(HookError("boom".into()))
        }
    }

    struct SuffixPost(&'static str);

    #[async_trait]
    impl PostHook for SuffixPost {
        fn name(&self) -> &str {
            self.0
        }
        async fn handle(
            &self,
            response: &str,
            _event: &MessageEvent,
        ) -> Result<Option<String>, HookError> {
            Ok(Some(format!("{response}{}", self.0)))
        }
    }

    struct NoopPost;

    #[async_trait]
    impl PostHook for NoopPost {
        fn name(&self) -> &str {
            "noop"
        }
        async fn handle(
            &self,
            _response: &str,
            _event: &MessageEvent,
        ) -> Result<Option<String>, HookError> {
            Ok(None)
        }
    }

    struct FailingPost;

    #[async_trait]
    impl PostHook for FailingPost {
        fn name(&self) -> &str {
            "failing"
        }
        async fn handle(
            &self,
            _response: &str,
            _event: &MessageEvent,
        ) -> Result<Option<String>, HookError> {
            Err(HookError("boom".into()))
        }
    }

    #[tokio::test]
    async fn pre_hooks_run_in_registration_order() {
        let mut hooks = HookSet::new();
        hooks.register_pre(Arc::new(TagPre("-a")));
        hooks.register_pre(Arc::new(TagPre("-b")));

        let mut ev = event("x");
        hooks.run_pre(&mut ev).await;
        assert_eq!(ev.text, "x-a-b");
    }

    #[tokio::test]
    async fn failing_pre_hook_does_not_stop_later_hooks() {
        let mut hooks = HookSet::new();
        hooks.register_pre(Arc::new(FailingPre));
        hooks.register_pre(Arc::new(TagPre("-after")));

        let mut ev = event("x");
        hooks.run_pre(&mut ev).await;
        assert_eq!(ev.text, "x-after");
    }

    #[tokio::test]
    async fn post_hooks_chain_and_noop_keeps_previous() {
        let mut hooks = HookSet::new();
        hooks.register_post(Arc::new(SuffixPost("!")));
        hooks.register_post(Arc::new(NoopPost));
        hooks.register_post(Arc::new(SuffixPost("?")));

        let out = hooks.run_post("hi".into(), &event("x")).await;
        assert_eq!(out, "hi!?");
    }

    #[tokio::test]
    async fn failing_post_hook_preserves_response() {
        let mut hooks = HookSet::new();
        hooks.register_post(Arc::new(SuffixPost("!")));
        hooks.register_post(Arc::new(FailingPost));

        let out = hooks.run_post("hi".into(), &event("x")).await;
        assert_eq!(out, "hi!");
    }

    #[test]
    fn context_flags_default_without_classification() {
        assert_eq!(event("x").context_flags(), (true, false, true));
    }
}

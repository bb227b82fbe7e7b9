//! End-to-end pipeline scenarios against a mock platform and scripted
//! providers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use cortex_agent::{
    Attachment, ChannelKind, ChatPlatform, ContextComposer, InboundMessage, MessagePipeline,
    Outcome, PlatformError, SkipReason,
};
use cortex_conversation::ConversationManager;
use cortex_facts::{FactCategory, FactsStore};
use cortex_hooks::{CitationHook, HookSet, IntentClassifierHook};
use cortex_provider::{
    GenerateRequest, GenerateResponse, LlmProvider, ModelManager, ModelPrefsStore, ProviderError,
    Role,
};
use cortex_tool::{Tool, ToolRegistry, ToolResult, ToolStateStore};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockPlatform {
    posts: Mutex<Vec<(String, String)>>,
    deleted: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    /// When set, posting a message containing this text fails.
    fail_posts_containing: Mutex<Option<String>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockPlatform {
    fn posts(&self) -> Vec<(String, String)> {
        self.posts.lock().unwrap().clone()
    }

    fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn fail_posts_containing(&self, pattern: &str) {
        *self.fail_posts_containing.lock().unwrap() = Some(pattern.to_string());
    }
}

#[async_trait]
impl ChatPlatform for MockPlatform {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        _thread: Option<&str>,
    ) -> Result<String, PlatformError> {
        if let Some(pattern) = self.fail_posts_containing.lock().unwrap().as_deref() {
            if text.contains(pattern) {
                return Err(PlatformError::Api("simulated post failure".into()));
            }
        }
        let id = format!("msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.posts
            .lock()
            .unwrap()
            .push((channel.to_string(), text.to_string()));
        Ok(id)
    }

    async fn delete_message(&self, _channel: &str, message_id: &str) -> Result<(), PlatformError> {
        self.deleted.lock().unwrap().push(message_id.to_string());
        Ok(())
    }

    async fn download_file(&self, url: &str, _bearer: &str) -> Result<Vec<u8>, PlatformError> {
        self.files
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| PlatformError::Download(format!("no such file: {url}")))
    }
}

struct ScriptedProvider {
    responses: Mutex<Vec<String>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedProvider {
    fn new(mut responses: Vec<&str>) -> Arc<Self> {
        responses.reverse();
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }
    fn name(&self) -> &str {
        "scripted"
    }
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        self.requests.lock().unwrap().push(req.clone());
        let content = self
            .responses
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| "I'm here.".to_string());
        Ok(GenerateResponse {
            content,
            model: req.model.clone(),
            tokens_in: 10,
            tokens_out: 5,
            stop_reason: "stop".into(),
            tool_calls: Vec::new(),
        })
    }
    async fn health_check(&self) -> bool {
        true
    }
    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec!["model-x".into()])
    }
}

struct FailingProvider;

#[async_trait]
impl LlmProvider for FailingProvider {
    fn id(&self) -> &str {
        "scripted"
    }
    fn name(&self) -> &str {
        "failing"
    }
    async fn generate(&self, _req: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        Err(ProviderError::Unavailable("backend offline".into()))
    }
    async fn health_check(&self) -> bool {
        false
    }
    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec![])
    }
}

/// Fake web-search tool that records sources into the request tracker.
struct FakeWebSearch {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for FakeWebSearch {
    fn name(&self) -> &str {
        "web_search"
    }
    fn description(&self) -> &str {
        "Search the web"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"]
        })
    }
    async fn execute(&self, args: serde_json::Value, _user_id: &str) -> ToolResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(tracker) = cortex_hooks::current_tracker() {
            tracker.record(
                "web_search",
                true,
                vec!["example.com".into()],
                vec!["a snippet".into()],
            );
        }
        ToolResult::success(
            "web_search",
            format!("results for {}", args["query"].as_str().unwrap_or("?")),
        )
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    platform: Arc<MockPlatform>,
    pipeline: MessagePipeline,
    conversations: Arc<ConversationManager>,
    registry: Arc<ToolRegistry>,
    _dir: tempfile::TempDir,
}

fn harness(provider: Arc<dyn LlmProvider>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let dir_str = dir.path().to_str().unwrap().to_string();

    let platform = Arc::new(MockPlatform::default());
    let conversations = Arc::new(ConversationManager::new(&dir_str));
    let registry = Arc::new(ToolRegistry::new(ToolStateStore::new(Some(&dir_str))));

    let prefs = ModelPrefsStore::new(Some(&dir_str));
    let mut models = ModelManager::new("scripted", "model-x", prefs);
    models.register(provider);

    let mut hooks = HookSet::new();
    hooks.register_pre(Arc::new(IntentClassifierHook));
    hooks.register_post(Arc::new(CitationHook));

    let composer = ContextComposer::new(
        conversations.clone(),
        None,
        None,
        Some(dir_str),
        6000,
        3,
    );

    let pipeline = MessagePipeline::new(
        platform.clone(),
        composer,
        conversations.clone(),
        registry.clone(),
        Arc::new(models),
        Arc::new(hooks),
    );

    Harness {
        platform,
        pipeline,
        conversations,
        registry,
        _dir: dir,
    }
}

fn dm(event_id: &str, user: &str, text: &str) -> InboundMessage {
    InboundMessage {
        event_id: event_id.to_string(),
        user_id: user.into(),
        channel: format!("D-{user}"),
        channel_kind: ChannelKind::Dm,
        thread_id: None,
        text: text.to_string(),
        from_bot: false,
        timestamp: chrono::Utc::now().to_rfc3339(),
        attachments: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn greeting_gets_reply_without_tools_or_search() {
    let provider = ScriptedProvider::new(vec!["Hello! How can I help today?"]);
    let h = harness(provider.clone());

    let outcome = h.pipeline.process(dm("e1", "U1", "Hello")).await;
    let Outcome::Replied(reply) = outcome else {
        panic!("expected a reply");
    };
    assert!(!reply.is_empty());
    assert!(!reply.contains("---")); // no citations without sources

    // Exactly one generation, no tool-call markers anywhere.
    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    // Greeting intent strips retrieval; the prompt has no search context.
    let all_content: String = requests[0]
        .messages
        .iter()
        .map(|m| m.content.clone())
        .collect();
    assert!(!all_content.contains("Relevant notes"));
    assert!(!all_content.contains("Web search results"));
}

#[tokio::test]
async fn stored_fact_reaches_the_prompt_and_reply() {
    let provider =
        ScriptedProvider::new(vec!["You drink an oat milk flat white — stored preference."]);
    let h = harness(provider.clone());

    FactsStore::new("U1", Some(h._dir.path().to_str().unwrap()))
        .store("coffee", "oat milk flat white", FactCategory::Preferences)
        .unwrap();

    let outcome = h
        .pipeline
        .process(dm("e1", "U1", "what do you know about my coffee?"))
        .await;
    let Outcome::Replied(reply) = outcome else {
        panic!("expected a reply");
    };
    assert!(reply.contains("oat milk flat white"));

    // The fact was injected into the system identity block.
    let requests = provider.requests();
    let system = &requests[0].messages[0];
    assert_eq!(system.role, Role::System);
    assert!(system.content.contains("- [preferences] coffee: oat milk flat white"));
}

#[tokio::test]
async fn shim_tool_call_is_executed_and_cited() {
    let provider = ScriptedProvider::new(vec![
        r#"<tool_call>{"tool":"web_search","arguments":{"query":"cat"}}</tool_call>"#,
        "Cats remain popular.",
    ]);
    let h = harness(provider.clone());

    let calls = Arc::new(AtomicUsize::new(0));
    h.registry.register(Arc::new(FakeWebSearch { calls: calls.clone() }));

    let outcome = h
        .pipeline
        .process(dm("e1", "U1", "anything interesting about cats lately?"))
        .await;
    let Outcome::Replied(reply) = outcome else {
        panic!("expected a reply");
    };

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!reply.contains("<tool_call>"));
    assert!(reply.contains("Cats remain popular."));
    // Tracker recorded the web source; the citation hook appended it.
    assert!(reply.contains("🌐 Web: example.com"));
}

#[tokio::test]
async fn duplicate_event_is_processed_once() {
    let provider = ScriptedProvider::new(vec!["first", "second"]);
    let h = harness(provider.clone());

    let first = h.pipeline.process(dm("same-event", "U1", "Hello")).await;
    let second = h.pipeline.process(dm("same-event", "U1", "Hello")).await;

    assert!(matches!(first, Outcome::Replied(_)));
    assert_eq!(second, Outcome::Skipped(SkipReason::Duplicate));
    assert_eq!(provider.requests().len(), 1);
}

#[tokio::test]
async fn non_dm_bot_and_empty_messages_are_skipped() {
    let provider = ScriptedProvider::new(vec![]);
    let h = harness(provider);

    let mut channel_msg = dm("e1", "U1", "Hello");
    channel_msg.channel_kind = ChannelKind::Channel;
    assert_eq!(
        h.pipeline.process(channel_msg).await,
        Outcome::Skipped(SkipReason::NotDirectMessage)
    );

    let mut bot_msg = dm("e2", "U1", "Hello");
    bot_msg.from_bot = true;
    assert_eq!(
        h.pipeline.process(bot_msg).await,
        Outcome::Skipped(SkipReason::FromBot)
    );

    let empty = dm("e3", "U1", "   ");
    assert_eq!(h.pipeline.process(empty).await, Outcome::Skipped(SkipReason::Empty));
}

#[tokio::test]
async fn working_indicator_deleted_on_success_and_failure() {
    // Success path.
    let h = harness(ScriptedProvider::new(vec!["ok"]));
    h.pipeline.process(dm("e1", "U1", "Hello")).await;
    assert_eq!(h.platform.deleted(), vec!["msg-0"]);

    // Failure path: generation errors, indicator still deleted and a
    // friendly message posted.
    let h = harness(Arc::new(FailingProvider));
    let outcome = h.pipeline.process(dm("e1", "U1", "Hello")).await;
    assert!(matches!(outcome, Outcome::ErrorReplied(_)));
    assert_eq!(h.platform.deleted(), vec!["msg-0"]);

    let posts = h.platform.posts();
    assert!(posts.iter().any(|(_, text)| text.contains("temporarily unavailable")));
}

#[tokio::test]
async fn turns_are_persisted_with_metadata() {
    let h = harness(ScriptedProvider::new(vec!["answer one"]));
    h.pipeline.process(dm("e1", "U1", "Hello")).await;

    let history = h.conversations.load("U1", "D-U1").await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "Hello");
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, "answer one");

    let meta = history[1].metadata.as_ref().unwrap();
    assert_eq!(meta["model"], "model-x");
    assert_eq!(meta["provider"], "scripted");
    assert_eq!(meta["tokens_out"], 5);
    assert!(meta["latency_ms"].is_u64());
}

#[tokio::test]
async fn corrupt_conversation_file_recovers() {
    let h = harness(ScriptedProvider::new(vec!["fresh reply"]));

    // Seed a turn, then corrupt the file on disk.
    h.conversations
        .save("U1", "D-U1", Role::User, "old turn", None)
        .await
        .unwrap();
    let path = h
        ._dir
        .path()
        .join("users/U1/conversations/D-U1.json");
    std::fs::write(&path, "{definitely not json").unwrap();

    let outcome = h.pipeline.process(dm("e1", "U1", "Hello again friend")).await;
    assert!(matches!(outcome, Outcome::Replied(_)));

    let history = h.conversations.load("U1", "D-U1").await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "Hello again friend");
}

#[tokio::test]
async fn posting_failure_still_persists_turns() {
    let h = harness(ScriptedProvider::new(vec!["the lost reply"]));
    h.platform.fail_posts_containing("the lost reply");

    let outcome = h.pipeline.process(dm("e1", "U1", "Hello")).await;
    assert!(matches!(outcome, Outcome::ErrorReplied(_)));

    // Both turns made it to disk despite the delivery failure.
    let history = h.conversations.load("U1", "D-U1").await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "the lost reply");

    // And a friendly note was posted.
    let posts = h.platform.posts();
    assert!(posts.iter().any(|(_, text)| text.contains("couldn't deliver")));
}

#[tokio::test]
async fn attachment_text_flows_into_the_prompt() {
    let provider = ScriptedProvider::new(vec!["summarized"]);
    let h = harness(provider.clone());

    h.platform
        .files
        .lock()
        .unwrap()
        .insert("https://files/notes.txt".into(), b"meeting notes body".to_vec());

    let mut msg = dm("e1", "U1", "summarize the attached file please");
    msg.attachments.push(Attachment {
        filename: "notes.txt".into(),
        content_type: "text/plain".into(),
        url: "https://files/notes.txt".into(),
        bearer: "xoxb-test".into(),
    });

    let outcome = h.pipeline.process(msg).await;
    assert!(matches!(outcome, Outcome::Replied(_)));

    let requests = provider.requests();
    let user_turn = requests[0].messages.last().unwrap();
    assert!(user_turn.content.contains("meeting notes body"));
    assert!(user_turn.content.contains("summarize the attached file please"));
}

#[tokio::test]
async fn saveable_exchange_offers_note_saving() {
    let h = harness(ScriptedProvider::new(vec!["nice approach"]));
    h.pipeline
        .process(dm("e1", "U1", "I use spaced repetition to study languages"))
        .await;

    let posts = h.platform.posts();
    assert!(posts.iter().any(|(_, text)| text.contains("save this")));
}

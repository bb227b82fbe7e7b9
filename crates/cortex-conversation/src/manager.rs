use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use cortex_provider::{GenerateRequest, LlmProvider, Message, Role};

use crate::error::ConversationError;
use crate::types::{ConversationRecord, StoredMessage, ThreadMeta};

/// Rough token estimate: `len / 4`. The same constant backs every
/// token-budget decision in the service, so estimates stay comparable
/// across the composer, the summarizer, and the stores.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Manages conversation history with automatic summarization.
///
/// Writers are serialized per `(user, thread)` key; reads are lock-free.
/// Corrupt records are read as empty, logged, and overwritten by the next
/// save — stored history is never a reason to refuse an operation.
pub struct ConversationManager {
    users_folder: PathBuf,
    summarizer: Option<Arc<dyn LlmProvider>>,
    summary_model: String,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ConversationManager {
    pub fn new(brain_folder: &str) -> Self {
        Self {
            users_folder: PathBuf::from(brain_folder).join("users"),
            summarizer: None,
            summary_model: String::new(),
            locks: DashMap::new(),
        }
    }

    /// Attach the LLM used for summarization. Without one, overflowing
    /// conversations are truncated instead of summarized.
    pub fn with_summarizer(mut self, provider: Arc<dyn LlmProvider>, model: &str) -> Self {
        self.summarizer = Some(provider);
        self.summary_model = model.to_string();
        self
    }

    fn conversation_path(&self, user_id: &str, thread_id: &str) -> PathBuf {
        let safe_thread = thread_id.replace(['/', '\\'], "_");
        self.users_folder
            .join(user_id)
            .join("conversations")
            .join(format!("{safe_thread}.json"))
    }

    fn write_lock(&self, user_id: &str, thread_id: &str) -> Arc<Mutex<()>> {
        let key = format!("{user_id}/{thread_id}");
        self.locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Load a conversation's messages, oldest first.
    ///
    /// Sorting by timestamp on load is the backstop for out-of-order
    /// persistence; in the common case the file is already ordered.
    pub async fn load(&self, user_id: &str, thread_id: &str) -> Vec<StoredMessage> {
        let path = self.conversation_path(user_id, thread_id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str::<ConversationRecord>(&raw) {
            Ok(record) => {
                let mut messages = record.messages;
                messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
                messages
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt conversation file, treating as empty");
                Vec::new()
            }
        }
    }

    /// Append one turn and persist atomically.
    pub async fn save(
        &self,
        user_id: &str,
        thread_id: &str,
        role: Role,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), ConversationError> {
        let lock = self.write_lock(user_id, thread_id);
        let _guard = lock.lock().await;

        let path = self.conversation_path(user_id, thread_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let now = chrono::Utc::now().to_rfc3339();
        let mut record = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "corrupt conversation file, starting fresh");
                fresh_record(user_id, thread_id, &now)
            }),
            Err(_) => fresh_record(user_id, thread_id, &now),
        };

        let mut message = StoredMessage::new(role, content);
        if let Some(metadata) = metadata {
            message = message.with_metadata(metadata);
        }
        record.messages.push(message);
        record.updated_at = now;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(&record)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(user = user_id, thread = thread_id, turns = record.messages.len(), "turn persisted");
        Ok(())
    }

    /// Total estimated tokens across a message list.
    pub fn count_tokens(&self, messages: &[StoredMessage]) -> usize {
        messages.iter().map(|m| estimate_tokens(&m.content)).sum()
    }

    /// Compress a conversation that exceeds `max_tokens`.
    ///
    /// The last `keep_recent` messages are always kept verbatim. Older
    /// messages are condensed into one system summary via the attached
    /// LLM; when summarization fails (or no summarizer is attached) the
    /// recent tail alone is returned — this never errors the caller.
    pub async fn summarize_if_needed(
        &self,
        messages: Vec<StoredMessage>,
        max_tokens: usize,
        keep_recent: usize,
    ) -> Vec<StoredMessage> {
        if self.count_tokens(&messages) <= max_tokens {
            return messages;
        }

        if messages.len() <= keep_recent {
            // Too few messages to split: drop from the head until the rest
            // fits the budget.
            let mut kept: Vec<StoredMessage> = Vec::new();
            let mut total = 0;
            for msg in messages.into_iter().rev() {
                let tokens = estimate_tokens(&msg.content);
                if total + tokens > max_tokens {
                    break;
                }
                total += tokens;
                kept.push(msg);
            }
            kept.reverse();
            return kept;
        }

        let split = messages.len() - keep_recent;
        let old = &messages[..split];
        let recent = messages[split..].to_vec();

        let Some(summarizer) = self.summarizer.as_deref() else {
            warn!("truncating conversation: no summarizer attached");
            return recent;
        };

        match self.summarize(summarizer, old).await {
            Ok(summary) => {
                let summary_message =
                    StoredMessage::new(Role::System, format!("[Previous conversation summary]: {summary}"))
                        .with_metadata(serde_json::json!({
                            "type": "summary",
                            "summarized_messages": old.len(),
                        }));
                let mut out = vec![summary_message];
                out.extend(recent);
                out
            }
            Err(e) => {
                warn!(error = %e, "summarization failed, keeping recent messages only");
                recent
            }
        }
    }

    async fn summarize(
        &self,
        summarizer: &dyn LlmProvider,
        old: &[StoredMessage],
    ) -> Result<String, cortex_provider::ProviderError> {
        let transcript: String = old
            .iter()
            .map(|m| format!("{}: {}", m.role.to_string().to_uppercase(), m.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = format!(
            "Summarize this conversation history concisely, preserving key facts, \
             decisions, and context. Keep it under 500 words.\n\n\
             Conversation:\n{transcript}\n\nConcise summary:"
        );

        let req = GenerateRequest {
            model: self.summary_model.clone(),
            messages: vec![Message::user(prompt)],
            max_tokens: 1000,
            temperature: 0.3,
            ..Default::default()
        };
        let resp = summarizer.generate(&req).await?;
        Ok(resp.content.trim().to_string())
    }

    /// List a user's conversations, most recently updated first.
    pub async fn list(&self, user_id: &str) -> Vec<ThreadMeta> {
        let dir = self.users_folder.join(user_id).join("conversations");
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut conversations = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(raw) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            match serde_json::from_str::<ConversationRecord>(&raw) {
                Ok(record) => conversations.push(ThreadMeta {
                    thread_id: record.thread_id,
                    created_at: record.created_at,
                    updated_at: record.updated_at,
                    message_count: record.messages.len(),
                }),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable conversation");
                }
            }
        }

        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        conversations
    }

    /// Delete a conversation. Returns true if it existed.
    pub async fn delete(&self, user_id: &str, thread_id: &str) -> bool {
        let lock = self.write_lock(user_id, thread_id);
        let _guard = lock.lock().await;
        let path = self.conversation_path(user_id, thread_id);
        tokio::fs::remove_file(&path).await.is_ok()
    }

    /// Keyword search over stored history. Returns `(user turn,
    /// assistant turn)` pairs whose user text contains every query word,
    /// newest first, capped at `limit`.
    pub async fn search_past(
        &self,
        query: &str,
        user_id: Option<&str>,
        limit: usize,
    ) -> Vec<(StoredMessage, StoredMessage)> {
        let words: Vec<String> = query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .filter(|w| w.len() > 2)
            .collect();
        if words.is_empty() {
            return Vec::new();
        }

        let users = match user_id {
            Some(u) => vec![u.to_string()],
            None => self.user_dirs().await,
        };

        let mut hits: Vec<(String, StoredMessage, StoredMessage)> = Vec::new();
        for user in users {
            for meta in self.list(&user).await {
                let messages = self.load(&user, &meta.thread_id).await;
                for pair in messages.windows(2) {
                    let [q, a] = pair else { continue };
                    if q.role != Role::User || a.role != Role::Assistant {
                        continue;
                    }
                    let text = q.content.to_lowercase();
                    if words.iter().all(|w| text.contains(w)) {
                        hits.push((q.timestamp.clone(), q.clone(), a.clone()));
                    }
                }
            }
        }

        hits.sort_by(|a, b| b.0.cmp(&a.0));
        hits.into_iter().take(limit).map(|(_, q, a)| (q, a)).collect()
    }

    async fn user_dirs(&self) -> Vec<String> {
        let mut users = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.users_folder).await else {
            return users;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                users.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        users
    }
}

fn fresh_record(user_id: &str, thread_id: &str, now: &str) -> ConversationRecord {
    ConversationRecord {
        thread_id: thread_id.to_string(),
        user_id: user_id.to_string(),
        created_at: now.to_string(),
        updated_at: now.to_string(),
        messages: Vec::new(),
    }
}

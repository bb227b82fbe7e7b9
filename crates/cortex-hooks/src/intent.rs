//! Rule-based intent classification.
//!
//! Lightweight keyword heuristics (no LLM call) decide which context
//! sources a message needs. This keeps noise out of the prompt for
//! small-context models: a greeting gets no retrieval at all, a research
//! question gets web search but skips the brain index.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{HookError, MessageEvent, PreHook};

/// User intent categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Greeting,
    Personal,
    Knowledge,
    Research,
    Task,
    General,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Greeting => "greeting",
            Self::Personal => "personal",
            Self::Knowledge => "knowledge",
            Self::Research => "research",
            Self::Task => "task",
            Self::General => "general",
        };
        write!(f, "{s}")
    }
}

/// Classification outcome plus the context flags it implies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentClassification {
    pub intent: Intent,
    pub confidence: f64,
    pub enable_brain: bool,
    pub enable_web: bool,
    pub enable_facts: bool,
}

const GREETING_WORDS: &[&str] = &[
    "hi", "hello", "hey", "thanks", "bye", "goodbye", "morning", "evening", "howdy",
];

const PERSONAL_PRONOUNS: &[&str] = &["my", "me", "i", "im", "ive", "mine", "myself"];

const PERSONAL_KEYWORDS: &[&str] = &[
    "preference", "prefer", "favorite", "favourite", "health", "medication", "family", "wife",
    "husband", "spouse", "partner", "kid", "kids", "son", "daughter", "goal", "goals", "remind",
    "remember", "know", "stored", "facts", "allergy", "allergic", "diet",
];

const RESEARCH_KEYWORDS: &[&str] = &[
    "search", "find", "lookup", "current", "latest", "news", "today", "recent",
];

const QUESTION_WORDS: &[&str] = &["what", "how", "why", "when", "where", "who", "which", "whats"];

const KNOWLEDGE_KEYWORDS: &[&str] = &[
    "note", "notes", "document", "project", "plan", "idea", "wrote", "written", "saved", "brain",
    "explain", "describe",
];

const TASK_VERBS: &[&str] = &[
    "create", "make", "generate", "write", "draft", "build", "update", "change", "modify",
    "delete", "remove", "add",
];

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}

fn any_token(tokens: &[String], set: &[&str]) -> bool {
    tokens.iter().any(|t| set.contains(&t.as_str()))
}

fn has_year_marker(tokens: &[String]) -> bool {
    tokens.iter().any(|t| {
        t.len() == 4
            && (t.starts_with("19") || t.starts_with("20"))
            && t.chars().all(|c| c.is_ascii_digit())
    })
}

/// Classify a message. Priority: greeting, research, personal, knowledge,
/// task, general — the first matching rule wins.
pub fn classify_intent(text: &str) -> IntentClassification {
    let text_lower = text.to_lowercase();
    let tokens = tokenize(&text_lower);

    // Short messages that are just greetings need no context at all.
    if tokens.len() <= 3 && any_token(&tokens, GREETING_WORDS) {
        return IntentClassification {
            intent: Intent::Greeting,
            confidence: 0.9,
            enable_brain: false,
            enable_web: false,
            enable_facts: false,
        };
    }

    // Time-sensitive lookups go to the web and skip the brain index.
    if any_token(&tokens, RESEARCH_KEYWORDS)
        || text_lower.contains("look up")
        || has_year_marker(&tokens)
    {
        return IntentClassification {
            intent: Intent::Research,
            confidence: 0.8,
            enable_brain: false,
            enable_web: true,
            enable_facts: false,
        };
    }

    // Personal pronoun + personal keyword: the facts store is the source.
    if any_token(&tokens, PERSONAL_PRONOUNS) && any_token(&tokens, PERSONAL_KEYWORDS) {
        return IntentClassification {
            intent: Intent::Personal,
            confidence: 0.85,
            enable_brain: false,
            enable_web: false,
            enable_facts: true,
        };
    }

    // Question words or knowledge-base vocabulary: consult the brain.
    if any_token(&tokens, QUESTION_WORDS)
        || any_token(&tokens, KNOWLEDGE_KEYWORDS)
        || text_lower.contains("knowledge base")
        || text_lower.contains("tell me about")
    {
        return IntentClassification {
            intent: Intent::Knowledge,
            confidence: 0.75,
            enable_brain: true,
            enable_web: false,
            enable_facts: false,
        };
    }

    // Imperative task requests don't need retrieval.
    if any_token(&tokens, TASK_VERBS) {
        return IntentClassification {
            intent: Intent::Task,
            confidence: 0.7,
            enable_brain: false,
            enable_web: false,
            enable_facts: false,
        };
    }

    IntentClassification {
        intent: Intent::General,
        confidence: 0.5,
        enable_brain: true,
        enable_web: false,
        enable_facts: true,
    }
}

/// Pre-hook that classifies intent and stores it on the event.
pub struct IntentClassifierHook;

#[async_trait]
impl PreHook for IntentClassifierHook {
    fn name(&self) -> &str {
        "intent_classifier"
    }

    async fn handle(&self, event: &mut MessageEvent) -> Result<(), HookError> {
        if event.text.is_empty() {
            return Ok(());
        }
        let classification = classify_intent(&event.text);
        info!(
            intent = %classification.intent,
            confidence = classification.confidence,
            brain = classification.enable_brain,
            web = classification.enable_web,
            facts = classification.enable_facts,
            "intent classified"
        );
        event.intent = Some(classification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_disables_everything() {
        for text in ["Hello", "hi there", "thanks!"] {
            let c = classify_intent(text);
            assert_eq!(c.intent, Intent::Greeting, "{text}");
            assert!(!c.enable_brain && !c.enable_web && !c.enable_facts);
        }
    }

    #[test]
    fn long_message_with_greeting_word_is_not_greeting() {
        let c = classify_intent("hello, can you tell me about my saved notes please");
        assert_ne!(c.intent, Intent::Greeting);
    }

    #[test]
    fn research_enables_web_and_disables_brain() {
        for text in [
            "what's the latest news about AI today?",
            "search for rust conferences",
            "look up the weather",
            "best laptops 2026",
        ] {
            let c = classify_intent(text);
            assert_eq!(c.intent, Intent::Research, "{text}");
            assert!(c.enable_web);
            assert!(!c.enable_brain);
        }
    }

    #[test]
    fn personal_questions_enable_facts_only() {
        for text in [
            "what do you know about my coffee?",
            "remember that my wife is vegetarian",
            "what are my goals",
        ] {
            let c = classify_intent(text);
            assert_eq!(c.intent, Intent::Personal, "{text}");
            assert!(c.enable_facts);
            assert!(!c.enable_brain && !c.enable_web);
        }
    }

    #[test]
    fn knowledge_questions_enable_brain() {
        let c = classify_intent("how does the garden irrigation plan work?");
        assert_eq!(c.intent, Intent::Knowledge);
        assert!(c.enable_brain);
        assert!(!c.enable_web);
    }

    #[test]
    fn task_requests_disable_all_search() {
        let c = classify_intent("draft an email to the landlord");
        assert_eq!(c.intent, Intent::Task);
        assert!(!c.enable_brain && !c.enable_web && !c.enable_facts);
    }

    #[test]
    fn general_fallback_enables_brain_and_facts() {
        let c = classify_intent("the garden looked beautiful yesterday evening honestly");
        assert_eq!(c.intent, Intent::General);
        assert_eq!(c.confidence, 0.5);
        assert!(c.enable_brain && c.enable_facts);
        assert!(!c.enable_web);
    }

    #[tokio::test]
    async fn hook_sets_classification_on_event() {
        let mut event = MessageEvent {
            user_id: "U1".into(),
            thread_id: "t".into(),
            channel: "D".into(),
            text: "Hello".into(),
            has_attachments: false,
            timestamp: String::new(),
            intent: None,
        };
        IntentClassifierHook.handle(&mut event).await.unwrap();
        assert_eq!(event.intent.as_ref().unwrap().intent, Intent::Greeting);
    }
}

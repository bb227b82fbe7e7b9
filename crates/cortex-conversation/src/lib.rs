//! Persistent per-(user, thread) conversation history.
//!
//! Conversations are append-mostly JSON records under
//! `{brain_folder}/users/{user}/conversations/{thread}.json`, written
//! atomically. Long conversations are compressed by an LLM summary that
//! replaces the old turns with one system message; the recent tail is
//! always kept verbatim.

pub mod error;
pub mod manager;
pub mod types;

pub use error::ConversationError;
pub use manager::{estimate_tokens, ConversationManager};
pub use types::{ConversationRecord, StoredMessage, ThreadMeta};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cortex_core::types::{ThreadId, UserId};

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform API error: {0}")]
    Api(String),

    #[error("download failed: {0}")]
    Download(String),
}

/// What kind of channel a message arrived on. Only direct messages reach
/// the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Dm,
    Channel,
    Group,
}

/// A file attached to an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub url: String,
    /// Bearer token for the platform's file-download endpoint; filled in
    /// by the platform adapter when it decodes the event.
    pub bearer: String,
}

/// A decoded inbound chat message, platform framing already stripped.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Platform-assigned event id, used for idempotence.
    pub event_id: String,
    pub user_id: UserId,
    pub channel: String,
    pub channel_kind: ChannelKind,
    /// Thread within the channel; a bare DM threads on the channel id.
    pub thread_id: Option<ThreadId>,
    pub text: String,
    pub from_bot: bool,
    /// RFC 3339 receive time.
    pub timestamp: String,
    pub attachments: Vec<Attachment>,
}

impl InboundMessage {
    /// The thread this message belongs to, falling back to the channel.
    pub fn thread(&self) -> ThreadId {
        self.thread_id
            .clone()
            .unwrap_or_else(|| ThreadId::from(self.channel.as_str()))
    }
}

/// The chat platform as the core consumes it. Socket transport, event
/// decoding, and block rendering live behind this trait in the adapter.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Post a message; returns the platform message id.
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread: Option<&str>,
    ) -> Result<String, PlatformError>;

    async fn delete_message(&self, channel: &str, message_id: &str) -> Result<(), PlatformError>;

    async fn download_file(&self, url: &str, bearer: &str) -> Result<Vec<u8>, PlatformError>;
}

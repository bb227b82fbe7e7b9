//! Console adapter: a local stand-in for the chat platform.
//!
//! Drives the full pipeline from stdin for development and diagnostics —
//! each line becomes a direct message from a local user, and replies print
//! to stdout. The production platform adapter implements the same
//! `ChatPlatform` / `EventSource` pair over the real event stream.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use cortex_agent::{
    Attachment, ChannelKind, ChatPlatform, EventSource, InboundMessage, IncomingEvent,
    PlatformError,
};

pub const CONSOLE_USER: &str = "local";
pub const CONSOLE_CHANNEL: &str = "console";

pub struct ConsolePlatform {
    next_id: AtomicUsize,
}

impl ConsolePlatform {
    pub fn new() -> Self {
        Self { next_id: AtomicUsize::new(0) }
    }
}

impl Default for ConsolePlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatPlatform for ConsolePlatform {
    async fn post_message(
        &self,
        _channel: &str,
        text: &str,
        _thread: Option<&str>,
    ) -> Result<String, PlatformError> {
        println!("{text}\n");
        Ok(format!("console-{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn delete_message(&self, _channel: &str, _message_id: &str) -> Result<(), PlatformError> {
        // Printed lines can't be unprinted; the indicator just scrolls by.
        Ok(())
    }

    async fn download_file(&self, url: &str, _bearer: &str) -> Result<Vec<u8>, PlatformError> {
        // Console "uploads" are local paths.
        tokio::fs::read(url)
            .await
            .map_err(|e| PlatformError::Download(e.to_string()))
    }
}

/// Reads stdin lines as direct messages from the local user. EOF ends the
/// stream (and with it, the service loop, cleanly).
pub struct StdinEventSource {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinEventSource {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinEventSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSource for StdinEventSource {
    async fn next_event(&mut self) -> Option<IncomingEvent> {
        loop {
            let line = self.lines.next_line().await.ok()??;
            let text = line.trim().to_string();
            if text.is_empty() {
                continue;
            }
            return Some(IncomingEvent::Message(InboundMessage {
                event_id: uuid::Uuid::new_v4().to_string(),
                user_id: CONSOLE_USER.into(),
                channel: CONSOLE_CHANNEL.to_string(),
                channel_kind: ChannelKind::Dm,
                thread_id: None,
                text,
                from_bot: false,
                timestamp: chrono::Utc::now().to_rfc3339(),
                attachments: Vec::<Attachment>::new(),
            }));
        }
    }
}

//! Inbound event routing: the thin adapter between a platform's event
//! stream and the message pipeline.
//!
//! Direct-message events fan out to per-message pipeline tasks; slash
//! commands and interactive actions belong to management UI surfaces and
//! are acknowledged here only with a log line. Ordering within one
//! conversation is guaranteed by the conversation store's per-key write
//! locks and timestamp-ordered loads, so concurrent tasks stay safe.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::pipeline::MessagePipeline;
use crate::platform::InboundMessage;

/// An event from the platform's stream, already decoded from wire framing.
#[derive(Debug, Clone)]
pub enum IncomingEvent {
    Message(InboundMessage),
    SlashCommand {
        user_id: String,
        channel: String,
        command: String,
        text: String,
    },
    Interactive {
        user_id: String,
        action_id: String,
        payload: serde_json::Value,
    },
}

/// Source of decoded platform events. The socket transport and event
/// decoding live behind this trait in the platform adapter.
#[async_trait]
pub trait EventSource: Send {
    /// Next event, or `None` when the stream has ended.
    async fn next_event(&mut self) -> Option<IncomingEvent>;
}

/// Drain the event source into the pipeline until the stream ends or
/// shutdown is requested. Each message runs as its own task so slow
/// generations never block the stream.
pub async fn run_event_loop<S: EventSource>(
    mut source: S,
    pipeline: Arc<MessagePipeline>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("event loop shutting down");
                return;
            }
            event = source.next_event() => event,
        };

        let Some(event) = event else {
            info!("event stream ended");
            return;
        };

        match event {
            IncomingEvent::Message(msg) => {
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    pipeline.process(msg).await;
                });
            }
            IncomingEvent::SlashCommand { command, user_id, .. } => {
                debug!(command, user = %user_id, "slash command routed to management surface");
            }
            IncomingEvent::Interactive { action_id, user_id, .. } => {
                debug!(action_id, user = %user_id, "interactive action routed to management surface");
            }
        }
    }
}

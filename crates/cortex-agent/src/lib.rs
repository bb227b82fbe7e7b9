//! The message-processing core: context composition, the per-message
//! pipeline, built-in tools, and the abstract chat-platform interface.
//!
//! One inbound direct message goes in; one grounded, cited reply comes
//! out. Everything the reply is composed from — conversation history,
//! facts, brain search, web search, tool output — flows through here.

pub mod attach;
pub mod compose;
pub mod notify;
pub mod pipeline;
pub mod platform;
pub mod router;
pub mod tools;

pub use compose::{ComposedContext, ContextComposer};
pub use notify::Notifier;
pub use pipeline::{MessagePipeline, Outcome, SkipReason};
pub use platform::{Attachment, ChannelKind, ChatPlatform, InboundMessage, PlatformError};
pub use router::{run_event_loop, EventSource, IncomingEvent};

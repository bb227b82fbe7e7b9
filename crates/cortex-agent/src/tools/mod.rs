//! Built-in tools: facts CRUD, brain search, web search, and the
//! facts-check skill.

pub mod brain_search;
pub mod facts;
pub mod facts_check;
pub mod web_search;

pub use brain_search::BrainSearchTool;
pub use facts::{message_references_personal_context, FactsTool};
pub use facts_check::FactsCheckSkill;
pub use web_search::WebSearchTool;

//! Search clients: the semantic "brain" index service and web search.
//!
//! Both are outbound HTTP collaborators; failures degrade to empty result
//! lists so a search outage never breaks a reply.

pub mod semantic;
pub mod web;

pub use semantic::{BrainSearchResult, SemanticSearchClient};
pub use web::{WebSearchClient, WebSearchProvider, WebSearchResult};

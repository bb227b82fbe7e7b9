//! FACTS — persistent per-user memory.
//!
//! Stores typed facts about a user (preferences, personal details, goals)
//! in one JSON file per user, injected into the system prompt when the
//! conversation references personal context.

pub mod error;
pub mod store;

pub use error::FactsError;
pub use store::{Fact, FactCategory, FactsStore, StoreOutcome};

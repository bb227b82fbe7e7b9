//! Shared types, configuration, and errors for the Cortex workspace.

pub mod config;
pub mod error;
pub mod types;

//! Keyscout Core Engine
//!
//! Core retrieval module.
//! Handles frame indexing, vector index access, temporal search and settings.

pub mod indexing;
pub mod search;
pub mod settings;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;

#[cfg(test)]
mod tests_scenarios;

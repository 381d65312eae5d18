//! # HSU Common
//!
//! Error types shared across the HSU logging crates.
//!
//! Every crate in the workspace returns [`Result`] so that callers see one
//! error vocabulary, whether the failure came from a channel, a pipe or a
//! sink.

pub mod errors;

// Re-export commonly used items
pub use errors::{Error, Result, ResultExt};

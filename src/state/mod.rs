//! State module for tracking download progress
//!
//! # Components
//!
//! - `UrlState`: lifecycle of a single URL (unknown, pending, completed, failed)
//! - `CompletionTracker`: concurrent map of every URL seen during the run

mod completion;
mod url_state;

// Re-export main types
pub use completion::{CompletionTracker, StateCounts};
pub use url_state::UrlState;

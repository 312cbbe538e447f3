//! Output module: durable URL journals and download statistics
//!
//! This module handles:
//! - Appending completed and failed URLs to flat journal files
//! - Counting attempts, successes, failures and bytes
//! - Formatting snapshots for logs and the final report

mod journal;
pub mod stats;

pub use journal::{Journal, JournalHandle, JournalKind};
pub use stats::{format_bytes, print_statistics, QueueDepth, Stats, StatsSnapshot};

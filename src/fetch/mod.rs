//! Download execution
//!
//! This module handles:
//! - Issuing one GET per attempt on a resource's pooled client
//! - Classifying failures as retryable or terminal
//! - Streaming bodies to disk under a sanitized filename

mod error;
mod executor;
mod filename;

pub use error::{classify_transport, FetchError};
pub use executor::DownloadExecutor;
pub use filename::{
    derive_filename, numbered_filename, parse_content_disposition, sanitize_filename,
    MAX_FILENAME_LEN,
};

//! Download failure taxonomy
//!
//! | Condition | Retryable |
//! |-----------|-----------|
//! | DNS resolution failure | no |
//! | HTTP 404 / 403 | no |
//! | Other non-200 status | yes |
//! | Timeout | yes |
//! | Connection refused / reset | yes |
//! | Other transport error | yes |
//! | Local write error | yes |

use std::error::Error as StdError;
use std::path::PathBuf;
use thiserror::Error;

/// Why a single download attempt failed
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("DNS resolution failed for {url}: {message}")]
    Dns { url: String, message: String },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Connection failed for {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Transport error for {url}: {source}")]
    Transport { url: String, source: reqwest::Error },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl FetchError {
    /// Returns true if another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Dns { .. } => false,
            Self::Status { status, .. } => !matches!(status, 403 | 404),
            Self::Timeout { .. }
            | Self::Connect { .. }
            | Self::Transport { .. }
            | Self::Io { .. } => true,
        }
    }

    /// HTTP status, when the failure was a status mismatch
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Maps a reqwest error onto the taxonomy
pub fn classify_transport(url: &str, err: reqwest::Error) -> FetchError {
    if is_dns_failure(&err) {
        return FetchError::Dns {
            url: url.to_string(),
            message: error_chain(&err),
        };
    }

    if err.is_timeout() {
        return FetchError::Timeout {
            url: url.to_string(),
        };
    }

    if err.is_connect() {
        return FetchError::Connect {
            url: url.to_string(),
            message: error_chain(&err),
        };
    }

    FetchError::Transport {
        url: url.to_string(),
        source: err,
    }
}

/// Resolver failures surface only as text somewhere in the source chain
fn is_dns_failure(err: &(dyn StdError + 'static)) -> bool {
    const MARKERS: &[&str] = &[
        "dns error",
        "failed to lookup address",
        "name or service not known",
        "no such host",
        "nodename nor servname",
        "temporary failure in name resolution",
    ];

    let mut current = Some(err);
    while let Some(e) = current {
        let text = e.to_string().to_ascii_lowercase();
        if MARKERS.iter().any(|m| text.contains(m)) {
            return true;
        }
        current = e.source();
    }
    false
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let top = err.to_string();
    let mut innermost = None;
    let mut current = err.source();
    while let Some(e) = current {
        innermost = Some(e);
        current = e.source();
    }

    // Root cause only, and only when the top message does not already hold it
    match innermost.map(|e| e.to_string()) {
        Some(root) if !root.is_empty() && !top.contains(&root) => format!("{}: {}", top, root),
        _ => top,
    }
}

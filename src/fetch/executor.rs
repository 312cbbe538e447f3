//! Single-attempt downloader
//!
//! One call to [`DownloadExecutor::fetch`] is one attempt: one GET, one
//! status check and one streamed write. The body lands in a `.part` file
//! private to the attempt and is linked under its final name only after the
//! last chunk is flushed, so a file under its final name is always complete.
//! A name already on disk is never overwritten; the attempt takes the next
//! free `name_N.ext` instead.

use super::error::{classify_transport, FetchError};
use super::filename::{derive_filename, numbered_filename};
use crate::output::Stats;
use reqwest::header::{ACCEPT, CONTENT_DISPOSITION};
use reqwest::{Client, Response, StatusCode};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

const WRITE_BUFFER: usize = 256 * 1024;

/// Numbered alternatives tried before giving up on a name
const MAX_NAME_CANDIDATES: u32 = 1000;

static PARTIAL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Downloads URLs into a directory and records every attempt in [`Stats`]
#[derive(Debug, Clone)]
pub struct DownloadExecutor {
    download_dir: PathBuf,
    request_timeout: Duration,
    stats: Arc<Stats>,
}

impl DownloadExecutor {
    pub fn new(download_dir: PathBuf, request_timeout: Duration, stats: Arc<Stats>) -> Self {
        Self {
            download_dir,
            request_timeout,
            stats,
        }
    }

    /// Performs one download attempt
    ///
    /// # Arguments
    ///
    /// * `url` - Normalized URL to fetch
    /// * `client` - Pooled client of the resource running the attempt
    ///
    /// # Returns
    ///
    /// * `Ok(bytes)` - HTTP 200 and the body was written in full
    /// * `Err(FetchError)` - Anything else; see [`FetchError::is_retryable`]
    pub async fn fetch(&self, url: &str, client: &Client) -> Result<u64, FetchError> {
        self.stats.record_attempt();

        let result = self.attempt(url, client).await;
        match &result {
            Ok(bytes) => self.stats.record_success(*bytes),
            Err(_) => self.stats.record_failure(),
        }
        result
    }

    async fn attempt(&self, url: &str, client: &Client) -> Result<u64, FetchError> {
        let response = client
            .get(url)
            .timeout(self.request_timeout)
            .header(ACCEPT, "*/*")
            .send()
            .await
            .map_err(|e| classify_transport(url, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // Named after the final URL so redirects to a real file keep its name
        let disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let filename = derive_filename(response.url(), disposition.as_deref());

        let partial = self.download_dir.join(format!(
            "{}.{}-{}.part",
            filename,
            std::process::id(),
            PARTIAL_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        let written = match stream_to_file(url, response, &partial).await {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        let target = claim_target(&self.download_dir, &filename, &partial).await;
        let _ = fs::remove_file(&partial).await;
        let target = target?;

        tracing::debug!("Downloaded {} -> {} ({} bytes)", url, target.display(), written);
        Ok(written)
    }
}

/// Links `partial` under the first free name derived from `filename`
///
/// A hard link fails if the name exists, so two attempts racing for the same
/// name each end up with their own file. Where hard links are unavailable
/// the name is reserved with `create_new` and the partial renamed over it.
async fn claim_target(dir: &Path, filename: &str, partial: &Path) -> Result<PathBuf, FetchError> {
    for n in 0..MAX_NAME_CANDIDATES {
        let target = dir.join(numbered_filename(filename, n));
        match fs::hard_link(partial, &target).await {
            Ok(()) => return Ok(target),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                tracing::trace!(path = %target.display(), "Hard link failed, reserving name: {}", e);
            }
        }

        match OpenOptions::new().write(true).create_new(true).open(&target).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(source) => return Err(FetchError::Io { path: target, source }),
        }
        if let Err(source) = fs::rename(partial, &target).await {
            let _ = fs::remove_file(&target).await;
            return Err(FetchError::Io { path: target, source });
        }
        return Ok(target);
    }

    Err(FetchError::Io {
        path: dir.join(filename),
        source: std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free name after {} candidates", MAX_NAME_CANDIDATES),
        ),
    })
}

async fn stream_to_file(url: &str, mut response: Response, path: &Path) -> Result<u64, FetchError> {
    let io_err = |source| FetchError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path).await.map_err(io_err)?;
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER, file);
    let mut written = 0u64;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| classify_transport(url, e))?
    {
        writer.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }

    writer.flush().await.map_err(io_err)?;
    Ok(written)
}

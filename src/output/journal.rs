//! Append-only URL journals
//!
//! Completed and failed URLs are written one per line to two flat files by
//! a dedicated writer task fed through a bounded channel. Recording never
//! blocks and never fails the caller. When the channel is full, lines go to
//! an unbounded spill list that the writer drains after each batch, so no
//! line recorded before [`Journal::close`] is lost and lines keep the order
//! they were recorded in. Write errors are logged by the writer.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Which journal a line belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalKind {
    Completed,
    Failed,
}

type Entry = (JournalKind, String);

#[derive(Debug, Default)]
struct SpillState {
    lines: VecDeque<Entry>,
    /// Set by the writer's final drain; nothing is accepted afterwards
    closed: bool,
}

/// Lines that did not fit in the channel
#[derive(Debug, Default)]
struct Spill {
    state: Mutex<SpillState>,
    notify: Notify,
}

impl Spill {
    fn lock(&self) -> MutexGuard<'_, SpillState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, close: bool) -> VecDeque<Entry> {
        let mut state = self.lock();
        state.closed |= close;
        std::mem::take(&mut state.lines)
    }
}

/// Cheap, cloneable sender side of the journal
#[derive(Debug, Clone)]
pub struct JournalHandle {
    tx: mpsc::Sender<Entry>,
    spill: Arc<Spill>,
}

impl JournalHandle {
    /// Queues a URL for appending; never waits
    pub fn record(&self, kind: JournalKind, url: &str) {
        let mut state = self.spill.lock();
        if state.closed {
            tracing::debug!(?kind, %url, "Journal closed, line dropped");
            return;
        }

        // Once lines are spilled, later ones follow them to keep the order
        if !state.lines.is_empty() {
            state.lines.push_back((kind, url.to_string()));
            self.spill.notify.notify_one();
            return;
        }

        match self.tx.try_send((kind, url.to_string())) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) | Err(TrySendError::Closed(entry)) => {
                tracing::debug!(kind = ?entry.0, url = %entry.1, "Journal channel unavailable, spilling line");
                state.lines.push_back(entry);
                self.spill.notify.notify_one();
            }
        }
    }
}

/// Owner of the journal writer task
pub struct Journal {
    handle: JournalHandle,
    stop: CancellationToken,
    writer: JoinHandle<()>,
}

impl Journal {
    /// Opens (creating if needed) both journal files in append mode and
    /// starts the writer task
    ///
    /// # Arguments
    ///
    /// * `completed` - Path of the completed-URL journal
    /// * `failed` - Path of the failed-URL journal
    /// * `capacity` - Lines buffered in the channel before recording spills
    pub async fn open(completed: &Path, failed: &Path, capacity: usize) -> std::io::Result<Self> {
        let completed_file = open_append(completed).await?;
        let failed_file = open_append(failed).await?;

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let spill = Arc::new(Spill::default());
        let stop = CancellationToken::new();

        let writer = tokio::spawn(run_writer(
            rx,
            Arc::clone(&spill),
            stop.clone(),
            JournalFile::new(completed, completed_file),
            JournalFile::new(failed, failed_file),
        ));

        Ok(Self {
            handle: JournalHandle { tx, spill },
            stop,
            writer,
        })
    }

    /// Returns a sender for recording lines
    pub fn handle(&self) -> JournalHandle {
        self.handle.clone()
    }

    /// Stops accepting lines, writes out what is buffered, and waits for
    /// the writer to finish
    ///
    /// Failures are logged and swallowed.
    pub async fn close(self) {
        self.stop.cancel();
        if let Err(e) = self.writer.await {
            tracing::warn!("Journal writer ended abnormally: {}", e);
        }
    }
}

async fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    OpenOptions::new().create(true).append(true).open(path).await
}

struct JournalFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JournalFile {
    fn new(path: &Path, file: File) -> Self {
        Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        }
    }

    async fn append(&mut self, url: &str) {
        let line = format!("{}\n", url);
        if let Err(e) = self.writer.write_all(line.as_bytes()).await {
            tracing::warn!(path = %self.path.display(), "Failed to append journal line: {}", e);
        }
    }

    async fn flush(&mut self) {
        if let Err(e) = self.writer.flush().await {
            tracing::warn!(path = %self.path.display(), "Failed to flush journal: {}", e);
        }
    }
}

struct JournalFiles {
    completed: JournalFile,
    failed: JournalFile,
}

impl JournalFiles {
    async fn write(&mut self, (kind, url): Entry) {
        match kind {
            JournalKind::Completed => self.completed.append(&url).await,
            JournalKind::Failed => self.failed.append(&url).await,
        }
    }

    async fn write_spilled(&mut self, spill: &Spill, close: bool) {
        for entry in spill.take(close) {
            self.write(entry).await;
        }
    }

    async fn flush(&mut self) {
        self.completed.flush().await;
        self.failed.flush().await;
    }
}

async fn run_writer(
    mut rx: mpsc::Receiver<Entry>,
    spill: Arc<Spill>,
    stop: CancellationToken,
    completed: JournalFile,
    failed: JournalFile,
) {
    let mut files = JournalFiles { completed, failed };
    let mut closing = false;

    loop {
        tokio::select! {
            biased;

            entry = rx.recv() => {
                let Some(mut entry) = entry else { break };
                // write the whole available batch, then flush once
                loop {
                    files.write(entry).await;
                    match rx.try_recv() {
                        Ok(next) => entry = next,
                        Err(_) => break,
                    }
                }
                files.write_spilled(&spill, false).await;
                files.flush().await;
            }

            _ = spill.notify.notified() => {
                files.write_spilled(&spill, false).await;
                files.flush().await;
            }

            _ = stop.cancelled(), if !closing => {
                // buffered lines are still delivered; recv yields None once drained
                rx.close();
                closing = true;
            }
        }
    }

    files.write_spilled(&spill, true).await;
    files.flush().await;
}

use crate::output::{JournalHandle, JournalKind};
use crate::state::UrlState;
use crate::HarvestError;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy)]
struct Entry {
    state: UrlState,
    attempts: u32,
}

/// Counts of URLs per tracked state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Concurrent record of every URL the scheduler has seen
///
/// A single map from URL to state keeps the pending, completed and failed
/// sets disjoint by construction. Entries are never evicted during a run.
#[derive(Debug, Default)]
pub struct CompletionTracker {
    entries: Mutex<HashMap<String, Entry>>,
    journal: Option<JournalHandle>,
}

impl CompletionTracker {
    /// Creates a tracker that keeps state in memory only
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracker that also appends terminal URLs to a journal
    pub fn with_journal(journal: JournalHandle) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            journal: Some(journal),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks an unknown URL as pending
    ///
    /// Check and insert happen under one lock, so of several concurrent
    /// callers with the same URL exactly one gets `true`.
    pub fn mark_pending(&self, url: &str) -> bool {
        let mut entries = self.entries();
        if entries.contains_key(url) {
            return false;
        }
        entries.insert(
            url.to_string(),
            Entry {
                state: UrlState::Pending,
                attempts: 0,
            },
        );
        true
    }

    /// Records a successful download
    ///
    /// # Arguments
    ///
    /// * `url` - A pending URL
    /// * `attempts` - Retry count of the task at the point of success
    pub fn mark_completed(&self, url: &str, attempts: u32) -> Result<(), HarvestError> {
        self.resolve(url, UrlState::Completed, attempts)?;
        self.append(JournalKind::Completed, url);
        Ok(())
    }

    /// Records a permanent failure
    pub fn mark_failed(&self, url: &str, attempts: u32) -> Result<(), HarvestError> {
        self.resolve(url, UrlState::Failed, attempts)?;
        self.append(JournalKind::Failed, url);
        Ok(())
    }

    fn resolve(&self, url: &str, to: UrlState, attempts: u32) -> Result<(), HarvestError> {
        let mut entries = self.entries();
        let from = entries.get(url).map_or(UrlState::Unknown, |e| e.state);

        if !from.can_transition_to(to) {
            return Err(HarvestError::InvalidTransition {
                url: url.to_string(),
                from,
                to,
            });
        }

        entries.insert(url.to_string(), Entry { state: to, attempts });
        Ok(())
    }

    fn append(&self, kind: JournalKind, url: &str) {
        if let Some(journal) = &self.journal {
            journal.record(kind, url);
        }
    }

    /// Returns true if the URL is pending, completed, or failed
    pub fn is_known(&self, url: &str) -> bool {
        self.entries().contains_key(url)
    }

    /// Gets the current state of a URL
    pub fn state(&self, url: &str) -> UrlState {
        self.entries()
            .get(url)
            .map_or(UrlState::Unknown, |e| e.state)
    }

    /// Gets the retry count recorded when the URL reached a terminal state
    pub fn attempts_for(&self, url: &str) -> Option<u32> {
        self.entries()
            .get(url)
            .filter(|e| e.state.is_terminal())
            .map(|e| e.attempts)
    }

    /// Counts URLs in each state
    pub fn counts(&self) -> StateCounts {
        let entries = self.entries();
        let mut counts = StateCounts::default();
        for entry in entries.values() {
            match entry.state {
                UrlState::Pending => counts.pending += 1,
                UrlState::Completed => counts.completed += 1,
                UrlState::Failed => counts.failed += 1,
                UrlState::Unknown => {}
            }
        }
        counts
    }
}

//! Overflow policy: the last tier of the enqueue fallback
//!
//! A task that fit neither its resource queue nor the priority queue is
//! handed to a background routine that first triggers emergency scale-up and
//! then retries insertion with linearly growing delays. After the configured
//! number of attempts the task is dropped, marked failed and counted.

use super::pool::WorkerPool;
use super::queue::QueueSet;
use super::task::DownloadTask;
use crate::config::OverflowConfig;
use crate::output::Stats;
use crate::state::CompletionTracker;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

pub struct Overflow {
    queues: Arc<QueueSet>,
    pool: Arc<WorkerPool>,
    tracker: Arc<CompletionTracker>,
    stats: Arc<Stats>,
    config: OverflowConfig,
    emergency_increment: usize,
    pending: TaskTracker,
    runtime: Handle,
}

impl Overflow {
    pub fn new(
        queues: Arc<QueueSet>,
        pool: Arc<WorkerPool>,
        tracker: Arc<CompletionTracker>,
        stats: Arc<Stats>,
        config: OverflowConfig,
        emergency_increment: usize,
        runtime: Handle,
    ) -> Self {
        Self {
            queues,
            pool,
            tracker,
            stats,
            config,
            emergency_increment,
            pending: TaskTracker::new(),
            runtime,
        }
    }

    /// Takes ownership of a task that could not be queued; returns at once
    pub fn dispatch(self: &Arc<Self>, task: DownloadTask) {
        let this = Arc::clone(self);
        self.pending.spawn_on(this.persist(task), &self.runtime);
    }

    /// Tasks still being retried
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Waits until every dispatched task was placed or dropped
    pub async fn wait(&self) {
        self.pending.close();
        self.pending.wait().await;
    }

    async fn persist(self: Arc<Self>, mut task: DownloadTask) {
        let started = self.pool.scale_up(self.emergency_increment);
        if started > 0 {
            tracing::info!(started, active = self.pool.started(), "Emergency scale-up on queue overflow");
        }

        for attempt in 1..=self.config.max_attempts {
            tokio::time::sleep(self.config.delay_for(attempt)).await;

            match self.queues.try_push_any(task) {
                Ok(placement) => {
                    tracing::debug!(attempt, ?placement, "Overflowed task queued");
                    return;
                }
                Err(returned) => task = returned,
            }

            if self.queues.is_closed() {
                break;
            }
        }

        tracing::warn!(
            url = %task.url,
            attempts = self.config.max_attempts,
            "Dropping task, queues stayed full"
        );
        self.stats.record_dropped();
        if let Err(e) = self.tracker.mark_failed(&task.url, task.attempt) {
            tracing::warn!("{}", e);
        }
    }
}

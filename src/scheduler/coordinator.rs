//! Scheduler facade: startup, producer intake, snapshots and shutdown
//!
//! This module wires the other scheduler parts together:
//! - Building the registry, queues, journal, tracker and worker pool
//! - Starting the initial workers and the periodic monitors
//! - Admitting producer submissions without ever blocking them
//! - Draining in order on shutdown

use super::limiter::RateLimiter;
use super::overflow::Overflow;
use super::pool::{WorkerContext, WorkerPool, WorkerSettings};
use super::queue::{Placement, QueueSet};
use super::scaler::{run_scaler, ScalerSettings, EMERGENCY_MULTIPLIER};
use super::shutdown::{IntakeGate, Lifecycle, Phase};
use super::task::DownloadTask;
use crate::config::{validate, Config};
use crate::fetch::DownloadExecutor;
use crate::output::{Journal, Stats, StatsSnapshot};
use crate::resource::ResourceRegistry;
use crate::state::CompletionTracker;
use crate::url::normalize_url;
use crate::HarvestError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const DRAIN_POLL: Duration = Duration::from_millis(5);

/// What `submit` did with a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Placed directly into a queue
    Queued(Placement),
    /// Both queues were full; handed to the overflow policy
    Overflowed,
    /// Already pending, completed or failed
    Duplicate,
    /// Intake is closed
    Rejected,
    /// Not an http(s) URL
    Invalid,
}

impl SubmitOutcome {
    /// Returns true if a new task was created for the URL
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Queued(_) | Self::Overflowed)
    }
}

/// Read-only handles needed to build a [`StatsSnapshot`]
#[derive(Clone)]
struct SnapshotSource {
    stats: Arc<Stats>,
    tracker: Arc<CompletionTracker>,
    pool: Arc<WorkerPool>,
    queues: Arc<QueueSet>,
}

impl SnapshotSource {
    fn snapshot(&self) -> StatsSnapshot {
        let counts = self.tracker.counts();
        StatsSnapshot {
            attempts: self.stats.attempts(),
            successes: self.stats.successes(),
            failures: self.stats.failures(),
            bytes: self.stats.bytes(),
            dropped: self.stats.dropped(),
            active_workers: self.pool.started(),
            live_workers: self.pool.live(),
            pending: counts.pending,
            completed: counts.completed,
            failed: counts.failed,
            priority_queue: self.queues.priority_depth(),
            queue_depths: self.queues.resource_depths(),
            elapsed: self.stats.elapsed(),
        }
    }
}

/// Adaptive multi-resource download scheduler
pub struct Scheduler {
    registry: Arc<ResourceRegistry>,
    queues: Arc<QueueSet>,
    pool: Arc<WorkerPool>,
    overflow: Arc<Overflow>,
    tracker: Arc<CompletionTracker>,
    source: SnapshotSource,
    lifecycle: Lifecycle,
    intake: IntakeGate,
    cancel: CancellationToken,
    stopped: CancellationToken,
    monitors: TaskTracker,
    journal: Mutex<Option<Journal>>,
    next_resource: AtomicUsize,
}

impl Scheduler {
    /// Builds every component and starts the initial workers and monitors
    ///
    /// Must be called from within a tokio runtime; workers and monitors are
    /// spawned onto it.
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration; validated again here since callers may
    ///   build or edit it in code
    ///
    /// # Returns
    ///
    /// * `Ok(Scheduler)` - Running and accepting submissions
    /// * `Err(HarvestError)` - Invalid configuration, a client failed to
    ///   build, or the download directory or journals could not be created
    pub async fn start(config: Config) -> Result<Self, HarvestError> {
        validate(&config)?;

        let runtime = Handle::current();
        let sched = &config.scheduler;

        let registry = Arc::new(ResourceRegistry::new(
            &config.resources,
            &config.fetch,
            sched,
        )?);
        let queues = Arc::new(QueueSet::from_registry(
            &registry,
            sched.priority_queue_capacity,
        ));

        tokio::fs::create_dir_all(&config.output.download_dir).await?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let completed_log = config.output.completed_log_path(&stamp);
        let failed_log = config.output.failed_log_path(&stamp);
        let journal = Journal::open(&completed_log, &failed_log, config.output.journal_capacity).await?;
        tracing::info!(
            completed = %completed_log.display(),
            failed = %failed_log.display(),
            "Journals opened"
        );

        let stats = Arc::new(Stats::new());
        let tracker = Arc::new(CompletionTracker::with_journal(journal.handle()));
        let executor = DownloadExecutor::new(
            config.output.download_dir.clone(),
            config.fetch.request_timeout(),
            Arc::clone(&stats),
        );

        let ctx = Arc::new(WorkerContext {
            registry: Arc::clone(&registry),
            queues: Arc::clone(&queues),
            executor,
            tracker: Arc::clone(&tracker),
            limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            settings: WorkerSettings {
                max_retries: sched.max_retries,
                backoff_unit: sched.retry_backoff_unit(),
                idle_interval: sched.idle_interval(),
            },
        });
        let pool = Arc::new(WorkerPool::new(ctx, sched.worker_ceiling, runtime.clone()));

        let overflow = Arc::new(Overflow::new(
            Arc::clone(&queues),
            Arc::clone(&pool),
            Arc::clone(&tracker),
            Arc::clone(&stats),
            config.overflow.clone(),
            sched.scale_step * EMERGENCY_MULTIPLIER,
            runtime.clone(),
        ));

        start_initial_workers(&registry, &pool);
        tracing::info!(
            resources = registry.resource_count(),
            workers = pool.started(),
            ceiling = pool.ceiling(),
            "Scheduler started"
        );

        let source = SnapshotSource {
            stats,
            tracker: Arc::clone(&tracker),
            pool: Arc::clone(&pool),
            queues: Arc::clone(&queues),
        };

        let cancel = CancellationToken::new();
        let monitors = TaskTracker::new();
        monitors.spawn_on(
            run_scaler(
                Arc::clone(&pool),
                Arc::clone(&queues),
                ScalerSettings {
                    interval: sched.scale_check_interval(),
                    threshold: sched.scale_threshold,
                    step: sched.scale_step,
                },
                cancel.child_token(),
            ),
            &runtime,
        );
        monitors.spawn_on(
            run_stats_reporter(source.clone(), sched.stats_interval(), cancel.child_token()),
            &runtime,
        );

        Ok(Self {
            registry,
            queues,
            pool,
            overflow,
            tracker,
            source,
            lifecycle: Lifecycle::new(),
            intake: IntakeGate::new(),
            cancel,
            stopped: CancellationToken::new(),
            monitors,
            journal: Mutex::new(Some(journal)),
            next_resource: AtomicUsize::new(0),
        })
    }

    /// Offers a discovered URL to the scheduler
    ///
    /// Never blocks: a URL that fits no queue is handed to the overflow
    /// policy in the background. A URL already pending, completed or failed
    /// is skipped; the check and the mark are one atomic step.
    pub fn submit(&self, url: &str, depth: u32) -> SubmitOutcome {
        let Some(_permit) = self.intake.enter() else {
            return SubmitOutcome::Rejected;
        };

        let normalized = match normalize_url(url) {
            Ok(normalized) => normalized,
            Err(e) => {
                tracing::debug!(%url, "Skipping URL: {}", e);
                return SubmitOutcome::Invalid;
            }
        };
        let key = String::from(normalized);

        if !self.tracker.mark_pending(&key) {
            return SubmitOutcome::Duplicate;
        }

        let resource = self.next_resource.fetch_add(1, Ordering::Relaxed) % self.registry.resource_count();
        let task = DownloadTask::new(key, depth, resource);

        match self.queues.try_enqueue(task) {
            Ok(placement) => SubmitOutcome::Queued(placement),
            Err(task) => {
                tracing::debug!(url = %task.url, "Queues full, handing task to overflow");
                self.overflow.dispatch(task);
                SubmitOutcome::Overflowed
            }
        }
    }

    /// Point-in-time counters; cheap enough to poll on any interval
    pub fn stats(&self) -> StatsSnapshot {
        self.source.snapshot()
    }

    pub fn tracker(&self) -> &CompletionTracker {
        &self.tracker
    }

    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    /// Drains and stops; resolves once every worker has exited
    ///
    /// Order: close intake and cancel monitors, wait for admitted submits
    /// and overflow retries to finish, close the queues, wait for workers to
    /// drain them, then flush the journals. Calling it again waits for the
    /// first call to finish.
    pub async fn shutdown(&self) {
        if !self.lifecycle.begin_drain() {
            self.stopped.cancelled().await;
            return;
        }

        tracing::info!("Draining: intake closed");
        self.intake.close();
        self.cancel.cancel();
        self.pool.stop();

        self.monitors.close();
        self.monitors.wait().await;

        self.intake.wait_idle(DRAIN_POLL).await;
        if self.overflow.in_flight() > 0 {
            tracing::info!(tasks = self.overflow.in_flight(), "Waiting for overflowed tasks");
        }
        self.overflow.wait().await;

        self.queues.close();
        tracing::info!(
            queued = self.stats().total_queued(),
            workers = self.pool.live(),
            "Queues closed, draining workers"
        );
        self.pool.join().await;

        let journal = self
            .journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(journal) = journal {
            journal.close().await;
        }

        self.lifecycle.finish();
        self.stopped.cancel();
        tracing::info!("Stopped: {}", self.stats());
    }
}

/// Gives every resource one worker first so no queue is left undrained,
/// then fills each up to its class-sized allocation
fn start_initial_workers(registry: &ResourceRegistry, pool: &WorkerPool) {
    for resource in registry.iter() {
        pool.spawn_workers(resource.index, 1);
    }
    for resource in registry.iter() {
        pool.spawn_workers(resource.index, resource.initial_workers.saturating_sub(1));
    }
}

async fn run_stats_reporter(source: SnapshotSource, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                tracing::info!("{}", source.snapshot());
            }
        }
    }
}

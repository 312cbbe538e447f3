//! Worker Pool
//!
//! Workers are long-lived tokio tasks, each bound to one resource and one
//! client slot of that resource. The pool only ever grows: the started count
//! is monotonic and capped by the ceiling, and nothing is started once the
//! pool has been stopped.

use super::limiter::{Admission, RateLimiter};
use super::queue::{Dequeue, QueueSet};
use super::task::DownloadTask;
use crate::fetch::DownloadExecutor;
use crate::resource::{distribute, ResourceRegistry};
use crate::state::CompletionTracker;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

/// Retry and pacing knobs for the worker loop
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub max_retries: u32,
    pub backoff_unit: Duration,
    pub idle_interval: Duration,
}

/// Everything a worker touches, shared by all workers
pub struct WorkerContext {
    pub registry: Arc<ResourceRegistry>,
    pub queues: Arc<QueueSet>,
    pub executor: DownloadExecutor,
    pub tracker: Arc<CompletionTracker>,
    pub limiter: Arc<RateLimiter>,
    pub settings: WorkerSettings,
}

pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
    ceiling: usize,
    started: AtomicUsize,
    live: Arc<AtomicUsize>,
    next_slot: Vec<AtomicUsize>,
    stopped: AtomicBool,
    spawn_lock: Mutex<()>,
    workers: TaskTracker,
    runtime: Handle,
}

impl WorkerPool {
    /// Creates an empty pool; workers run on `runtime`
    pub fn new(ctx: Arc<WorkerContext>, ceiling: usize, runtime: Handle) -> Self {
        let next_slot = (0..ctx.registry.resource_count())
            .map(|_| AtomicUsize::new(0))
            .collect();

        Self {
            ctx,
            ceiling,
            started: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            next_slot,
            stopped: AtomicBool::new(false),
            spawn_lock: Mutex::new(()),
            workers: TaskTracker::new(),
            runtime,
        }
    }

    /// Workers started this run; never decreases
    pub fn started(&self) -> usize {
        self.started.load(Ordering::Acquire)
    }

    /// Workers whose loop has not exited yet
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Slots left under the ceiling
    pub fn headroom(&self) -> usize {
        self.ceiling.saturating_sub(self.started())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Starts up to `requested` workers for one resource
    ///
    /// # Returns
    ///
    /// The number actually started, which is lower than requested when the
    /// ceiling is reached and zero once the pool is stopped.
    pub fn spawn_workers(&self, resource: usize, requested: usize) -> usize {
        let Some(res) = self.ctx.registry.resource(resource) else {
            return 0;
        };

        let _guard = self.spawn_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_stopped() {
            return 0;
        }

        let current = self.started();
        let granted = requested.min(self.ceiling.saturating_sub(current));
        if granted == 0 {
            return 0;
        }
        self.started.store(current + granted, Ordering::Release);

        for n in 0..granted {
            let slot = self.next_slot[resource].fetch_add(1, Ordering::Relaxed) % res.client_count();
            let worker = Worker {
                id: current + n,
                resource,
                slot,
                ctx: Arc::clone(&self.ctx),
            };

            self.live.fetch_add(1, Ordering::AcqRel);
            let live = LiveGuard(Arc::clone(&self.live));
            self.workers.spawn_on(worker.run(live), &self.runtime);
        }

        granted
    }

    /// Starts `total` workers split across resources by share weight
    ///
    /// The total is clamped to the remaining headroom first.
    pub fn scale_up(&self, total: usize) -> usize {
        let total = total.min(self.headroom());
        if total == 0 {
            return 0;
        }

        let shares = distribute(total, &self.ctx.registry.share_weights());
        shares
            .into_iter()
            .enumerate()
            .map(|(resource, count)| self.spawn_workers(resource, count))
            .sum()
    }

    /// Refuses every later spawn request
    pub fn stop(&self) {
        let _guard = self.spawn_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.stopped.store(true, Ordering::Release);
    }

    /// Stops the pool and waits for every worker loop to exit
    ///
    /// Workers exit only after the queues are closed and drained.
    pub async fn join(&self) {
        self.stop();
        self.workers.close();
        self.workers.wait().await;
    }
}

/// Linear backoff before retry number `attempt`, saturating instead of
/// overflowing
pub fn retry_backoff(unit: Duration, attempt: u32) -> Duration {
    unit.checked_mul(attempt).unwrap_or(Duration::MAX)
}

/// Decrements the live count when a worker loop ends, even by panic
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Worker {
    id: usize,
    resource: usize,
    slot: usize,
    ctx: Arc<WorkerContext>,
}

impl Worker {
    async fn run(self, _live: LiveGuard) {
        tracing::debug!(
            worker = self.id,
            resource = self.resource,
            slot = self.slot,
            "Worker started"
        );

        loop {
            match self.ctx.queues.dequeue(self.resource) {
                Dequeue::Task(task) => self.process(task).await,
                Dequeue::Empty => tokio::time::sleep(self.ctx.settings.idle_interval).await,
                Dequeue::Closed => break,
            }
        }

        tracing::debug!(worker = self.id, resource = self.resource, "Worker exited");
    }

    /// Runs a task to a terminal state or hands its retry to the priority
    /// queue
    ///
    /// If the priority queue cannot take the retry, the worker keeps the task
    /// and runs the next attempt itself. The loop is bounded by `max_retries`.
    async fn process(&self, mut task: DownloadTask) {
        let settings = self.ctx.settings;

        loop {
            if self.ctx.limiter.acquire().await == Admission::TimedOut {
                tracing::trace!(worker = self.id, "Rate limit wait elapsed, proceeding");
            }

            // a priority task may carry another resource's hint; it still
            // goes out on this worker's own client
            let Some(client) = self.ctx.registry.resource(self.resource).map(|r| r.client(self.slot)) else {
                return;
            };

            match self.ctx.executor.fetch(&task.url, client).await {
                Ok(bytes) => {
                    tracing::debug!(url = %task.url, attempt = task.attempt, bytes, "Download completed");
                    if let Err(e) = self.ctx.tracker.mark_completed(&task.url, task.attempt) {
                        tracing::warn!("{}", e);
                    }
                    return;
                }
                Err(e) if e.is_retryable() && task.attempt < settings.max_retries => {
                    task = task.into_retry();
                    tracing::debug!(url = %task.url, attempt = task.attempt, "Retrying after: {}", e);

                    tokio::time::sleep(retry_backoff(settings.backoff_unit, task.attempt)).await;

                    match self.ctx.queues.try_push_priority(task) {
                        Ok(()) => return,
                        Err(returned) => {
                            tracing::debug!(url = %returned.url, "Priority queue unavailable, retrying in place");
                            task = returned;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %task.url, attempt = task.attempt, "Download failed: {}", e);
                    if let Err(e) = self.ctx.tracker.mark_failed(&task.url, task.attempt) {
                        tracing::warn!("{}", e);
                    }
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CapacityClass, FetchConfig, RateLimitConfig, ResourceEntry, SchedulerConfig};
    use crate::output::Stats;
    use tempfile::TempDir;

    fn entry(name: &str, capacity: CapacityClass) -> ResourceEntry {
        ResourceEntry {
            name: name.to_string(),
            local_address: None,
            capacity,
        }
    }

    fn pool(entries: &[ResourceEntry], ceiling: usize, dir: &TempDir) -> (WorkerPool, Arc<QueueSet>) {
        let registry = Arc::new(
            ResourceRegistry::new(entries, &FetchConfig::default(), &SchedulerConfig::default())
                .unwrap(),
        );
        let queues = Arc::new(QueueSet::from_registry(&registry, 16));
        let ctx = Arc::new(WorkerContext {
            registry,
            queues: Arc::clone(&queues),
            executor: DownloadExecutor::new(
                dir.path().to_path_buf(),
                Duration::from_secs(1),
                Arc::new(Stats::new()),
            ),
            tracker: Arc::new(CompletionTracker::new()),
            limiter: Arc::new(RateLimiter::new(&RateLimitConfig::default())),
            settings: WorkerSettings {
                max_retries: 0,
                backoff_unit: Duration::from_millis(1),
                idle_interval: Duration::from_millis(1),
            },
        });
        (WorkerPool::new(ctx, ceiling, Handle::current()), queues)
    }

    #[test]
    fn test_retry_backoff_is_linear_and_saturates() {
        let unit = Duration::from_millis(200);
        assert_eq!(retry_backoff(unit, 0), Duration::ZERO);
        assert_eq!(retry_backoff(unit, 3), Duration::from_millis(600));
        assert_eq!(retry_backoff(Duration::MAX, 2), Duration::MAX);
    }

    #[tokio::test]
    async fn test_spawn_respects_ceiling() {
        let dir = TempDir::new().unwrap();
        let (pool, queues) = pool(&[entry("eth0", CapacityClass::Standard)], 5, &dir);

        assert_eq!(pool.spawn_workers(0, 3), 3);
        assert_eq!(pool.spawn_workers(0, 3), 2);
        assert_eq!(pool.spawn_workers(0, 3), 0);
        assert_eq!(pool.started(), 5);
        assert_eq!(pool.headroom(), 0);

        queues.close();
        pool.join().await;
        assert_eq!(pool.live(), 0);
        assert_eq!(pool.started(), 5);
    }

    #[tokio::test]
    async fn test_unknown_resource_starts_nothing() {
        let dir = TempDir::new().unwrap();
        let (pool, queues) = pool(&[entry("eth0", CapacityClass::Standard)], 5, &dir);
        assert_eq!(pool.spawn_workers(3, 2), 0);
        assert_eq!(pool.started(), 0);

        queues.close();
        pool.join().await;
    }

    #[tokio::test]
    async fn test_scale_up_splits_by_share_weight() {
        let dir = TempDir::new().unwrap();
        let entries = [
            entry("fast", CapacityClass::High),
            entry("mid", CapacityClass::Standard),
            entry("slow", CapacityClass::Low),
        ];
        let (pool, queues) = pool(&entries, 100, &dir);

        assert_eq!(pool.scale_up(14), 14);
        assert_eq!(pool.started(), 14);

        // clamped to headroom
        assert_eq!(pool.scale_up(200), 86);
        assert_eq!(pool.started(), 100);

        queues.close();
        pool.join().await;
    }

    #[tokio::test]
    async fn test_no_spawn_after_stop() {
        let dir = TempDir::new().unwrap();
        let (pool, queues) = pool(&[entry("eth0", CapacityClass::Standard)], 5, &dir);
        pool.spawn_workers(0, 1);
        pool.stop();

        assert_eq!(pool.spawn_workers(0, 1), 0);
        assert_eq!(pool.scale_up(4), 0);
        assert_eq!(pool.started(), 1);

        queues.close();
        pool.join().await;
        assert_eq!(pool.live(), 0);
    }
}

//! Download counters and point-in-time snapshots
//!
//! The executor increments the counters; everything else only reads them.
//! Rendering is a plain `Display` impl so callers can log or print it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic download counters
#[derive(Debug)]
pub struct Stats {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    bytes: AtomicU64,
    dropped: AtomicU64,
    started: Instant,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful attempt and the exact number of bytes written
    pub fn record_success(&self, bytes: u64) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a failed attempt (retried or not)
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a task abandoned by the overflow policy
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Fill level of one queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDepth {
    pub name: String,
    pub len: usize,
    pub capacity: usize,
}

impl QueueDepth {
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.len as f64 / self.capacity as f64
        }
    }
}

/// Read-only view of the scheduler at one instant
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    /// Fetch attempts issued
    pub attempts: u64,
    /// Attempts that ended in HTTP 200 with the body fully written
    pub successes: u64,
    /// Attempts that failed, including ones later retried
    pub failures: u64,
    /// Bytes written to disk by successful attempts
    pub bytes: u64,
    /// Tasks dropped after the overflow policy gave up
    pub dropped: u64,
    /// Workers started this run; never decreases
    pub active_workers: usize,
    /// Workers whose loop is still running
    pub live_workers: usize,
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
    /// Global priority queue
    pub priority_queue: QueueDepth,
    /// One entry per resource, in registry order
    pub queue_depths: Vec<QueueDepth>,
    pub elapsed: Duration,
}

impl StatsSnapshot {
    /// Total tasks waiting across every queue
    pub fn total_queued(&self) -> usize {
        self.priority_queue.len + self.queue_depths.iter().map(|q| q.len).sum::<usize>()
    }

    /// Percentage of attempts that succeeded
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64 * 100.0
        }
    }

    /// Average bandwidth in megabits per second
    pub fn mbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.bytes as f64 * 8.0 / secs / 1024.0 / 1024.0
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} workers ({} live), {} queued | {} attempts, {} ok, {} failed ({:.1}%) | \
             {} pending, {} completed, {} failed, {} dropped | {:.1} Mbps, {}",
            self.active_workers,
            self.live_workers,
            self.total_queued(),
            self.attempts,
            self.successes,
            self.failures,
            self.success_rate(),
            self.pending,
            self.completed,
            self.failed,
            self.dropped,
            self.mbps(),
            format_bytes(self.bytes)
        )
    }
}

/// Formats a byte count with binary units
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    let prefix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {}B", bytes as f64 / div as f64, prefix)
}

/// Prints a final report to stdout
pub fn print_statistics(snapshot: &StatsSnapshot) {
    println!("=== Harvest Statistics ===\n");

    println!("Overview:");
    println!("  Elapsed: {:.1?}", snapshot.elapsed);
    println!(
        "  Attempts: {} ({} ok, {} failed, {:.1}% success)",
        snapshot.attempts,
        snapshot.successes,
        snapshot.failures,
        snapshot.success_rate()
    );
    println!(
        "  Data downloaded: {} ({:.2} Mbps average)",
        format_bytes(snapshot.bytes),
        snapshot.mbps()
    );
    println!();

    println!("URLs:");
    println!("  Completed: {}", snapshot.completed);
    println!("  Failed: {}", snapshot.failed);
    println!("  Dropped on overflow: {}", snapshot.dropped);
    if snapshot.pending > 0 {
        println!("  Still pending: {}", snapshot.pending);
    }
    println!();

    println!("Workers: {} started", snapshot.active_workers);
    for queue in &snapshot.queue_depths {
        println!(
            "  {}: queue {}/{} ({:.1}%)",
            queue.name,
            queue.len,
            queue.capacity,
            queue.utilization() * 100.0
        );
    }
}

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Sumi-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default, rename = "rate-limit")]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub overflow: OverflowConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceEntry>,
}

/// Worker pool, queue and scaling configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Hard ceiling on the number of workers started during a run
    #[serde(rename = "worker-ceiling")]
    pub worker_ceiling: usize,

    /// Workers started per standard-capacity resource at startup
    #[serde(rename = "initial-workers-per-resource")]
    pub initial_workers_per_resource: usize,

    /// Aggregate queue utilization above which the scaler adds workers
    #[serde(rename = "scale-threshold")]
    pub scale_threshold: f64,

    /// Interval between scaler samples (milliseconds)
    #[serde(rename = "scale-check-interval-ms")]
    pub scale_check_interval_ms: u64,

    /// Base number of workers added per scale-up
    #[serde(rename = "scale-step")]
    pub scale_step: usize,

    /// Maximum number of retries after the first attempt
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Backoff unit multiplied by the attempt count before a retry (milliseconds)
    #[serde(rename = "retry-backoff-unit-ms")]
    pub retry_backoff_unit_ms: u64,

    /// Queue capacity of a standard-capacity resource
    #[serde(rename = "queue-capacity-per-resource")]
    pub queue_capacity_per_resource: usize,

    /// Capacity of the global priority queue
    #[serde(rename = "priority-queue-capacity")]
    pub priority_queue_capacity: usize,

    /// How long an idle worker sleeps before polling again (milliseconds)
    #[serde(rename = "idle-interval-ms")]
    pub idle_interval_ms: u64,

    /// Interval between periodic stats log lines (milliseconds)
    #[serde(rename = "stats-interval-ms")]
    pub stats_interval_ms: u64,
}

impl SchedulerConfig {
    pub fn scale_check_interval(&self) -> Duration {
        Duration::from_millis(self.scale_check_interval_ms)
    }

    pub fn retry_backoff_unit(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_unit_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_ceiling: 256,
            initial_workers_per_resource: 8,
            scale_threshold: 0.4,
            scale_check_interval_ms: 500,
            scale_step: 16,
            max_retries: 3,
            retry_backoff_unit_ms: 200,
            queue_capacity_per_resource: 10_000,
            priority_queue_capacity: 5_000,
            idle_interval_ms: 5,
            stats_interval_ms: 3_000,
        }
    }
}

/// HTTP request configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout-secs")]
    pub request_timeout_secs: u64,

    /// User-Agent header sent with every download
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Number of reusable clients built per resource
    #[serde(rename = "clients-per-resource")]
    pub clients_per_resource: usize,
}

impl FetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/114.0 Safari/537.36"
                .to_string(),
            clients_per_resource: 8,
        }
    }
}

/// Global request rate configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained request issue rate across all workers
    #[serde(rename = "requests-per-second")]
    pub requests_per_second: u32,

    /// Number of requests that may be issued in a burst
    pub burst: u32,

    /// How long a worker waits for a token before proceeding anyway (milliseconds)
    #[serde(rename = "token-wait-ms")]
    pub token_wait_ms: u64,
}

impl RateLimitConfig {
    pub fn token_wait(&self) -> Duration {
        Duration::from_millis(self.token_wait_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 500,
            burst: 1_000,
            token_wait_ms: 50,
        }
    }
}

/// Persistent re-enqueue policy for tasks that found every queue full
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OverflowConfig {
    /// Insertion attempts before the task is dropped
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Linear delay step between attempts (milliseconds)
    #[serde(rename = "delay-step-ms")]
    pub delay_step_ms: u64,
}

impl OverflowConfig {
    /// Delay before overflow retry number `attempt`, growing linearly
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_step_ms.saturating_mul(u64::from(attempt)))
    }
}

impl Default for OverflowConfig {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            delay_step_ms: 50,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory downloaded files are written into
    #[serde(rename = "download-dir")]
    pub download_dir: PathBuf,

    /// Append-only record of completed URLs
    #[serde(rename = "completed-log")]
    pub completed_log: Option<PathBuf>,

    /// Append-only record of failed URLs
    #[serde(rename = "failed-log")]
    pub failed_log: Option<PathBuf>,

    /// Journal lines buffered in the channel before recording spills to memory
    #[serde(rename = "journal-capacity")]
    pub journal_capacity: usize,
}

impl OutputConfig {
    /// Completed-log path, defaulting to a run-stamped file name
    pub fn completed_log_path(&self, stamp: &str) -> PathBuf {
        self.completed_log
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("completed_{}.txt", stamp)))
    }

    /// Failed-log path, defaulting to a run-stamped file name
    pub fn failed_log_path(&self, stamp: &str) -> PathBuf {
        self.failed_log
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("failed_{}.txt", stamp)))
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            completed_log: None,
            failed_log: None,
            journal_capacity: 4_096,
        }
    }
}

/// One egress path
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceEntry {
    /// Identity shown in logs and stats (e.g. the interface name)
    pub name: String,

    /// Local address outgoing connections are bound to
    #[serde(default, rename = "local-address")]
    pub local_address: Option<String>,

    /// Capacity class of the path
    #[serde(default)]
    pub capacity: CapacityClass,
}

/// Capacity class of an egress path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacityClass {
    High,
    #[default]
    Standard,
    Low,
}

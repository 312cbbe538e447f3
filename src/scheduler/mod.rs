//! Adaptive download scheduling
//!
//! This module handles:
//! - Per-resource and priority task queues with non-blocking hand-off
//! - A growing pool of workers per resource
//! - Utilization-driven and overflow-driven scale-up
//! - Bounded retries with linear backoff
//! - Ordered drain on shutdown

mod coordinator;
mod limiter;
mod overflow;
mod pool;
mod queue;
mod scaler;
mod shutdown;
mod task;

pub use coordinator::{Scheduler, SubmitOutcome};
pub use limiter::{Admission, RateLimiter};
pub use queue::{Dequeue, Placement, QueueSet};
pub use scaler::{scale_increment, EMERGENCY_MULTIPLIER};
pub use shutdown::{IntakeGate, Lifecycle, Phase};
pub use task::DownloadTask;

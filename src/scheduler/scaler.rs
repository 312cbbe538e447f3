//! Scaler: periodic, upward-only worker growth
//!
//! | utilization `u`          | increment    |
//! |--------------------------|--------------|
//! | `u <= threshold`         | 0            |
//! | `u > 0.8`                | 4 × step     |
//! | `u > 0.6`                | 2 × step     |
//! | otherwise                | 1 × step     |
//!
//! The pool clamps every increment to the headroom under the ceiling.

use super::pool::WorkerPool;
use super::queue::QueueSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const CRITICAL_UTILIZATION: f64 = 0.8;
const HIGH_UTILIZATION: f64 = 0.6;

/// Multiplier of the step used by overflow-triggered scale-up
pub const EMERGENCY_MULTIPLIER: usize = 3;

/// Workers to add for an observed utilization
pub fn scale_increment(utilization: f64, threshold: f64, step: usize) -> usize {
    if utilization <= threshold {
        0
    } else if utilization > CRITICAL_UTILIZATION {
        step * 4
    } else if utilization > HIGH_UTILIZATION {
        step * 2
    } else {
        step
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScalerSettings {
    pub interval: Duration,
    pub threshold: f64,
    pub step: usize,
}

/// Samples queue utilization every interval until cancelled
pub async fn run_scaler(
    pool: Arc<WorkerPool>,
    queues: Arc<QueueSet>,
    settings: ScalerSettings,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if pool.headroom() == 0 {
            continue;
        }

        let utilization = queues.utilization();
        let increment = scale_increment(utilization, settings.threshold, settings.step);
        if increment == 0 {
            continue;
        }

        let started = pool.scale_up(increment);
        if started > 0 {
            tracing::info!(
                utilization = %format!("{:.2}", utilization),
                started,
                active = pool.started(),
                "Scaled up workers"
            );
        }
    }

    tracing::debug!("Scaler stopped");
}

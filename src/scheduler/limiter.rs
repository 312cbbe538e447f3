//! Global request-rate gate
//!
//! A single token bucket shared by every worker. Waiting for a token is
//! bounded: a worker that misses its token within the wait window proceeds
//! anyway, so a misconfigured limit slows the pool down but never stalls it.

use crate::config::RateLimitConfig;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};
use std::num::NonZeroU32;
use std::time::Duration;

/// How a worker got past the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    /// The wait window elapsed first
    TimedOut,
}

pub struct RateLimiter {
    inner: Governor<NotKeyed, InMemoryState, DefaultClock>,
    wait: Duration,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst).unwrap_or(rate);

        Self {
            inner: Governor::direct(Quota::per_second(rate).allow_burst(burst)),
            wait: config.token_wait(),
        }
    }

    /// Waits at most the configured window for a token
    pub async fn acquire(&self) -> Admission {
        match tokio::time::timeout(self.wait, self.inner.until_ready()).await {
            Ok(()) => Admission::Granted,
            Err(_) => Admission::TimedOut,
        }
    }
}

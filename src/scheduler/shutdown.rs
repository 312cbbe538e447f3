//! Lifecycle phases and the producer intake gate

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

/// Scheduler lifecycle: `Running -> Draining -> Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Draining,
    Stopped,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Draining => 1,
            Self::Stopped => 2,
        }
    }
}

#[derive(Debug)]
pub struct Lifecycle {
    phase: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Running.as_u8()),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Moves `Running -> Draining`; returns false if already past Running
    pub fn begin_drain(&self) -> bool {
        self.phase
            .compare_exchange(
                Phase::Running.as_u8(),
                Phase::Draining.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Moves `Draining -> Stopped`
    pub fn finish(&self) -> bool {
        self.phase
            .compare_exchange(
                Phase::Draining.as_u8(),
                Phase::Stopped.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Admission gate for producer calls
///
/// Every `submit` holds an [`IntakePermit`] for its duration. After
/// [`IntakeGate::close`], new calls are refused and
/// [`IntakeGate::wait_idle`] resolves once the calls already admitted have
/// returned.
#[derive(Debug)]
pub struct IntakeGate {
    open: AtomicBool,
    in_flight: AtomicUsize,
}

impl Default for IntakeGate {
    fn default() -> Self {
        Self::new()
    }
}

impl IntakeGate {
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Admits one producer call, or `None` once the gate is closed
    pub fn enter(&self) -> Option<IntakePermit<'_>> {
        // Count first, then check: a close() that this call does not observe
        // is ordered after the increment, so wait_idle will see it
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if !self.open.load(Ordering::SeqCst) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(IntakePermit { gate: self })
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolves once no admitted call is still running
    pub async fn wait_idle(&self, poll: Duration) {
        while self.in_flight() > 0 {
            tokio::time::sleep(poll).await;
        }
    }
}

pub struct IntakePermit<'a> {
    gate: &'a IntakeGate,
}

impl Drop for IntakePermit<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.phase(), Phase::Running);

        assert!(!lifecycle.finish());
        assert!(lifecycle.begin_drain());
        assert!(!lifecycle.begin_drain());
        assert_eq!(lifecycle.phase(), Phase::Draining);

        assert!(lifecycle.finish());
        assert_eq!(lifecycle.phase(), Phase::Stopped);
    }

    #[test]
    fn test_gate_refuses_after_close() {
        let gate = IntakeGate::new();
        let permit = gate.enter();
        assert!(permit.is_some());
        assert_eq!(gate.in_flight(), 1);

        gate.close();
        assert!(gate.enter().is_none());
        assert_eq!(gate.in_flight(), 1);

        drop(permit);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_when_permits_drop() {
        let gate = std::sync::Arc::new(IntakeGate::new());
        let holder = std::sync::Arc::clone(&gate);

        let task = tokio::spawn(async move {
            let _permit = holder.enter();
            tokio::time::sleep(Duration::from_millis(30)).await;
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        gate.close();
        gate.wait_idle(Duration::from_millis(1)).await;
        assert_eq!(gate.in_flight(), 0);
        task.await.unwrap();
    }
}

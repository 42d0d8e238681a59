use std::time::Duration;
use tokio::time::Instant;

/// Result of asking the gate whether the next entry may be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A slot is free and the spacing interval has elapsed.
    Ready,
    /// A slot is free but the previous dispatch was too recent.
    Wait(Duration),
    /// The concurrency ceiling is reached; wait for a settlement.
    Saturated,
}

/// Concurrency ceiling plus minimum spacing between dispatch starts.
#[derive(Debug, Clone)]
pub struct RateGate {
    max_concurrent: usize,
    spacing: Duration,
    active_count: usize,
    last_dispatch: Option<Instant>,
}

impl RateGate {
    pub fn new(max_concurrent: usize, spacing: Duration) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            spacing,
            active_count: 0,
            last_dispatch: None,
        }
    }

    pub fn check(&self, now: Instant) -> Admission {
        if self.active_count >= self.max_concurrent {
            return Admission::Saturated;
        }

        match self.time_until_available(now) {
            Some(wait) => Admission::Wait(wait),
            None => Admission::Ready,
        }
    }

    /// Remaining spacing wait, or `None` when a dispatch may start now.
    pub fn time_until_available(&self, now: Instant) -> Option<Duration> {
        let last = self.last_dispatch?;
        let elapsed = now.saturating_duration_since(last);

        if elapsed >= self.spacing {
            None
        } else {
            Some(self.spacing - elapsed)
        }
    }

    /// Record a dispatch start. Callers must have seen [`Admission::Ready`].
    pub fn acquire(&mut self, now: Instant) {
        debug_assert!(self.active_count < self.max_concurrent);
        self.active_count += 1;
        self.last_dispatch = Some(now);
    }

    pub fn release(&mut self) {
        self.active_count = self.active_count.saturating_sub(1);
    }

    pub fn active_count(&self) -> usize {
        self.active_count
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

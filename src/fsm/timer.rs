//! One-shot deadline timers polled from `on_run`.
//!
//! The state behaviours run periodically anyway, so a timer is just a
//! deadline compared against the [`Clock`](crate::app::ports::Clock) on
//! every cycle.

/// A restartable one-shot deadline in clock milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OneShot {
    deadline_ms: Option<u64>,
}

impl OneShot {
    pub const fn new() -> Self {
        Self { deadline_ms: None }
    }

    /// Arm (or re-arm) the timer to fire `duration_ms` after `now_ms`.
    pub fn start(&mut self, now_ms: u64, duration_ms: u32) {
        self.deadline_ms = Some(now_ms.saturating_add(u64::from(duration_ms)));
    }

    pub fn stop(&mut self) {
        self.deadline_ms = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline_ms.is_some()
    }

    /// `true` once `now_ms` reaches the deadline.  A stopped timer never
    /// expires.
    pub fn expired(&self, now_ms: u64) -> bool {
        self.deadline_ms.is_some_and(|deadline| now_ms >= deadline)
    }
}

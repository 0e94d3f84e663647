//! Binary semaphore with a bounded wait.
//!
//! Gates "one outstanding acknowledged send".  `give` is called from the
//! radio stack's callback context, `take` from the lifecycle thread.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub struct BinarySemaphore {
    available: Mutex<bool>,
    signal: Condvar,
}

impl BinarySemaphore {
    pub const fn new(initially_available: bool) -> Self {
        Self {
            available: Mutex::new(initially_available),
            signal: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.available.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the permit and wake one waiter.  Giving an already
    /// available semaphore is a no-op.
    pub fn give(&self) {
        *self.lock() = true;
        self.signal.notify_one();
    }

    /// Wait up to `timeout` for the permit.  Returns `false` on timeout.
    pub fn take(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (mut available, _) = self
            .signal
            .wait_timeout_while(guard, timeout, |available| !*available)
            .unwrap_or_else(PoisonError::into_inner);
        if *available {
            *available = false;
            true
        } else {
            false
        }
    }

    /// Drop the permit without waiting.
    pub fn reset(&self) {
        *self.lock() = false;
    }

    pub fn is_available(&self) -> bool {
        *self.lock()
    }
}

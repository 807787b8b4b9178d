//! Single-batch execution guard.
//!
//! At most one batch executes at a time. A batch that arrives while another
//! is running is dropped, not queued.
//!
//! The guard is released by the reporter immediately *before* results are
//! posted to the agent. The agent may call back with the next batch before
//! the POST even returns; if the guard were still held at that point the
//! follow-up would be dropped and the conversation would stall.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Busy flag for one conversation.
#[derive(Debug, Default)]
pub struct ExecutionGuard {
    busy: AtomicBool,
}

impl ExecutionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip Idle to Busy. Returns `None` if a batch is already running.
    pub fn try_begin(self: &Arc<Self>) -> Option<BusyPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(BusyPermit {
            guard: Arc::clone(self),
        })
    }

    /// Whether a batch currently holds the guard.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof that the holder owns the guard. Dropping it returns the guard to
/// Idle, including during unwinding.
#[derive(Debug)]
#[must_use = "dropping the permit releases the execution guard"]
pub struct BusyPermit {
    guard: Arc<ExecutionGuard>,
}

impl BusyPermit {
    /// Release the guard now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for BusyPermit {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_begin_is_rejected() {
        let guard = Arc::new(ExecutionGuard::new());

        let permit = guard.try_begin().unwrap();
        assert!(guard.is_busy());
        assert!(guard.try_begin().is_none());

        permit.release();
        assert!(!guard.is_busy());
        assert!(guard.try_begin().is_some());
    }

    #[test]
    fn test_permit_released_on_panic() {
        let guard = Arc::new(ExecutionGuard::new());
        let cloned = Arc::clone(&guard);

        let result = std::panic::catch_unwind(move || {
            let _permit = cloned.try_begin().unwrap();
            panic!("command blew up");
        });

        assert!(result.is_err());
        assert!(!guard.is_busy());
    }
}

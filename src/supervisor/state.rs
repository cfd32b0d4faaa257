//! State shared between the health monitor and manual supervisor operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Consecutive-failure counter and the "manual operation in flight" flag.
///
/// Shared by `Arc` between the monitor task and every operation handler.
/// The flag is advisory: it keeps the monitor from probing while an
/// operator-triggered start/stop/restart runs, it does not serialize
/// operations against each other.
#[derive(Debug, Default)]
pub struct SharedState {
    failures: AtomicU32,
    manual_ops: AtomicUsize,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Increment the failure counter and return the new value.
    pub fn record_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Reset the counter; returns the previous value.
    pub fn reset_failures(&self) -> u32 {
        self.failures.swap(0, Ordering::SeqCst)
    }

    /// True while any manual operation holds a [`ManualOpGuard`].
    pub fn manual_op_in_flight(&self) -> bool {
        self.manual_ops.load(Ordering::SeqCst) > 0
    }

    /// Mark a manual operation as in flight until the guard drops.
    pub fn begin_manual_op(self: &Arc<Self>) -> ManualOpGuard {
        self.manual_ops.fetch_add(1, Ordering::SeqCst);
        ManualOpGuard {
            state: Arc::clone(self),
        }
    }
}

/// Clears the in-flight mark on drop, including on early return and panic.
#[derive(Debug)]
pub struct ManualOpGuard {
    state: Arc<SharedState>,
}

impl Drop for ManualOpGuard {
    fn drop(&mut self) {
        self.state.manual_ops.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_counter() {
        let state = SharedState::new();
        assert_eq!(state.record_failure(), 1);
        assert_eq!(state.record_failure(), 2);
        assert_eq!(state.reset_failures(), 2);
        assert_eq!(state.failures(), 0);
    }

    #[test]
    fn test_guard_clears_flag_on_drop() {
        let state = SharedState::new();
        assert!(!state.manual_op_in_flight());
        {
            let _guard = state.begin_manual_op();
            assert!(state.manual_op_in_flight());
        }
        assert!(!state.manual_op_in_flight());
    }

    #[test]
    fn test_overlapping_guards_keep_flag_set() {
        let state = SharedState::new();
        let first = state.begin_manual_op();
        let second = state.begin_manual_op();
        drop(first);
        assert!(state.manual_op_in_flight());
        drop(second);
        assert!(!state.manual_op_in_flight());
    }

    #[test]
    fn test_guard_clears_flag_on_panic() {
        let state = SharedState::new();
        let cloned = Arc::clone(&state);
        let result = std::panic::catch_unwind(move || {
            let _guard = cloned.begin_manual_op();
            panic!("operation blew up");
        });
        assert!(result.is_err());
        assert!(!state.manual_op_in_flight());
    }
}

// interrupt.rs - cooperative operator-interrupt flag
//
// The CLI registers a SIGINT hook that calls `request_stop()`; tasks call
// `check_interrupted()` between batches. An interrupted run aborts with a
// non-zero exit and leaves any in-flight batch as-is - the verify step of
// the migration engine is how an operator surfaces the resulting mixed
// state on the next run.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, StoreError};

/// A stop request. The process-wide instance is [`struct@STOP`]; tests
/// exercise the semantics on their own instances so they never race
/// tasks polling the global one.
pub struct StopFlag(AtomicBool);

impl StopFlag {
    pub const fn new() -> Self {
        StopFlag(AtomicBool::new(false))
    }

    /// Signal-safe: only stores an atomic flag.
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Abort the current task if a stop was requested.
    pub fn check(&self) -> Result<()> {
        if self.stop_requested() {
            Err(StoreError::Interrupted)
        } else {
            Ok(())
        }
    }
}

impl Default for StopFlag {
    fn default() -> Self {
        StopFlag::new()
    }
}

/// The flag the signal hook sets and every task polls.
pub static STOP: StopFlag = StopFlag::new();

pub fn request_stop() {
    STOP.request_stop()
}

pub fn stop_requested() -> bool {
    STOP.stop_requested()
}

/// Clear the flag (fresh CLI runs).
pub fn reset() {
    STOP.reset()
}

/// Abort the current task if the operator asked us to stop.
pub fn check_interrupted() -> Result<()> {
    STOP.check()
}

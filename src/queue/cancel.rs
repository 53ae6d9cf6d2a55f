//! Stop signal shared by an `OperationQueue` and its worker task

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set once by `shutdown` (or drop); read by `submit` and by the worker
/// after each drain. Jobs already pending when it is set still run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    stopped: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Returns true only for the call that actually stopped the queue
    pub fn cancel(&self) -> bool {
        !self.stopped.swap(true, Ordering::AcqRel)
    }
}

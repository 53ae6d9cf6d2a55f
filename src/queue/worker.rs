//! The operation queue and its serialized worker
//!
//! Submissions return an operation id immediately. A single tokio task owns
//! the [`TransactionExecutor`] and drains every pending job on a fixed tick,
//! so at most one transaction builds or commits at a time.

use super::cancel::CancellationToken;
use super::operation::{
    new_operation_id, Operation, OperationKind, OperationList, OperationStatus, TransitionError,
};
use crate::change::Change;
use crate::model::ModelEngine;
use crate::transaction::{ApplyError, LayoutEngine, OpResult, TransactionExecutor, DEFAULT_UNDO_DEPTH};
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("submission contains no changes")]
    EmptySubmission,

    #[error("operation queue has been shut down")]
    ShutDown,

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl QueueError {
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::EmptySubmission => "EMPTY_SUBMISSION",
            QueueError::ShutDown => "QUEUE_SHUT_DOWN",
            QueueError::Transition(_) => "INVALID_TRANSITION",
        }
    }
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Queue tuning
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How often the worker drains pending jobs
    pub tick: Duration,
    /// Retained operations before terminal ones are evicted
    pub history_capacity: usize,
    pub undo_depth: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(50),
            history_capacity: 500,
            undo_depth: DEFAULT_UNDO_DEPTH,
        }
    }
}

/// Work the worker knows how to run
#[derive(Debug, Clone)]
pub enum Job {
    Apply {
        changes: Vec<Change>,
        bindings: HashMap<String, String>,
    },
    Undo,
    Redo,
}

impl Job {
    fn kind(&self) -> OperationKind {
        match self {
            Job::Apply { .. } => OperationKind::Apply,
            Job::Undo => OperationKind::Undo,
            Job::Redo => OperationKind::Redo,
        }
    }

    fn change_count(&self) -> usize {
        match self {
            Job::Apply { changes, .. } => changes.len(),
            Job::Undo | Job::Redo => 0,
        }
    }
}

struct Pending {
    id: String,
    job: Job,
}

struct Shared {
    operations: DashMap<String, Operation>,
    /// Retained operation ids, oldest first
    history: Mutex<VecDeque<String>>,
    pending: Mutex<VecDeque<Pending>>,
    history_capacity: usize,
    cancel: CancellationToken,
}

impl Shared {
    fn next_pending(&self) -> Option<Pending> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Drop the oldest terminal operations until within capacity.
    /// Queued and processing operations are never evicted.
    fn evict(&self) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let mut excess = history.len().saturating_sub(self.history_capacity);
        if excess == 0 {
            return;
        }
        history.retain(|id| {
            if excess == 0 {
                return true;
            }
            let terminal = self
                .operations
                .get(id)
                .map(|op| op.status.is_terminal())
                .unwrap_or(true);
            if terminal {
                self.operations.remove(id);
                excess -= 1;
                false
            } else {
                true
            }
        });
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut Operation) -> Result<(), TransitionError>) {
        if let Some(mut op) = self.operations.get_mut(id) {
            if let Err(e) = f(&mut op) {
                warn!(operation_id = id, error = %e, "operation status not updated");
            }
        }
    }

    /// Run every job that is pending right now, in submission order
    fn drain(&self, executor: &mut TransactionExecutor) {
        while let Some(Pending { id, job }) = self.next_pending() {
            self.update(&id, Operation::start);
            debug!(operation_id = %id, changes = job.change_count(), "operation started");

            let outcome: Result<Vec<OpResult>, ApplyError> = match &job {
                Job::Apply { changes, bindings } => executor.apply(&id, changes, bindings),
                Job::Undo => executor.undo(),
                Job::Redo => executor.redo(),
            };

            match outcome {
                Ok(results) => {
                    info!(operation_id = %id, results = results.len(), "operation complete");
                    self.update(&id, |op| op.complete(results));
                }
                Err(e) => {
                    warn!(operation_id = %id, code = e.code(), error = %e, "operation failed");
                    self.update(&id, |op| op.fail(&e));
                }
            }
        }
        self.evict();
    }
}

/// Accepts chunks and runs them one at a time on a background task
pub struct OperationQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl OperationQueue {
    /// Start the queue and its worker task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(engine: Arc<ModelEngine>, layout: Arc<dyn LayoutEngine>, config: QueueConfig) -> Self {
        let shared = Arc::new(Shared {
            operations: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            pending: Mutex::new(VecDeque::new()),
            history_capacity: config.history_capacity.max(1),
            cancel: CancellationToken::new(),
        });

        let mut executor = TransactionExecutor::new(engine, layout, config.undo_depth);
        let worker_state = shared.clone();
        let tick = config.tick;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                // read before draining so a job queued ahead of the stop is not left behind
                let stopping = worker_state.cancel.is_cancelled();
                worker_state.drain(&mut executor);
                if stopping {
                    break;
                }
            }
            debug!("operation queue worker stopped");
        });

        Self {
            shared,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Queue a job and return its operation id without waiting
    pub fn submit(&self, job: Job) -> QueueResult<String> {
        if self.shared.cancel.is_cancelled() {
            return Err(QueueError::ShutDown);
        }
        if matches!(&job, Job::Apply { changes, .. } if changes.is_empty()) {
            return Err(QueueError::EmptySubmission);
        }

        let id = new_operation_id();
        let operation = Operation::new(id.clone(), job.kind(), job.change_count());
        info!(operation_id = %id, changes = operation.change_count, "operation queued");

        self.shared.operations.insert(id.clone(), operation);
        self.shared
            .history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(id.clone());
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Pending {
                id: id.clone(),
                job,
            });
        self.shared.evict();
        Ok(id)
    }

    /// Current state of an operation, or None if unknown or evicted
    pub fn status(&self, id: &str) -> Option<Operation> {
        self.shared.operations.get(id).map(|op| op.clone())
    }

    /// Retained operations, newest first, optionally filtered by status
    pub fn list(&self, filter: Option<OperationStatus>, limit: usize) -> OperationList {
        let history = self.shared.history.lock().unwrap_or_else(|e| e.into_inner());
        let matching: Vec<_> = history
            .iter()
            .rev()
            .filter_map(|id| self.shared.operations.get(id).map(|op| op.summary()))
            .filter(|op| filter.map_or(true, |status| op.status == status))
            .collect();
        let total = matching.len();
        OperationList {
            operations: matching.into_iter().take(limit).collect(),
            total,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Stop accepting submissions, let already queued jobs finish, and wait
    /// for the worker to exit.
    pub async fn shutdown(&self) {
        if self.shared.cancel.cancel() {
            info!(pending = self.pending_len(), "operation queue shutting down");
        }
        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "operation queue worker ended abnormally");
            }
        }
    }
}

impl Drop for OperationQueue {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

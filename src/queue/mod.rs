//! Asynchronous operation queue: one serialized worker, a status table,
//! and a bounded history

mod cancel;
mod operation;
mod worker;

pub use cancel::CancellationToken;
pub use operation::{
    new_operation_id, Operation, OperationKind, OperationList, OperationStatus, OperationSummary,
    TransitionError,
};
pub use worker::{Job, OperationQueue, QueueConfig, QueueError, QueueResult};

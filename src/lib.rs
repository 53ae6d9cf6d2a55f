//! archbatch: batched, atomic change sets for typed architecture models
//!
//! Callers mutate a model of typed elements, relationships, folders and
//! views through named change requests. A request is validated, built into
//! one reversible transaction, and committed atomically by a serialized
//! operation queue. The client side splits large documents into chunks,
//! resolves tempIds across chunks and runs, and recovers from partial
//! failure.
//!
//! # Layers
//!
//! - [`model`]: the live model, its arena indexes and the read-only snapshot
//! - [`change`]: the `Change` union and the validator
//! - [`transaction`]: two-pass builder, command steps, commit, undo
//! - [`queue`]: operation queue and status machine
//! - [`api`]: `ChangeApi`, the transport-independent entry point
//! - [`client`]: documents, chunking and the orchestrator
//!
//! # Example
//!
//! ```no_run
//! use archbatch::{ChangeApi, ModelEngine, QueueConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let api = ChangeApi::start(Arc::new(ModelEngine::new()), QueueConfig::default());
//! let receipt = api.submit_json(&[
//!     json!({"op": "createElement", "type": "business-actor", "name": "Customer", "tempId": "c"}),
//! ])?;
//! let status = api.status(&receipt.operation_id);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod change;
pub mod client;
pub mod model;
pub mod queue;
pub mod transaction;

pub use api::{ApiError, ApiResult, ChangeApi, SubmitReceipt};
pub use change::{BatchContext, Change, ChangeKind, ChangeValidator, ValidationError};
pub use model::{ModelEngine, ModelError, Snapshot, SnapshotProvider};
pub use queue::{Operation, OperationQueue, OperationStatus, QueueConfig};
pub use transaction::{ApplyError, ErrorDetail, OpResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

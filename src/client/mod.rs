//! Client-side chunking protocol
//!
//! Flattens change documents, resolves tempIds across chunks, files and
//! runs, and drives chunks through a [`ChangeTransport`] with polling,
//! retry, skip-existing and continue-on-error.

mod chunk;
mod config;
mod connections;
mod document;
mod idmap;
mod orchestrator;
mod recovery;
mod transport;

pub use chunk::{split_chunks, Chunk};
pub use config::{ConfigError, OrchestratorConfig, Profile};
pub use connections::{BatchIndex, ConnectionChecker, ConnectionError};
pub use document::{ChangeDocument, ChangeOrigin, DocumentError, DocumentResult, FlattenedDocument};
pub use idmap::TempIdMap;
pub use orchestrator::{
    op_histogram, parse_duplicate, ChunkOutcome, ChunkStatus, DuplicateNotice, IdFileProblem,
    Orchestrator, OrchestratorError, OrchestratorResult, Origin, PreparedRun, RunReport,
};
pub use recovery::RecoverySnapshot;
pub use transport::{submit_with_backoff, Backoff, ChangeTransport, LocalTransport, TransportError};

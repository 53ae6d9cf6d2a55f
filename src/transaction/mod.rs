//! Transactions: building a chunk into reversible commands and committing it

mod builder;
mod command;
mod error;
mod executor;
mod layout;
mod result;
mod undo;

pub use builder::{TransactionBuilder, TransactionUnit};
pub use command::{apply_all, revert_all, Command};
pub use error::{ApplyError, BuildError, ErrorDetail, ExecutionError};
pub use executor::TransactionExecutor;
pub use layout::{GridLayout, LayoutEngine, LayoutError, DEFAULT_SPACING};
pub use result::OpResult;
pub use undo::{UndoLog, UndoOutcome, DEFAULT_UNDO_DEPTH};

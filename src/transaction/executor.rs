//! Validate, build, commit: the full life of one chunk against the live model

use super::builder::TransactionBuilder;
use super::error::ApplyError;
use super::layout::LayoutEngine;
use super::result::OpResult;
use super::undo::{UndoLog, UndoOutcome};
use crate::change::{BatchContext, Change, ChangeValidator};
use crate::model::{ModelEngine, SnapshotProvider};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Applies chunks to the engine's model one at a time
///
/// Owned by the operation queue's worker, which is the only caller, so
/// builds and commits never overlap.
pub struct TransactionExecutor {
    engine: Arc<ModelEngine>,
    validator: ChangeValidator,
    layout: Arc<dyn LayoutEngine>,
    undo: UndoLog,
}

impl TransactionExecutor {
    pub fn new(engine: Arc<ModelEngine>, layout: Arc<dyn LayoutEngine>, undo_depth: usize) -> Self {
        Self {
            engine,
            validator: ChangeValidator::server(),
            layout,
            undo: UndoLog::new(undo_depth),
        }
    }

    /// Validate `changes`, build them on a scratch copy, then commit in one
    /// step. Any error leaves the model untouched.
    ///
    /// `known` carries tempId bindings from earlier chunks for callers that
    /// do not substitute them themselves.
    pub fn apply(
        &mut self,
        label: &str,
        changes: &[Change],
        known: &HashMap<String, String>,
    ) -> Result<Vec<OpResult>, ApplyError> {
        let changes = substitute_known(changes, known);
        let snapshot = self.engine.snapshot();
        let mut batch = BatchContext::new();
        self.validator.validate(&changes, &snapshot, &mut batch)?;

        let layout = self.layout.as_ref();
        let unit = self
            .engine
            .read(|model| TransactionBuilder::new(model, known, layout).build(&changes))?;
        debug!(
            operation = label,
            commands = unit.commands().len(),
            undoable = unit.is_undoable(),
            "transaction built"
        );

        self.engine.with_model_mut(|model| unit.commit(model))?;
        self.engine.refresh_snapshot();

        let (commands, results, undoable) = unit.into_parts();
        self.undo.register(label, commands, undoable);
        Ok(results)
    }

    /// Reverse the most recent undoable unit
    pub fn undo(&mut self) -> Result<Vec<OpResult>, ApplyError> {
        let undo = &mut self.undo;
        let outcome = self.engine.with_model_mut(|model| undo.undo(model))?;
        self.engine.refresh_snapshot();
        Ok(vec![undo_result("undo", outcome)])
    }

    /// Re-apply the most recently undone unit
    pub fn redo(&mut self) -> Result<Vec<OpResult>, ApplyError> {
        let undo = &mut self.undo;
        let outcome = self.engine.with_model_mut(|model| undo.redo(model))?;
        self.engine.refresh_snapshot();
        Ok(vec![undo_result("redo", outcome)])
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }
}

/// Replace references bound in `known` so duplicate checks compare real
/// ids. Tokens declared in this chunk keep their chunk-local meaning.
fn substitute_known(changes: &[Change], known: &HashMap<String, String>) -> Vec<Change> {
    if known.is_empty() {
        return changes.to_vec();
    }
    let declared: HashSet<&str> = changes.iter().filter_map(Change::temp_id).collect();
    changes
        .iter()
        .map(|change| {
            let mut change = change.clone();
            change.rewrite_references(|token| {
                if declared.contains(token) {
                    None
                } else {
                    known.get(token).cloned()
                }
            });
            change
        })
        .collect()
}

fn undo_result(op: &str, outcome: UndoOutcome) -> OpResult {
    OpResult::named(op)
        .field("operationId", outcome.label)
        .field("steps", outcome.steps)
}

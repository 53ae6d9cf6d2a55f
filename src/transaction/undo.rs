//! Bounded undo/redo history of committed transaction units

use super::command::{apply_all, revert_all, Command};
use super::error::{ApplyError, ExecutionError};
use crate::model::Model;
use std::collections::VecDeque;

pub const DEFAULT_UNDO_DEPTH: usize = 100;

#[derive(Debug, Clone)]
struct UndoEntry {
    label: String,
    commands: Vec<Command>,
}

/// What an undo or redo reversed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoOutcome {
    pub label: String,
    pub steps: usize,
}

/// One entry per committed unit, so a whole chunk is reversed in one action
#[derive(Debug)]
pub struct UndoLog {
    capacity: usize,
    undo: VecDeque<UndoEntry>,
    redo: Vec<UndoEntry>,
}

impl UndoLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            undo: VecDeque::new(),
            redo: Vec::new(),
        }
    }

    /// Record a committed unit.
    ///
    /// A unit that is not undoable (it contains a cascading delete) is not
    /// recorded, and it clears the whole history: earlier entries may refer
    /// to records the cascade removed.
    pub fn register(&mut self, label: impl Into<String>, commands: Vec<Command>, undoable: bool) {
        self.redo.clear();
        if !undoable {
            self.undo.clear();
            return;
        }
        if commands.is_empty() {
            return;
        }
        self.undo.push_back(UndoEntry {
            label: label.into(),
            commands,
        });
        while self.undo.len() > self.capacity {
            self.undo.pop_front();
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    /// Reverse the most recent unit
    pub fn undo(&mut self, model: &mut Model) -> Result<UndoOutcome, ApplyError> {
        let entry = self.undo.pop_back().ok_or(ApplyError::NothingToUndo)?;
        if let Err((step, source)) = revert_all(&entry.commands, model) {
            let command = entry.commands[entry.commands.len() - 1 - step].label();
            self.undo.push_back(entry);
            return Err(ExecutionError {
                step,
                command,
                source,
            }
            .into());
        }
        let outcome = UndoOutcome {
            label: entry.label.clone(),
            steps: entry.commands.len(),
        };
        self.redo.push(entry);
        Ok(outcome)
    }

    /// Re-apply the most recently undone unit
    pub fn redo(&mut self, model: &mut Model) -> Result<UndoOutcome, ApplyError> {
        let entry = self.redo.pop().ok_or(ApplyError::NothingToRedo)?;
        if let Err((step, source)) = apply_all(&entry.commands, model) {
            let command = entry.commands[step].label();
            self.redo.push(entry);
            return Err(ExecutionError {
                step,
                command,
                source,
            }
            .into());
        }
        let outcome = UndoOutcome {
            label: entry.label.clone(),
            steps: entry.commands.len(),
        };
        self.undo.push_back(entry);
        Ok(outcome)
    }
}

impl Default for UndoLog {
    fn default() -> Self {
        Self::new(DEFAULT_UNDO_DEPTH)
    }
}

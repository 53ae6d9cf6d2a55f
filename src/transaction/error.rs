//! Errors raised while building, committing or undoing a transaction

use crate::change::ValidationError;
use crate::model::ModelError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A change could not be turned into commands. The live model is untouched.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Change {index} ({op}): unresolved reference '{value}' in field '{field}'")]
    UnresolvedReference {
        index: usize,
        op: String,
        field: String,
        value: String,
    },

    #[error(
        "Change {index} ({op}): connection endpoints are swapped for relationship {relationship}; \
         sourceVisualId shows its target and targetVisualId shows its source"
    )]
    DirectionSwap {
        index: usize,
        op: String,
        relationship: String,
        source_visual: String,
        target_visual: String,
    },

    #[error(
        "Change {index} ({op}): connection endpoints do not match relationship {relationship} \
         (expected {expected}, found {found})"
    )]
    DirectionMismatch {
        index: usize,
        op: String,
        relationship: String,
        expected: String,
        found: String,
    },

    #[error("Change {index} ({op}): {message}")]
    InvalidTarget {
        index: usize,
        op: String,
        field: String,
        value: String,
        message: String,
    },

    #[error("Change {index} ({op}): {message}")]
    InvalidValue {
        index: usize,
        op: String,
        field: String,
        value: String,
        message: String,
    },

    #[error("Change {index} ({op}): {source}")]
    Model {
        index: usize,
        op: String,
        #[source]
        source: ModelError,
    },
}

impl BuildError {
    pub fn code(&self) -> &'static str {
        match self {
            BuildError::UnresolvedReference { .. } => "UNRESOLVED_REFERENCE",
            BuildError::DirectionSwap { .. } => "DIRECTION_SWAP",
            BuildError::DirectionMismatch { .. } => "DIRECTION_MISMATCH",
            BuildError::InvalidTarget { .. } => "INVALID_TARGET",
            BuildError::InvalidValue { .. } | BuildError::Model { .. } => "VALIDATION",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            BuildError::UnresolvedReference { index, .. }
            | BuildError::DirectionSwap { index, .. }
            | BuildError::DirectionMismatch { index, .. }
            | BuildError::InvalidTarget { index, .. }
            | BuildError::InvalidValue { index, .. }
            | BuildError::Model { index, .. } => *index,
        }
    }

    pub fn op(&self) -> &str {
        match self {
            BuildError::UnresolvedReference { op, .. }
            | BuildError::DirectionSwap { op, .. }
            | BuildError::DirectionMismatch { op, .. }
            | BuildError::InvalidTarget { op, .. }
            | BuildError::InvalidValue { op, .. }
            | BuildError::Model { op, .. } => op,
        }
    }

    pub fn detail(&self) -> ErrorDetail {
        let mut detail = ErrorDetail::new(self.code())
            .at(self.index(), self.op());
        match self {
            BuildError::UnresolvedReference { field, value, .. } => {
                detail.field = Some(field.clone());
                detail.offending_value = Some(value.clone());
                detail.hint = Some(
                    "declare the tempId in an earlier change, load it from an idFile, or use a real id"
                        .to_string(),
                );
            }
            BuildError::DirectionSwap {
                source_visual,
                target_visual,
                ..
            } => {
                detail.field = Some("sourceVisualId".to_string());
                detail.offending_value = Some(source_visual.clone());
                detail.hint = Some(format!(
                    "swap the endpoints: sourceVisualId={}, targetVisualId={}",
                    target_visual, source_visual
                ));
            }
            BuildError::DirectionMismatch { found, .. } => {
                detail.field = Some("sourceVisualId".to_string());
                detail.offending_value = Some(found.clone());
                detail.hint = Some(
                    "use visuals that show the relationship's own source and target".to_string(),
                );
            }
            BuildError::InvalidTarget { field, value, .. }
            | BuildError::InvalidValue { field, value, .. } => {
                detail.field = Some(field.clone());
                detail.offending_value = Some(value.clone());
            }
            BuildError::Model { .. } => {}
        }
        detail
    }
}

/// Commit failed part-way. Steps already applied have been reverted.
#[derive(Debug, Error)]
#[error("transaction failed at step {step} ({command}): {source}")]
pub struct ExecutionError {
    pub step: usize,
    pub command: &'static str,
    #[source]
    pub source: ModelError,
}

/// Any failure of a queued job
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("nothing to undo")]
    NothingToUndo,

    #[error("nothing to redo")]
    NothingToRedo,
}

impl ApplyError {
    pub fn code(&self) -> &'static str {
        match self {
            ApplyError::Validation(e) => e.code(),
            ApplyError::Build(e) => e.code(),
            ApplyError::Execution(_) => "EXECUTION",
            ApplyError::NothingToUndo | ApplyError::NothingToRedo => "UNDO",
        }
    }

    /// Structured context for programmatic recovery
    pub fn detail(&self) -> ErrorDetail {
        match self {
            ApplyError::Validation(e) => ErrorDetail {
                code: e.code().to_string(),
                op_number: Some(e.index),
                op: Some(e.op.clone()),
                field: e.field.clone(),
                offending_value: e.value.clone(),
                hint: e.hint.clone(),
                existing_id: e.existing_id.clone(),
            },
            ApplyError::Build(e) => e.detail(),
            ApplyError::Execution(e) => {
                let mut detail = ErrorDetail::new(self.code());
                detail.hint = Some(format!("commit step {} ({}) failed", e.step, e.command));
                detail
            }
            ApplyError::NothingToUndo | ApplyError::NothingToRedo => ErrorDetail::new(self.code()),
        }
    }
}

/// Machine-readable failure context carried on an errored operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: String,
    /// 0-based index of the failing change within its chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_number: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offending_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_id: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            op_number: None,
            op: None,
            field: None,
            offending_value: None,
            hint: None,
            existing_id: None,
        }
    }

    fn at(mut self, index: usize, op: &str) -> Self {
        self.op_number = Some(index);
        self.op = Some(op.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ValidationErrorKind;

    #[test]
    fn duplicate_detail_carries_existing_id() {
        let err: ApplyError = ValidationError::new(2, "createElement", ValidationErrorKind::Duplicate, "dup")
            .with_existing_id(Some("id-x".into()))
            .into();
        let detail = err.detail();
        assert_eq!(detail.code, "DUPLICATE");
        assert_eq!(detail.op_number, Some(2));
        assert_eq!(detail.existing_id.as_deref(), Some("id-x"));
    }

    #[test]
    fn swap_detail_suggests_the_reversed_pair() {
        let err = BuildError::DirectionSwap {
            index: 0,
            op: "addConnectionToView".into(),
            relationship: "id-r".into(),
            source_visual: "v-b".into(),
            target_visual: "v-a".into(),
        };
        assert_eq!(err.code(), "DIRECTION_SWAP");
        let hint = err.detail().hint.unwrap();
        assert!(hint.contains("sourceVisualId=v-a"));
    }
}

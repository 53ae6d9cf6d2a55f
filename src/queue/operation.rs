//! Operations: queued units of work and their status machine

use crate::transaction::{ApplyError, ErrorDetail, OpResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Generate an operation id (`op-` followed by a v4 uuid)
pub fn new_operation_id() -> String {
    format!("op-{}", Uuid::new_v4())
}

/// `queued → processing → complete | error`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Queued,
    Processing,
    Complete,
    Error,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Queued => "queued",
            OperationStatus::Processing => "processing",
            OperationStatus::Complete => "complete",
            OperationStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Complete | OperationStatus::Error)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(OperationStatus::Queued),
            "processing" => Ok(OperationStatus::Processing),
            "complete" => Ok(OperationStatus::Complete),
            "error" => Ok(OperationStatus::Error),
            other => Err(format!("unknown operation status: '{}'", other)),
        }
    }
}

/// What an operation does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Apply,
    Undo,
    Redo,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("operation {id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub id: String,
    pub from: OperationStatus,
    pub to: OperationStatus,
}

/// A queued unit of work and everything known about its outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub change_count: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Per-change results, in chunk order, once complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<OpResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,
}

impl Operation {
    pub fn new(id: impl Into<String>, kind: OperationKind, change_count: usize) -> Self {
        Self {
            id: id.into(),
            kind,
            status: OperationStatus::Queued,
            change_count,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            error_detail: None,
        }
    }

    fn transition(&mut self, to: OperationStatus) -> Result<(), TransitionError> {
        let allowed = matches!(
            (self.status, to),
            (OperationStatus::Queued, OperationStatus::Processing)
                | (OperationStatus::Processing, OperationStatus::Complete)
                | (OperationStatus::Processing, OperationStatus::Error)
        );
        if !allowed {
            return Err(TransitionError {
                id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(OperationStatus::Processing)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self, results: Vec<OpResult>) -> Result<(), TransitionError> {
        self.transition(OperationStatus::Complete)?;
        self.completed_at = Some(Utc::now());
        self.result = Some(results);
        Ok(())
    }

    pub fn fail(&mut self, error: &ApplyError) -> Result<(), TransitionError> {
        self.transition(OperationStatus::Error)?;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.to_string());
        self.error_detail = Some(error.detail());
        Ok(())
    }

    pub fn summary(&self) -> OperationSummary {
        OperationSummary {
            id: self.id.clone(),
            kind: self.kind,
            status: self.status,
            change_count: self.change_count,
            created_at: self.created_at,
            completed_at: self.completed_at,
            error: self.error.clone(),
        }
    }
}

/// Listing entry: an operation without its result payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSummary {
    pub id: String,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub change_count: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Answer to a listing query. `total` counts matches before the limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationList {
    pub operations: Vec<OperationSummary>,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_ids_are_prefixed() {
        let id = new_operation_id();
        assert!(id.starts_with("op-"));
        assert_eq!(id.len(), 3 + 36);
    }

    #[test]
    fn status_moves_forward_only() {
        let mut op = Operation::new("op-1", OperationKind::Apply, 3);
        assert!(op.complete(vec![]).is_err());

        op.start().unwrap();
        assert!(op.started_at.is_some());
        op.complete(vec![]).unwrap();
        assert_eq!(op.status, OperationStatus::Complete);

        let err = op.fail(&ApplyError::NothingToUndo).unwrap_err();
        assert_eq!(err.from, OperationStatus::Complete);
        assert_eq!(op.status, OperationStatus::Complete);
        assert!(op.error.is_none());
    }

    #[test]
    fn failed_operation_records_detail() {
        let mut op = Operation::new("op-1", OperationKind::Undo, 0);
        op.start().unwrap();
        op.fail(&ApplyError::NothingToUndo).unwrap();
        assert_eq!(op.error.as_deref(), Some("nothing to undo"));
        assert_eq!(op.error_detail.unwrap().code, "UNDO");
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_value(OperationStatus::Processing).unwrap();
        assert_eq!(json, "processing");
        assert_eq!("error".parse::<OperationStatus>().unwrap(), OperationStatus::Error);
    }
}

//! Diagnostics captured when a run stops on a failed chunk

use crate::model::ModelSummary;
use crate::transaction::ErrorDetail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Best-effort picture of where a run stopped, for building a corrective
/// batch instead of replaying the whole document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverySnapshot {
    pub captured_at: DateTime<Utc>,
    pub failed_chunk: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    /// Flattened-document position of the change the server blamed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_change: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,
    /// None when the model could not be reached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_summary: Option<ModelSummary>,
    pub chunks_completed: usize,
    pub chunks_total: usize,
    pub bound_temp_ids: usize,
    /// tempIds declared in the document that never received an id
    pub unbound_temp_ids: Vec<String>,
    pub diagnostics: Vec<String>,
}

impl RecoverySnapshot {
    pub fn new(failed_chunk: usize, chunks_total: usize) -> Self {
        Self {
            captured_at: Utc::now(),
            failed_chunk,
            operation_id: None,
            failed_change: None,
            error_detail: None,
            model_summary: None,
            chunks_completed: 0,
            chunks_total,
            bound_temp_ids: 0,
            unbound_temp_ids: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn diagnostic(&mut self, message: impl Into<String>) {
        self.diagnostics.push(message.into());
    }
}

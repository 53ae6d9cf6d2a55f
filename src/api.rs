//! Transport-independent API layer.
//!
//! `ChangeApi` is the single entry point for consumer-facing operations.
//! Transports (the local in-process transport, or a network server) call
//! `ChangeApi` methods; they never reach into the queue or the model engine
//! directly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::change::{Change, ValidationError};
use crate::model::{
    ConceptId, ConceptMatch, ModelEngine, ModelSummary, Snapshot, SnapshotProvider, VisualId,
};
use crate::queue::{
    Job, Operation, OperationList, OperationQueue, OperationStatus, QueueConfig, QueueError,
};
use crate::transaction::{GridLayout, LayoutEngine};

/// Answer to a submission: the operation to poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub operation_id: String,
    pub status: OperationStatus,
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// A raw change could not be parsed
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(e) => e.code(),
            ApiError::Queue(e) => e.code(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Single entry point for all consumer-facing operations.
#[derive(Clone)]
pub struct ChangeApi {
    engine: Arc<ModelEngine>,
    queue: Arc<OperationQueue>,
}

impl ChangeApi {
    pub fn new(engine: Arc<ModelEngine>, queue: Arc<OperationQueue>) -> Self {
        Self { engine, queue }
    }

    /// Start a queue over `engine` with the default grid layout.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(engine: Arc<ModelEngine>, config: QueueConfig) -> Self {
        Self::start_with_layout(engine, Arc::new(GridLayout::default()), config)
    }

    pub fn start_with_layout(
        engine: Arc<ModelEngine>,
        layout: Arc<dyn LayoutEngine>,
        config: QueueConfig,
    ) -> Self {
        let queue = Arc::new(OperationQueue::start(engine.clone(), layout, config));
        Self::new(engine, queue)
    }

    // --- Write ---

    /// Queue a chunk. Returns as soon as the operation is recorded.
    pub fn submit(&self, changes: Vec<Change>) -> ApiResult<SubmitReceipt> {
        self.submit_with_bindings(changes, HashMap::new())
    }

    /// Queue a chunk whose unsubstituted tempIds may be bound by `bindings`
    pub fn submit_with_bindings(
        &self,
        changes: Vec<Change>,
        bindings: HashMap<String, String>,
    ) -> ApiResult<SubmitReceipt> {
        let operation_id = self.queue.submit(Job::Apply { changes, bindings })?;
        Ok(queued(operation_id))
    }

    /// Parse raw JSON changes, then queue them.
    ///
    /// Parsing problems are reported synchronously with the change's index.
    pub fn submit_json(&self, raw: &[Value]) -> ApiResult<SubmitReceipt> {
        let changes = raw
            .iter()
            .enumerate()
            .map(|(index, value)| Change::from_value(index, value))
            .collect::<Result<Vec<_>, _>>()?;
        self.submit(changes)
    }

    /// Queue an undo of the most recent undoable operation
    pub fn undo(&self) -> ApiResult<SubmitReceipt> {
        Ok(queued(self.queue.submit(Job::Undo)?))
    }

    pub fn redo(&self) -> ApiResult<SubmitReceipt> {
        Ok(queued(self.queue.submit(Job::Redo)?))
    }

    // --- Operations ---

    pub fn status(&self, operation_id: &str) -> Option<Operation> {
        self.queue.status(operation_id)
    }

    pub fn list_operations(&self, filter: Option<OperationStatus>, limit: usize) -> OperationList {
        self.queue.list(filter, limit)
    }

    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }

    // --- Read ---

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.engine.snapshot()
    }

    /// Attached concepts whose name matches exactly
    pub fn find_concepts_by_name(&self, name: &str) -> Vec<ConceptMatch> {
        self.engine.read(|m| m.find_by_name(name))
    }

    /// The subset of `ids` that name a record in any namespace
    pub fn existing_ids(&self, ids: &[String]) -> HashSet<String> {
        self.engine.read(|m| {
            ids.iter()
                .filter(|id| m.contains_id(id))
                .cloned()
                .collect()
        })
    }

    /// `(source, target)` of a relationship
    pub fn relationship_endpoints(&self, relationship_id: &str) -> Option<(String, String)> {
        self.engine.read(|m| {
            m.relationship(&ConceptId::from(relationship_id))
                .map(|r| (r.source.to_string(), r.target.to_string()))
        })
    }

    /// The concept a diagram object depicts
    pub fn visual_concept(&self, visual_id: &str) -> Option<String> {
        self.engine.read(|m| {
            m.object(&VisualId::from(visual_id))
                .and_then(|o| o.concept())
                .map(|c| c.to_string())
        })
    }

    pub fn model_summary(&self) -> ModelSummary {
        self.engine.read(|m| m.summary())
    }
}

fn queued(operation_id: String) -> SubmitReceipt {
    SubmitReceipt {
        operation_id,
        status: OperationStatus::Queued,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn setup() -> ChangeApi {
        let engine = Arc::new(ModelEngine::new());
        ChangeApi::start(
            engine,
            QueueConfig {
                tick: Duration::from_millis(5),
                ..QueueConfig::default()
            },
        )
    }

    async fn finish(api: &ChangeApi, id: &str) -> Operation {
        for _ in 0..400 {
            match api.status(id) {
                Some(op) if op.status.is_terminal() => return op,
                _ => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
        panic!("operation {} did not finish", id);
    }

    // === Scenario: ChangeApi parses raw changes before queueing ===
    #[tokio::test]
    async fn submit_json_rejects_unknown_op_synchronously() {
        let api = setup();
        let err = api
            .submit_json(&[
                json!({"op": "createElement", "type": "goal", "name": "G"}),
                json!({"op": "explode"}),
            ])
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
        assert!(err.to_string().starts_with("Change 1 (explode)"));
        assert_eq!(api.list_operations(None, 10).total, 0);
    }

    // === Scenario: lookups see committed records ===
    #[tokio::test]
    async fn lookups_reflect_committed_chunk() {
        let api = setup();
        let receipt = api
            .submit_json(&[
                json!({"op": "createElement", "type": "business-actor", "name": "Clerk", "tempId": "a"}),
                json!({"op": "createElement", "type": "business-role", "name": "Desk", "tempId": "b"}),
                json!({"op": "createRelationship", "type": "assignment-relationship",
                       "sourceId": "a", "targetId": "b", "tempId": "r"}),
                json!({"op": "createView", "name": "Main", "tempId": "v"}),
                json!({"op": "addToView", "viewId": "v", "elementId": "a", "tempId": "va"}),
            ])
            .unwrap();
        assert_eq!(receipt.status, OperationStatus::Queued);

        let op = finish(&api, &receipt.operation_id).await;
        let results = op.result.unwrap();
        let real = |t: &str| {
            results
                .iter()
                .find_map(|r| r.binding().filter(|(temp, _)| *temp == t).map(|(_, id)| id.to_string()))
                .unwrap()
        };

        let found = api.find_concepts_by_name("Clerk");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id.as_str(), real("a"));

        assert_eq!(
            api.relationship_endpoints(&real("r")),
            Some((real("a"), real("b")))
        );
        assert_eq!(api.visual_concept(&real("va")), Some(real("a")));

        let existing = api.existing_ids(&[real("v"), "id-missing".to_string()]);
        assert!(existing.contains(&real("v")));
        assert_eq!(existing.len(), 1);

        assert_eq!(api.model_summary().elements, 2);
        assert_eq!(api.snapshot().relationships.len(), 1);
    }

    // === Scenario: bound tempIds cannot sneak a duplicate relationship past validation ===
    #[tokio::test]
    async fn bindings_are_applied_before_duplicate_checks() {
        let api = setup();
        let receipt = api
            .submit_json(&[
                json!({"op": "createElement", "type": "business-actor", "name": "A", "tempId": "a"}),
                json!({"op": "createElement", "type": "business-role", "name": "B", "tempId": "b"}),
                json!({"op": "createRelationship", "type": "assignment-relationship",
                       "sourceId": "a", "targetId": "b"}),
            ])
            .unwrap();
        let created = finish(&api, &receipt.operation_id).await.result.unwrap();
        let bindings: HashMap<String, String> = created
            .iter()
            .filter_map(|r| r.binding())
            .map(|(t, id)| (t.to_string(), id.to_string()))
            .collect();

        let again = Change::from_value(
            0,
            &json!({"op": "createRelationship", "type": "assignment-relationship",
                    "sourceId": "a", "targetId": "b"}),
        )
        .unwrap();
        let receipt = api.submit_with_bindings(vec![again], bindings).unwrap();
        let op = finish(&api, &receipt.operation_id).await;

        assert_eq!(op.status, OperationStatus::Error);
        assert_eq!(op.error_detail.unwrap().code, "DUPLICATE");
        assert_eq!(api.snapshot().relationships.len(), 1);
    }

    #[tokio::test]
    async fn undo_is_queued_like_any_operation() {
        let api = setup();
        let receipt = api.undo().unwrap();
        let op = finish(&api, &receipt.operation_id).await;
        assert_eq!(op.status, OperationStatus::Error);
        assert_eq!(op.error.as_deref(), Some("nothing to undo"));
    }
}

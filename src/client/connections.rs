//! Client-side cross-validation of view connections
//!
//! Before a chunk is submitted, each `addConnectionToView` is compared with
//! its relationship's endpoints. Missing visual ids are filled from the
//! batch's own `addToView` placements; a reversed pair is swapped with a
//! warning; unrelated endpoints stop the run before anything is sent.

use super::idmap::TempIdMap;
use super::transport::{ChangeTransport, TransportError};
use crate::change::Change;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(
        "Change {index} (addConnectionToView): visuals {source_visual} -> {target_visual} depict \
         {found_source} -> {found_target}, but relationship {relationship} runs \
         {expected_source} -> {expected_target}"
    )]
    Mismatch {
        index: usize,
        relationship: String,
        source_visual: String,
        target_visual: String,
        expected_source: String,
        expected_target: String,
        found_source: String,
        found_target: String,
    },

    #[error(
        "Change {index} (addConnectionToView): {field} not given and no placement of {concept} \
         in view {view} found in this batch"
    )]
    UnresolvedVisual {
        index: usize,
        field: &'static str,
        concept: String,
        view: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Relationship and placement facts declared by the batch itself, keyed by
/// the tokens the document uses
#[derive(Debug, Clone, Default)]
pub struct BatchIndex {
    /// relationship tempId → (source, target)
    relationships: HashMap<String, (String, String)>,
    /// visual tempId → (view, element)
    visuals: HashMap<String, (String, String)>,
    /// placement order, for the reverse concept → visual lookup
    placements: Vec<String>,
}

impl BatchIndex {
    pub fn from_changes(changes: &[Change]) -> Self {
        let mut index = BatchIndex::default();
        for change in changes {
            match change {
                Change::CreateRelationship(c) => {
                    if let Some(temp_id) = &c.temp_id {
                        index
                            .relationships
                            .insert(temp_id.clone(), (c.source_id.clone(), c.target_id.clone()));
                    }
                }
                Change::AddToView(c) => {
                    if let Some(temp_id) = &c.temp_id {
                        index
                            .visuals
                            .insert(temp_id.clone(), (c.view_id.clone(), c.element_id.clone()));
                        index.placements.push(temp_id.clone());
                    }
                }
                _ => {}
            }
        }
        index
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty() && self.visuals.is_empty()
    }
}

/// The batch index seen through the current tempId bindings
struct Resolved {
    relationships: HashMap<String, (String, String)>,
    visuals: HashMap<String, (String, String)>,
    /// (view, concept) → first visual placing that concept in that view
    reverse: HashMap<(String, String), String>,
}

/// Checks connections in one chunk against the batch and the live model
pub struct ConnectionChecker<'a> {
    index: &'a BatchIndex,
    ids: &'a TempIdMap,
    transport: &'a dyn ChangeTransport,
}

impl<'a> ConnectionChecker<'a> {
    pub fn new(index: &'a BatchIndex, ids: &'a TempIdMap, transport: &'a dyn ChangeTransport) -> Self {
        Self {
            index,
            ids,
            transport,
        }
    }

    fn norm(&self, token: &str) -> String {
        self.ids.resolve(token).unwrap_or_else(|| token.to_string())
    }

    fn resolved(&self) -> Resolved {
        let pair = |(a, b): &(String, String)| (self.norm(a), self.norm(b));
        let relationships = self
            .index
            .relationships
            .iter()
            .map(|(k, v)| (self.norm(k), pair(v)))
            .collect();
        let visuals: HashMap<String, (String, String)> = self
            .index
            .visuals
            .iter()
            .map(|(k, v)| (self.norm(k), pair(v)))
            .collect();
        let mut reverse = HashMap::new();
        for token in &self.index.placements {
            let visual = self.norm(token);
            if let Some(key) = visuals.get(&visual) {
                reverse.entry(key.clone()).or_insert(visual);
            }
        }
        Resolved {
            relationships,
            visuals,
            reverse,
        }
    }

    async fn endpoints(&self, resolved: &Resolved, relationship: &str) -> Result<Option<(String, String)>, TransportError> {
        if let Some(pair) = resolved.relationships.get(relationship) {
            return Ok(Some(pair.clone()));
        }
        self.transport.relationship_endpoints(relationship).await
    }

    async fn depicted(&self, resolved: &Resolved, visual: &str) -> Result<Option<String>, TransportError> {
        if let Some((_, concept)) = resolved.visuals.get(visual) {
            return Ok(Some(concept.clone()));
        }
        self.transport.visual_concept(visual).await
    }

    /// Check every `addConnectionToView` in `changes`, filling or swapping
    /// visual ids in place. Returns the warnings raised. `offset` is the
    /// position of `changes[0]` in the flattened document.
    pub async fn check(&self, changes: &mut [Change], offset: usize) -> Result<Vec<String>, ConnectionError> {
        let resolved = self.resolved();
        let mut warnings = Vec::new();

        for (i, change) in changes.iter_mut().enumerate() {
            let Change::AddConnectionToView(c) = change else {
                continue;
            };
            let index = offset + i;
            let relationship = self.norm(&c.relationship_id);
            let Some((source, target)) = self.endpoints(&resolved, &relationship).await? else {
                debug!(index, relationship = %relationship, "relationship endpoints unknown, left to server");
                continue;
            };
            let view = self.norm(&c.view_id);

            for (slot, concept, field) in [
                (&mut c.source_visual_id, &source, "sourceVisualId"),
                (&mut c.target_visual_id, &target, "targetVisualId"),
            ] {
                if slot.is_some() {
                    continue;
                }
                let visual = resolved
                    .reverse
                    .get(&(view.clone(), concept.clone()))
                    .ok_or_else(|| ConnectionError::UnresolvedVisual {
                        index,
                        field,
                        concept: concept.clone(),
                        view: view.clone(),
                    })?;
                debug!(index, field, visual = %visual, "visual id filled from batch placements");
                *slot = Some(visual.clone());
            }

            let (Some(source_visual), Some(target_visual)) =
                (c.source_visual_id.as_deref(), c.target_visual_id.as_deref())
            else {
                continue;
            };
            let source_visual = self.norm(source_visual);
            let target_visual = self.norm(target_visual);
            let found_source = self.depicted(&resolved, &source_visual).await?;
            let found_target = self.depicted(&resolved, &target_visual).await?;
            let (Some(found_source), Some(found_target)) = (found_source, found_target) else {
                continue;
            };

            if found_source == source && found_target == target {
                continue;
            }
            if found_source == target && found_target == source {
                std::mem::swap(&mut c.source_visual_id, &mut c.target_visual_id);
                let message = format!(
                    "Change {} (addConnectionToView): swapped sourceVisualId and targetVisualId to follow relationship {}",
                    index, relationship
                );
                warn!("{}", message);
                warnings.push(message);
                continue;
            }
            return Err(ConnectionError::Mismatch {
                index,
                relationship,
                source_visual,
                target_visual,
                expected_source: source,
                expected_target: target,
                found_source,
                found_target,
            });
        }
        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ChangeApi;
    use crate::client::transport::LocalTransport;
    use crate::model::ModelEngine;
    use crate::queue::QueueConfig;
    use serde_json::json;
    use std::sync::Arc;

    fn parse(values: serde_json::Value) -> Vec<Change> {
        values
            .as_array()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, v)| Change::from_value(i, v).unwrap())
            .collect()
    }

    fn batch() -> Vec<Change> {
        parse(json!([
            {"op": "createElement", "type": "business-actor", "name": "A", "tempId": "a"},
            {"op": "createElement", "type": "business-role", "name": "B", "tempId": "b"},
            {"op": "createElement", "type": "business-role", "name": "C", "tempId": "c"},
            {"op": "createRelationship", "type": "assignment-relationship", "sourceId": "a", "targetId": "b", "tempId": "r"},
            {"op": "createView", "name": "V", "tempId": "v"},
            {"op": "addToView", "viewId": "v", "elementId": "a", "tempId": "va"},
            {"op": "addToView", "viewId": "v", "elementId": "b", "tempId": "vb"},
            {"op": "addToView", "viewId": "v", "elementId": "c", "tempId": "vc"}
        ]))
    }

    fn transport() -> LocalTransport {
        LocalTransport::new(ChangeApi::start(Arc::new(ModelEngine::new()), QueueConfig::default()))
    }

    fn connection(source: Option<&str>, target: Option<&str>) -> Vec<Change> {
        let mut value = json!({"op": "addConnectionToView", "viewId": "v", "relationshipId": "r"});
        if let Some(s) = source {
            value["sourceVisualId"] = json!(s);
        }
        if let Some(t) = target {
            value["targetVisualId"] = json!(t);
        }
        vec![Change::from_value(0, &value).unwrap()]
    }

    fn visuals(change: &Change) -> (Option<String>, Option<String>) {
        match change {
            Change::AddConnectionToView(c) => (c.source_visual_id.clone(), c.target_visual_id.clone()),
            _ => panic!("not a connection"),
        }
    }

    // === Scenario: a reversed connection is swapped with a warning ===
    #[tokio::test]
    async fn reversed_connection_is_swapped() {
        let index = BatchIndex::from_changes(&batch());
        let ids = TempIdMap::new();
        let transport = transport();
        let checker = ConnectionChecker::new(&index, &ids, &transport);

        let mut chunk = connection(Some("vb"), Some("va"));
        let warnings = checker.check(&mut chunk, 8).await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Change 8 (addConnectionToView)"));
        assert_eq!(visuals(&chunk[0]), (Some("va".into()), Some("vb".into())));
    }

    // === Scenario: an unrelated endpoint stops the run ===
    #[tokio::test]
    async fn unrelated_endpoint_is_a_mismatch() {
        let index = BatchIndex::from_changes(&batch());
        let ids = TempIdMap::new();
        let transport = transport();
        let checker = ConnectionChecker::new(&index, &ids, &transport);

        let mut chunk = connection(Some("va"), Some("vc"));
        let err = checker.check(&mut chunk, 0).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Mismatch { ref found_target, .. } if found_target == "c"));
    }

    // === Scenario: missing visual ids come from the batch's placements ===
    #[tokio::test]
    async fn missing_visual_ids_are_filled() {
        let index = BatchIndex::from_changes(&batch());
        let mut ids = TempIdMap::new();
        ids.bind("va", "id-va");
        ids.bind("a", "id-a");
        let transport = transport();
        let checker = ConnectionChecker::new(&index, &ids, &transport);

        let mut chunk = connection(None, None);
        let warnings = checker.check(&mut chunk, 0).await.unwrap();
        assert!(warnings.is_empty());
        assert_eq!(visuals(&chunk[0]), (Some("id-va".into()), Some("vb".into())));
    }

    #[tokio::test]
    async fn missing_placement_is_reported() {
        let changes = parse(json!([
            {"op": "createElement", "type": "business-actor", "name": "A", "tempId": "a"},
            {"op": "createElement", "type": "business-role", "name": "B", "tempId": "b"},
            {"op": "createRelationship", "type": "assignment-relationship", "sourceId": "a", "targetId": "b", "tempId": "r"},
            {"op": "createView", "name": "V", "tempId": "v"},
            {"op": "addToView", "viewId": "v", "elementId": "a", "tempId": "va"}
        ]));
        let index = BatchIndex::from_changes(&changes);
        let ids = TempIdMap::new();
        let transport = transport();
        let checker = ConnectionChecker::new(&index, &ids, &transport);

        let mut chunk = connection(None, None);
        let err = checker.check(&mut chunk, 0).await.unwrap_err();
        assert!(matches!(err, ConnectionError::UnresolvedVisual { field: "targetVisualId", .. }));
    }

    #[tokio::test]
    async fn unknown_relationship_is_left_to_the_server() {
        let index = BatchIndex::default();
        let ids = TempIdMap::new();
        let transport = transport();
        let checker = ConnectionChecker::new(&index, &ids, &transport);

        let mut chunk = connection(Some("x"), Some("y"));
        assert!(checker.check(&mut chunk, 0).await.unwrap().is_empty());
    }
}

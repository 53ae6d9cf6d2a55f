//! Read-only snapshot of the model used for duplicate lookup
//!
//! The snapshot is rebuilt after each committed operation, never during one.
//! A validation call that reads it while another operation is about to
//! commit may see the model as it was before that commit.

use super::arena::Model;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotElement {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRelationship {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Point-in-time projection of existing elements and relationships
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub elements: Vec<SnapshotElement>,
    pub relationships: Vec<SnapshotRelationship>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Project the attached concepts of a model, ordered by id
    pub fn from_model(model: &Model) -> Self {
        let mut elements: Vec<SnapshotElement> = model
            .elements()
            .filter(|e| e.is_attached())
            .map(|e| SnapshotElement {
                id: e.id.to_string(),
                name: e.name.clone(),
                type_name: e.element_type.to_string(),
            })
            .collect();
        elements.sort_by(|a, b| a.id.cmp(&b.id));

        let mut relationships: Vec<SnapshotRelationship> = model
            .relationships()
            .map(|r| SnapshotRelationship {
                id: r.id.to_string(),
                source: r.source.to_string(),
                target: r.target.to_string(),
                type_name: r.relationship_type.to_string(),
            })
            .collect();
        relationships.sort_by(|a, b| a.id.cmp(&b.id));

        Self {
            elements,
            relationships,
            taken_at: Some(Utc::now()),
        }
    }
}

/// Source of snapshots for the validator
pub trait SnapshotProvider: Send + Sync {
    fn snapshot(&self) -> Arc<Snapshot>;
}

impl SnapshotProvider for Snapshot {
    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::new(self.clone())
    }
}

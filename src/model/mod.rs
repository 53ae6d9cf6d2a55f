//! Core model data structures

mod arena;
mod concept;
mod engine;
mod folder;
mod ids;
mod snapshot;
mod view;
mod vocabulary;

#[cfg(test)]
mod tests;

pub use arena::{ConceptMatch, Model, ModelSummary};
pub use concept::{Element, Properties, Property, Relationship};
pub use engine::{ModelEngine, ModelError, ModelResult};
pub use folder::{Folder, FolderKind};
pub use ids::{generate_id, ConceptId, ConnectionId, FolderId, ViewId, VisualId, ID_PREFIX};
pub use snapshot::{Snapshot, SnapshotElement, SnapshotProvider, SnapshotRelationship};
pub use view::{
    Bounds, ConnectionStyle, ObjectStyle, Router, View, ViewConnection, ViewObject,
    ViewObjectKind, DEFAULT_HEIGHT, DEFAULT_WIDTH,
};
pub use vocabulary::{layer_for_type, ElementType, Layer, RelationshipType};

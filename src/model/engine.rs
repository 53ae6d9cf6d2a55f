//! ModelEngine: owner of the live model and its cached snapshot

use super::arena::Model;
use super::snapshot::{Snapshot, SnapshotProvider};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors from primitive model operations
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// The engine owning the live model
///
/// Reads take a shared lock. Mutation goes through [`ModelEngine::with_model_mut`],
/// which only the operation queue's worker calls, so at most one transaction
/// touches the model at a time. The snapshot is refreshed explicitly after
/// each operation completes.
#[derive(Debug)]
pub struct ModelEngine {
    model: RwLock<Model>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl ModelEngine {
    /// Create an engine around an empty model
    pub fn new() -> Self {
        Self::with_model(Model::default())
    }

    /// Create an engine around an existing model
    pub fn with_model(model: Model) -> Self {
        let snapshot = Arc::new(Snapshot::from_model(&model));
        Self {
            model: RwLock::new(model),
            snapshot: RwLock::new(snapshot),
        }
    }

    /// Load a model from a JSON file and wrap it in an engine
    pub fn from_json_file(path: &std::path::Path) -> ModelResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let model: Model = serde_json::from_str(&text)?;
        Ok(Self::with_model(model))
    }

    /// Run a read-only closure against the live model
    pub fn read<R>(&self, f: impl FnOnce(&Model) -> R) -> R {
        let guard = self.model.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    /// Run a closure with exclusive access to the live model.
    ///
    /// Does not refresh the snapshot; callers do that once their whole
    /// operation has finished.
    pub(crate) fn with_model_mut<R>(&self, f: impl FnOnce(&mut Model) -> R) -> R {
        let mut guard = self.model.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Rebuild the cached snapshot from the live model
    pub fn refresh_snapshot(&self) {
        let fresh = Arc::new(self.read(Snapshot::from_model));
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = fresh;
    }

    /// Clone of the live model
    pub fn model(&self) -> Model {
        self.read(|m| m.clone())
    }
}

impl Default for ModelEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotProvider for ModelEngine {
    fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Element, ElementType, FolderKind, Layer};

    fn add_actor(engine: &ModelEngine, name: &str) {
        engine.with_model_mut(|m| {
            let folder = m
                .root_folder(FolderKind::Layer(Layer::Business))
                .unwrap()
                .id
                .clone();
            m.insert_element(Element::new(ElementType::BusinessActor, name).in_folder(folder))
                .unwrap();
        });
    }

    #[test]
    fn test_create_engine() {
        let engine = ModelEngine::new();
        assert!(engine.snapshot().elements.is_empty());
        assert_eq!(engine.read(|m| m.summary().elements), 0);
    }

    #[test]
    fn snapshot_is_stale_until_refreshed() {
        let engine = ModelEngine::new();
        add_actor(&engine, "Customer");

        assert!(engine.snapshot().elements.is_empty());
        engine.refresh_snapshot();
        assert_eq!(engine.snapshot().elements.len(), 1);
        assert_eq!(engine.snapshot().elements[0].name, "Customer");
    }

    #[test]
    fn model_round_trips_through_json_file() {
        let engine = ModelEngine::new();
        add_actor(&engine, "Customer");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, serde_json::to_string(&engine.model()).unwrap()).unwrap();

        let loaded = ModelEngine::from_json_file(&path).unwrap();
        assert_eq!(loaded.snapshot().elements.len(), 1);
    }
}

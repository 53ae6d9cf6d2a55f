//! Model arena holding every concept, folder, view and diagram object
//!
//! Records live in flat id→record maps. Containment (folder parents, nested
//! diagram objects, view membership) is stored as parent pointers, so no
//! lookup ever walks a tree.

use super::concept::{Element, Relationship};
use super::engine::{ModelError, ModelResult};
use super::folder::{Folder, FolderKind};
use super::ids::{ConceptId, ConnectionId, FolderId, ViewId, VisualId};
use super::view::{View, ViewConnection, ViewObject};
use super::vocabulary::Layer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Counts of every record kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub elements: usize,
    pub detached_elements: usize,
    pub relationships: usize,
    pub folders: usize,
    pub views: usize,
    pub view_objects: usize,
    pub connections: usize,
}

/// A concept found by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptMatch {
    pub id: ConceptId,
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// The live model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    elements: HashMap<ConceptId, Element>,
    relationships: HashMap<ConceptId, Relationship>,
    folders: HashMap<FolderId, Folder>,
    views: HashMap<ViewId, View>,
    objects: HashMap<VisualId, ViewObject>,
    connections: HashMap<ConnectionId, ViewConnection>,
}

impl Model {
    /// Create an empty model with one root folder per layer plus the views root
    pub fn new(name: impl Into<String>) -> Self {
        let mut folders = HashMap::new();
        let kinds = Layer::ALL
            .iter()
            .map(|l| FolderKind::Layer(*l))
            .chain(std::iter::once(FolderKind::Views));
        for kind in kinds {
            let folder = Folder::root(kind);
            folders.insert(folder.id.clone(), folder);
        }
        Self {
            name: name.into(),
            elements: HashMap::new(),
            relationships: HashMap::new(),
            folders,
            views: HashMap::new(),
            objects: HashMap::new(),
            connections: HashMap::new(),
        }
    }

    // === Lookups ===

    pub fn element(&self, id: &ConceptId) -> Option<&Element> {
        self.elements.get(id)
    }

    pub fn relationship(&self, id: &ConceptId) -> Option<&Relationship> {
        self.relationships.get(id)
    }

    pub fn has_concept(&self, id: &ConceptId) -> bool {
        self.elements.contains_key(id) || self.relationships.contains_key(id)
    }

    pub fn folder(&self, id: &FolderId) -> Option<&Folder> {
        self.folders.get(id)
    }

    pub fn view(&self, id: &ViewId) -> Option<&View> {
        self.views.get(id)
    }

    pub fn object(&self, id: &VisualId) -> Option<&ViewObject> {
        self.objects.get(id)
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<&ViewConnection> {
        self.connections.get(id)
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    pub fn views(&self) -> impl Iterator<Item = &View> {
        self.views.values()
    }

    pub fn folders(&self) -> impl Iterator<Item = &Folder> {
        self.folders.values()
    }

    /// Root folder of the given kind
    pub fn root_folder(&self, kind: FolderKind) -> Option<&Folder> {
        self.folders.values().find(|f| f.is_root() && f.kind == kind)
    }

    /// Relationships with `concept` as source or target
    pub fn relationships_touching(&self, concept: &ConceptId) -> Vec<&Relationship> {
        self.relationships
            .values()
            .filter(|r| r.touches(concept))
            .collect()
    }

    /// Every placement of `concept`, across all views
    pub fn placements_of(&self, concept: &ConceptId) -> Vec<&ViewObject> {
        self.objects
            .values()
            .filter(|o| o.concept() == Some(concept))
            .collect()
    }

    /// Every diagram object on `view`
    pub fn objects_in_view(&self, view: &ViewId) -> Vec<&ViewObject> {
        self.objects.values().filter(|o| &o.view == view).collect()
    }

    /// Direct children of a diagram object
    pub fn children_of(&self, parent: &VisualId) -> Vec<&ViewObject> {
        self.objects
            .values()
            .filter(|o| o.parent.as_ref() == Some(parent))
            .collect()
    }

    /// `root` plus everything nested inside it, parents before children
    pub fn object_subtree(&self, root: &VisualId) -> Vec<&ViewObject> {
        let mut out = Vec::new();
        let mut pending = vec![root.clone()];
        while let Some(id) = pending.pop() {
            if let Some(obj) = self.objects.get(&id) {
                out.push(obj);
                pending.extend(self.children_of(&id).into_iter().map(|c| c.id.clone()));
            }
        }
        out
    }

    pub fn connections_in_view(&self, view: &ViewId) -> Vec<&ViewConnection> {
        self.connections.values().filter(|c| &c.view == view).collect()
    }

    pub fn connections_attached(&self, visual: &VisualId) -> Vec<&ViewConnection> {
        self.connections.values().filter(|c| c.attaches(visual)).collect()
    }

    pub fn connections_of(&self, relationship: &ConceptId) -> Vec<&ViewConnection> {
        self.connections
            .values()
            .filter(|c| &c.relationship == relationship)
            .collect()
    }

    /// Attached concepts whose name matches exactly
    pub fn find_by_name(&self, name: &str) -> Vec<ConceptMatch> {
        let elements = self
            .elements
            .values()
            .filter(|e| e.is_attached() && e.name == name)
            .map(|e| ConceptMatch {
                id: e.id.clone(),
                name: e.name.clone(),
                type_name: e.element_type.to_string(),
            });
        let relationships = self
            .relationships
            .values()
            .filter(|r| r.folder.is_some() && r.name == name)
            .map(|r| ConceptMatch {
                id: r.id.clone(),
                name: r.name.clone(),
                type_name: r.relationship_type.to_string(),
            });
        elements.chain(relationships).collect()
    }

    /// True if `id` names any record, in any namespace
    pub fn contains_id(&self, id: &str) -> bool {
        self.elements.contains_key(&ConceptId::from(id))
            || self.relationships.contains_key(&ConceptId::from(id))
            || self.folders.contains_key(&FolderId::from(id))
            || self.views.contains_key(&ViewId::from(id))
            || self.objects.contains_key(&VisualId::from(id))
            || self.connections.contains_key(&ConnectionId::from(id))
    }

    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            elements: self.elements.values().filter(|e| e.is_attached()).count(),
            detached_elements: self.elements.values().filter(|e| !e.is_attached()).count(),
            relationships: self.relationships.len(),
            folders: self.folders.len(),
            views: self.views.len(),
            view_objects: self.objects.len(),
            connections: self.connections.len(),
        }
    }

    // === Primitive mutations ===
    //
    // Each primitive refuses to overwrite or to remove something missing, so a
    // command applied against the wrong state fails instead of corrupting it.

    pub fn insert_element(&mut self, element: Element) -> ModelResult<()> {
        if self.has_concept(&element.id) {
            return Err(ModelError::AlreadyExists(element.id.to_string()));
        }
        self.elements.insert(element.id.clone(), element);
        Ok(())
    }

    pub fn remove_element(&mut self, id: &ConceptId) -> ModelResult<Element> {
        self.elements
            .remove(id)
            .ok_or_else(|| ModelError::NotFound(id.to_string()))
    }

    pub fn element_mut(&mut self, id: &ConceptId) -> ModelResult<&mut Element> {
        self.elements
            .get_mut(id)
            .ok_or_else(|| ModelError::NotFound(id.to_string()))
    }

    pub fn insert_relationship(&mut self, relationship: Relationship) -> ModelResult<()> {
        if self.has_concept(&relationship.id) {
            return Err(ModelError::AlreadyExists(relationship.id.to_string()));
        }
        if !self.has_concept(&relationship.source) {
            return Err(ModelError::NotFound(relationship.source.to_string()));
        }
        if !self.has_concept(&relationship.target) {
            return Err(ModelError::NotFound(relationship.target.to_string()));
        }
        self.relationships.insert(relationship.id.clone(), relationship);
        Ok(())
    }

    pub fn remove_relationship(&mut self, id: &ConceptId) -> ModelResult<Relationship> {
        self.relationships
            .remove(id)
            .ok_or_else(|| ModelError::NotFound(id.to_string()))
    }

    pub fn relationship_mut(&mut self, id: &ConceptId) -> ModelResult<&mut Relationship> {
        self.relationships
            .get_mut(id)
            .ok_or_else(|| ModelError::NotFound(id.to_string()))
    }

    pub fn insert_folder(&mut self, folder: Folder) -> ModelResult<()> {
        if self.folders.contains_key(&folder.id) {
            return Err(ModelError::AlreadyExists(folder.id.to_string()));
        }
        if let Some(parent) = &folder.parent {
            if !self.folders.contains_key(parent) {
                return Err(ModelError::NotFound(parent.to_string()));
            }
        }
        self.folders.insert(folder.id.clone(), folder);
        Ok(())
    }

    pub fn remove_folder(&mut self, id: &FolderId) -> ModelResult<Folder> {
        self.folders
            .remove(id)
            .ok_or_else(|| ModelError::NotFound(id.to_string()))
    }

    pub fn insert_view(&mut self, view: View) -> ModelResult<()> {
        if self.views.contains_key(&view.id) {
            return Err(ModelError::AlreadyExists(view.id.to_string()));
        }
        self.views.insert(view.id.clone(), view);
        Ok(())
    }

    pub fn remove_view(&mut self, id: &ViewId) -> ModelResult<View> {
        self.views
            .remove(id)
            .ok_or_else(|| ModelError::NotFound(id.to_string()))
    }

    pub fn view_mut(&mut self, id: &ViewId) -> ModelResult<&mut View> {
        self.views
            .get_mut(id)
            .ok_or_else(|| ModelError::NotFound(id.to_string()))
    }

    pub fn insert_object(&mut self, object: ViewObject) -> ModelResult<()> {
        if self.objects.contains_key(&object.id) {
            return Err(ModelError::AlreadyExists(object.id.to_string()));
        }
        if !self.views.contains_key(&object.view) {
            return Err(ModelError::NotFound(object.view.to_string()));
        }
        if let Some(concept) = object.concept() {
            if !self.elements.contains_key(concept) {
                return Err(ModelError::NotFound(concept.to_string()));
            }
        }
        self.objects.insert(object.id.clone(), object);
        Ok(())
    }

    pub fn remove_object(&mut self, id: &VisualId) -> ModelResult<ViewObject> {
        self.objects
            .remove(id)
            .ok_or_else(|| ModelError::NotFound(id.to_string()))
    }

    pub fn object_mut(&mut self, id: &VisualId) -> ModelResult<&mut ViewObject> {
        self.objects
            .get_mut(id)
            .ok_or_else(|| ModelError::NotFound(id.to_string()))
    }

    pub fn insert_connection(&mut self, connection: ViewConnection) -> ModelResult<()> {
        if self.connections.contains_key(&connection.id) {
            return Err(ModelError::AlreadyExists(connection.id.to_string()));
        }
        for end in [&connection.source, &connection.target] {
            if !self.objects.contains_key(end) {
                return Err(ModelError::NotFound(end.to_string()));
            }
        }
        if !self.relationships.contains_key(&connection.relationship) {
            return Err(ModelError::NotFound(connection.relationship.to_string()));
        }
        self.connections.insert(connection.id.clone(), connection);
        Ok(())
    }

    pub fn remove_connection(&mut self, id: &ConnectionId) -> ModelResult<ViewConnection> {
        self.connections
            .remove(id)
            .ok_or_else(|| ModelError::NotFound(id.to_string()))
    }

    pub fn connection_mut(&mut self, id: &ConnectionId) -> ModelResult<&mut ViewConnection> {
        self.connections
            .get_mut(id)
            .ok_or_else(|| ModelError::NotFound(id.to_string()))
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new("model")
    }
}

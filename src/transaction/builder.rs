//! Two-pass transaction builder
//!
//! Turns a validated chunk into a [`TransactionUnit`]: a list of reversible
//! commands plus one result per change. Building happens against a scratch
//! copy of the model, so later changes see the effects of earlier ones while
//! the live model stays untouched until [`TransactionUnit::commit`].
//!
//! Pass 1 creates folders, then elements and views. Pass 2 builds every
//! other change in document order. Results come back in document order
//! whatever pass built them.

use super::command::{apply_all, Command};
use super::error::{BuildError, ExecutionError};
use super::layout::{LayoutEngine, DEFAULT_SPACING};
use super::result::OpResult;
use crate::change::{self, Change, ChangeKind, Placement};
use crate::model::{
    layer_for_type, Bounds, ConceptId, ConnectionId, Element, ElementType, Folder, FolderId,
    FolderKind, Layer, Model, ModelError, Properties, Relationship, RelationshipType, Router, View,
    ViewConnection, ViewId, ViewObject, ViewObjectKind, VisualId, DEFAULT_HEIGHT, DEFAULT_WIDTH,
};
use std::collections::{HashMap, HashSet};

/// A built, not yet committed, chunk
#[derive(Debug, Clone)]
pub struct TransactionUnit {
    commands: Vec<Command>,
    results: Vec<OpResult>,
    undoable: bool,
}

impl TransactionUnit {
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn results(&self) -> &[OpResult] {
        &self.results
    }

    /// False when the unit contains a cascading delete
    pub fn is_undoable(&self) -> bool {
        self.undoable
    }

    /// Apply every command to `model` as one step. On failure the steps
    /// already applied are reverted and the model is as it was.
    pub fn commit(&self, model: &mut Model) -> Result<(), ExecutionError> {
        apply_all(&self.commands, model).map_err(|(step, source)| ExecutionError {
            step,
            command: self.commands[step].label(),
            source,
        })
    }

    pub fn into_parts(self) -> (Vec<Command>, Vec<OpResult>, bool) {
        (self.commands, self.results, self.undoable)
    }
}

/// Position of the change being built, for error reporting
#[derive(Debug, Clone, Copy)]
struct At {
    index: usize,
    op: &'static str,
}

impl At {
    fn unresolved(self, field: &str, value: &str) -> BuildError {
        BuildError::UnresolvedReference {
            index: self.index,
            op: self.op.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    fn invalid_target(self, field: &str, value: &str, message: impl Into<String>) -> BuildError {
        BuildError::InvalidTarget {
            index: self.index,
            op: self.op.to_string(),
            field: field.to_string(),
            value: value.to_string(),
            message: message.into(),
        }
    }

    fn invalid_value(self, field: &str, value: &str, message: impl Into<String>) -> BuildError {
        BuildError::InvalidValue {
            index: self.index,
            op: self.op.to_string(),
            field: field.to_string(),
            value: value.to_string(),
            message: message.into(),
        }
    }

    fn model(self, source: ModelError) -> BuildError {
        BuildError::Model {
            index: self.index,
            op: self.op.to_string(),
            source,
        }
    }
}

/// Builds one chunk into a [`TransactionUnit`]
pub struct TransactionBuilder<'a> {
    scratch: Model,
    known: &'a HashMap<String, String>,
    layout: &'a dyn LayoutEngine,
    /// tempIds bound by this chunk so far
    bindings: HashMap<String, String>,
    commands: Vec<Command>,
    undoable: bool,
}

impl<'a> TransactionBuilder<'a> {
    /// `known` maps tempIds bound by earlier chunks to real ids
    pub fn new(
        model: &Model,
        known: &'a HashMap<String, String>,
        layout: &'a dyn LayoutEngine,
    ) -> Self {
        Self {
            scratch: model.clone(),
            known,
            layout,
            bindings: HashMap::new(),
            commands: Vec::new(),
            undoable: true,
        }
    }

    pub fn build(mut self, changes: &[Change]) -> Result<TransactionUnit, BuildError> {
        let folders = changes
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind() == ChangeKind::CreateFolder);
        let other_first = changes
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind().is_first_pass() && c.kind() != ChangeKind::CreateFolder);
        let relationships = relationship_order(changes)
            .into_iter()
            .map(|index| (index, &changes[index]));
        let second = changes.iter().enumerate().filter(|(_, c)| {
            !c.kind().is_first_pass() && c.kind() != ChangeKind::CreateRelationship
        });

        let mut results: Vec<Option<OpResult>> = vec![None; changes.len()];
        for (index, change) in folders.chain(other_first).chain(relationships).chain(second) {
            let result = self.build_change(index, change)?;
            results[index] = Some(result);
        }

        Ok(TransactionUnit {
            commands: self.commands,
            results: results.into_iter().flatten().collect(),
            undoable: self.undoable,
        })
    }

    fn build_change(&mut self, index: usize, change: &Change) -> Result<OpResult, BuildError> {
        let at = At {
            index,
            op: change.op(),
        };
        match change {
            Change::CreateElement(c) => self.create_element(at, c),
            Change::CreateRelationship(c) => self.create_relationship(at, c),
            Change::UpdateElement(c) => self.update_element(at, c),
            Change::UpdateRelationship(c) => self.update_relationship(at, c),
            Change::DeleteElement(c) => self.delete_element(at, c),
            Change::DeleteRelationship(c) => self.delete_relationship(at, c),
            Change::SetProperty(c) => self.set_property(at, c),
            Change::CreateFolder(c) => self.create_folder(at, c),
            Change::MoveToFolder(c) => self.move_to_folder(at, c),
            Change::CreateView(c) => self.create_view(at, c),
            Change::DeleteView(c) => self.delete_view(at, c),
            Change::DuplicateView(c) => self.duplicate_view(at, c),
            Change::SetViewRouter(c) => self.set_view_router(at, c),
            Change::LayoutView(c) => self.layout_view(at, c),
            Change::AddToView(c) => self.add_to_view(at, c),
            Change::AddConnectionToView(c) => self.add_connection(at, c),
            Change::DeleteConnectionFromView(c) => self.delete_connection(at, c),
            Change::MoveViewObject(c) => self.move_view_object(at, c),
            Change::StyleViewObject(c) => self.style_view_object(at, c),
            Change::StyleConnection(c) => self.style_connection(at, c),
            Change::CreateNote(c) => self.create_note(at, c),
            Change::CreateGroup(c) => self.create_group(at, c),
        }
    }

    // === Plumbing ===

    fn push(&mut self, at: At, command: Command) -> Result<(), BuildError> {
        command.apply(&mut self.scratch).map_err(|e| at.model(e))?;
        self.commands.push(command);
        Ok(())
    }

    fn bind(&mut self, temp_id: Option<&String>, real_id: &str) {
        if let Some(t) = temp_id {
            self.bindings.insert(t.clone(), real_id.to_string());
        }
    }

    /// Chunk-local bindings first, then tempIds from earlier chunks, then
    /// the token itself as a real id
    fn lookup(&self, token: &str) -> String {
        self.bindings
            .get(token)
            .or_else(|| self.known.get(token))
            .cloned()
            .unwrap_or_else(|| token.to_string())
    }

    fn resolve_element(&self, at: At, field: &str, token: &str) -> Result<ConceptId, BuildError> {
        let id = ConceptId::from(self.lookup(token));
        match self.scratch.element(&id) {
            Some(_) => Ok(id),
            None => Err(at.unresolved(field, token)),
        }
    }

    fn resolve_relationship(
        &self,
        at: At,
        field: &str,
        token: &str,
    ) -> Result<ConceptId, BuildError> {
        let id = ConceptId::from(self.lookup(token));
        match self.scratch.relationship(&id) {
            Some(_) => Ok(id),
            None => Err(at.unresolved(field, token)),
        }
    }

    fn resolve_concept(&self, at: At, field: &str, token: &str) -> Result<ConceptId, BuildError> {
        let id = ConceptId::from(self.lookup(token));
        if self.scratch.has_concept(&id) {
            Ok(id)
        } else {
            Err(at.unresolved(field, token))
        }
    }

    fn resolve_folder(&self, at: At, field: &str, token: &str) -> Result<FolderId, BuildError> {
        let id = FolderId::from(self.lookup(token));
        match self.scratch.folder(&id) {
            Some(_) => Ok(id),
            None => Err(at.unresolved(field, token)),
        }
    }

    fn resolve_view(&self, at: At, field: &str, token: &str) -> Result<ViewId, BuildError> {
        let id = ViewId::from(self.lookup(token));
        match self.scratch.view(&id) {
            Some(_) => Ok(id),
            None => Err(at.unresolved(field, token)),
        }
    }

    fn resolve_visual(&self, at: At, field: &str, token: &str) -> Result<VisualId, BuildError> {
        let id = VisualId::from(self.lookup(token));
        match self.scratch.object(&id) {
            Some(_) => Ok(id),
            None => Err(at.unresolved(field, token)),
        }
    }

    fn resolve_connection(
        &self,
        at: At,
        field: &str,
        token: &str,
    ) -> Result<ConnectionId, BuildError> {
        let id = ConnectionId::from(self.lookup(token));
        match self.scratch.connection(&id) {
            Some(_) => Ok(id),
            None => Err(at.unresolved(field, token)),
        }
    }

    fn root_folder(&self, at: At, kind: FolderKind) -> Result<FolderId, BuildError> {
        self.scratch
            .root_folder(kind)
            .map(|f| f.id.clone())
            .ok_or_else(|| at.model(ModelError::NotFound(format!("root folder '{}'", kind.as_str()))))
    }

    /// Folder for a new or moved record: the given one if it has the right
    /// kind, else the root of that kind
    fn target_folder(
        &self,
        at: At,
        token: Option<&String>,
        kind: FolderKind,
    ) -> Result<FolderId, BuildError> {
        let Some(token) = token else {
            return self.root_folder(at, kind);
        };
        let id = self.resolve_folder(at, "folderId", token)?;
        let folder = self.scratch.folder(&id).ok_or_else(|| at.unresolved("folderId", token))?;
        if folder.kind != kind {
            return Err(at.invalid_target(
                "folderId",
                token,
                format!(
                    "folder '{}' holds {} records, not {}",
                    folder.name,
                    folder.kind.as_str(),
                    kind.as_str()
                ),
            ));
        }
        Ok(id)
    }

    fn resolve_parent(
        &self,
        at: At,
        view: &ViewId,
        token: Option<&String>,
    ) -> Result<Option<VisualId>, BuildError> {
        let Some(token) = token else {
            return Ok(None);
        };
        let id = self.resolve_visual(at, "parentVisualId", token)?;
        let parent = self
            .scratch
            .object(&id)
            .ok_or_else(|| at.unresolved("parentVisualId", token))?;
        if &parent.view != view {
            return Err(at.invalid_target(
                "parentVisualId",
                token,
                "parent object is on a different view",
            ));
        }
        if matches!(parent.kind, ViewObjectKind::Note { .. }) {
            return Err(at.invalid_target(
                "parentVisualId",
                token,
                "notes cannot contain other objects",
            ));
        }
        Ok(Some(id))
    }

    /// Bounds for a new object; missing position comes from the layout
    /// engine, missing or `-1` size means the default size
    fn new_bounds(&self, view: &ViewId, parent: Option<&VisualId>, placement: &Placement) -> Bounds {
        let siblings = self
            .scratch
            .objects_in_view(view)
            .iter()
            .filter(|o| o.parent.as_ref() == parent)
            .count();
        let (dx, dy) = self.layout.next_position(siblings);
        Bounds::new(
            placement.x.unwrap_or(dx),
            placement.y.unwrap_or(dy),
            size_or_default(placement.width, DEFAULT_WIDTH),
            size_or_default(placement.height, DEFAULT_HEIGHT),
        )
    }

    fn place_object(
        &mut self,
        at: At,
        view_token: &str,
        parent_token: Option<&String>,
        placement: &Placement,
        kind: ViewObjectKind,
    ) -> Result<ViewObject, BuildError> {
        let view = self.resolve_view(at, "viewId", view_token)?;
        let parent = self.resolve_parent(at, &view, parent_token)?;
        let bounds = self.new_bounds(&view, parent.as_ref(), placement);

        let mut object = ViewObject::new(view, kind);
        object.parent = parent;
        object.bounds = bounds;
        self.push(at, Command::InsertObject(object.clone()))?;
        Ok(object)
    }

    // === Concepts ===

    fn create_element(&mut self, at: At, c: &change::CreateElement) -> Result<OpResult, BuildError> {
        let element_type: ElementType = c
            .element_type
            .parse()
            .map_err(|e: String| at.invalid_value("type", &c.element_type, e))?;
        let layer = layer_for_type(&c.element_type);
        let folder = self.target_folder(at, c.folder_id.as_ref(), FolderKind::Layer(layer))?;

        let mut element = Element::new(element_type, c.name.clone()).in_folder(folder.clone());
        if let Some(doc) = &c.documentation {
            element.documentation = doc.clone();
        }
        for (key, value) in c.properties.iter().flatten() {
            element.properties.set(key.clone(), value.clone());
        }

        let id = element.id.to_string();
        self.push(at, Command::InsertElement(element))?;
        self.bind(c.temp_id.as_ref(), &id);

        Ok(OpResult::new(ChangeKind::CreateElement)
            .bind(c.temp_id.as_deref(), id.clone())
            .field("conceptId", id)
            .field("name", c.name.clone())
            .field("type", c.element_type.clone())
            .field("folderId", folder.to_string()))
    }

    fn create_relationship(
        &mut self,
        at: At,
        c: &change::CreateRelationship,
    ) -> Result<OpResult, BuildError> {
        let relationship_type: RelationshipType = c
            .relationship_type
            .parse()
            .map_err(|e: String| at.invalid_value("type", &c.relationship_type, e))?;
        let source = self.resolve_concept(at, "sourceId", &c.source_id)?;
        let target = self.resolve_concept(at, "targetId", &c.target_id)?;
        let folder = self.root_folder(at, FolderKind::Layer(Layer::Relations))?;

        let mut rel = Relationship::new(relationship_type, source.clone(), target.clone())
            .in_folder(folder);
        if let Some(name) = &c.name {
            rel = rel.with_name(name.clone());
        }
        if let Some(doc) = &c.documentation {
            rel.documentation = doc.clone();
        }
        for (key, value) in c.properties.iter().flatten() {
            rel.properties.set(key.clone(), value.clone());
        }
        rel.access_type = c.access_type.clone();
        rel.strength = c.strength.clone();

        let id = rel.id.to_string();
        self.push(at, Command::InsertRelationship(rel))?;
        self.bind(c.temp_id.as_ref(), &id);

        Ok(OpResult::new(ChangeKind::CreateRelationship)
            .bind(c.temp_id.as_deref(), id.clone())
            .field("conceptId", id)
            .field("type", c.relationship_type.clone())
            .field("sourceId", source.to_string())
            .field("targetId", target.to_string())
            .field_opt("name", c.name.clone()))
    }

    fn update_element(&mut self, at: At, c: &change::UpdateElement) -> Result<OpResult, BuildError> {
        let id = self.resolve_element(at, "id", &c.id)?;
        let before = self
            .scratch
            .element(&id)
            .cloned()
            .ok_or_else(|| at.unresolved("id", &c.id))?;

        let mut after = before.clone();
        let mut updated = Vec::new();
        if let Some(name) = &c.name {
            after.name = name.clone();
            updated.push("name");
        }
        if let Some(doc) = &c.documentation {
            after.documentation = doc.clone();
            updated.push("documentation");
        }
        if let Some(props) = &c.properties {
            for (key, value) in props {
                after.properties.set(key.clone(), value.clone());
            }
            updated.push("properties");
        }

        self.push(at, Command::ReplaceElement { before, after })?;
        Ok(OpResult::new(ChangeKind::UpdateElement)
            .field("id", id.to_string())
            .field("updated", updated))
    }

    fn update_relationship(
        &mut self,
        at: At,
        c: &change::UpdateRelationship,
    ) -> Result<OpResult, BuildError> {
        let id = self.resolve_relationship(at, "id", &c.id)?;
        let before = self
            .scratch
            .relationship(&id)
            .cloned()
            .ok_or_else(|| at.unresolved("id", &c.id))?;

        let mut after = before.clone();
        let mut updated = Vec::new();
        if let Some(name) = &c.name {
            after.name = name.clone();
            updated.push("name");
        }
        if let Some(doc) = &c.documentation {
            after.documentation = doc.clone();
            updated.push("documentation");
        }
        if let Some(props) = &c.properties {
            for (key, value) in props {
                after.properties.set(key.clone(), value.clone());
            }
            updated.push("properties");
        }
        if let Some(access) = &c.access_type {
            after.access_type = Some(access.clone());
            updated.push("accessType");
        }
        if let Some(strength) = &c.strength {
            after.strength = Some(strength.clone());
            updated.push("strength");
        }

        self.push(at, Command::ReplaceRelationship { before, after })?;
        Ok(OpResult::new(ChangeKind::UpdateRelationship)
            .field("id", id.to_string())
            .field("updated", updated))
    }

    fn delete_element(&mut self, at: At, c: &change::DeleteElement) -> Result<OpResult, BuildError> {
        let id = self.resolve_element(at, "id", &c.id)?;
        if !c.cascade {
            return self.detach_element(at, &id, &c.id);
        }

        let relationships = self.dependent_relationships(&id);

        let mut visuals: Vec<VisualId> = Vec::new();
        let mut seen = HashSet::new();
        let mut placements: Vec<&ViewObject> = self.scratch.placements_of(&id);
        placements.sort_by(|a, b| a.id.cmp(&b.id));
        for placement in placements {
            for obj in self.scratch.object_subtree(&placement.id) {
                if seen.insert(obj.id.clone()) {
                    visuals.push(obj.id.clone());
                }
            }
        }

        let connections = self.connections_touching(&visuals, &relationships);

        let mut commands = Vec::new();
        for conn in &connections {
            if let Some(record) = self.scratch.connection(conn) {
                commands.push(Command::RemoveConnection(record.clone()));
            }
        }
        // children before parents
        for visual in visuals.iter().rev() {
            if let Some(record) = self.scratch.object(visual) {
                commands.push(Command::RemoveObject(record.clone()));
            }
        }
        // relationships on relationships before the ones they attach to
        for rel in relationships.iter().rev() {
            if let Some(record) = self.scratch.relationship(rel) {
                commands.push(Command::RemoveRelationship(record.clone()));
            }
        }
        if let Some(record) = self.scratch.element(&id) {
            commands.push(Command::RemoveElement(record.clone()));
        }
        for command in commands {
            self.push(at, command)?;
        }
        self.undoable = false;

        Ok(OpResult::new(ChangeKind::DeleteElement)
            .field("id", id.to_string())
            .field("cascade", true)
            .field("undoable", false)
            .field("removedRelationships", ids(&relationships))
            .field("removedVisuals", ids(&visuals))
            .field("removedConnections", ids(&connections)))
    }

    /// Non-cascading delete: the element leaves its folder but keeps its
    /// relationships and placements
    fn detach_element(&mut self, at: At, id: &ConceptId, token: &str) -> Result<OpResult, BuildError> {
        let before = self
            .scratch
            .element(id)
            .cloned()
            .ok_or_else(|| at.unresolved("id", token))?;
        let previous_folder = before.folder.as_ref().map(|f| f.to_string());
        if before.is_attached() {
            let mut after = before.clone();
            after.folder = None;
            self.push(at, Command::ReplaceElement { before, after })?;
        }
        Ok(OpResult::new(ChangeKind::DeleteElement)
            .field("id", id.to_string())
            .field("cascade", false)
            .field("undoable", true)
            .field("detached", true)
            .field_opt("previousFolderId", previous_folder))
    }

    /// Relationships attached to `root`, then relationships attached to
    /// those, in discovery order
    fn dependent_relationships(&self, root: &ConceptId) -> Vec<ConceptId> {
        let mut found = Vec::new();
        let mut seen = HashSet::new();
        let mut frontier = vec![root.clone()];
        while let Some(concept) = frontier.pop() {
            let mut touching: Vec<&Relationship> = self.scratch.relationships_touching(&concept);
            touching.sort_by(|a, b| a.id.cmp(&b.id));
            for rel in touching {
                if &rel.id != root && seen.insert(rel.id.clone()) {
                    found.push(rel.id.clone());
                    frontier.push(rel.id.clone());
                }
            }
        }
        found
    }

    fn connections_touching(
        &self,
        visuals: &[VisualId],
        relationships: &[ConceptId],
    ) -> Vec<ConnectionId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let attached = visuals.iter().flat_map(|v| self.scratch.connections_attached(v));
        let drawn = relationships.iter().flat_map(|r| self.scratch.connections_of(r));
        for conn in attached.chain(drawn) {
            if seen.insert(conn.id.clone()) {
                out.push(conn.id.clone());
            }
        }
        out.sort();
        out
    }

    fn delete_relationship(
        &mut self,
        at: At,
        c: &change::DeleteRelationship,
    ) -> Result<OpResult, BuildError> {
        let id = self.resolve_relationship(at, "id", &c.id)?;
        let mut relationships = vec![id.clone()];
        relationships.extend(self.dependent_relationships(&id));
        let connections = self.connections_touching(&[], &relationships);

        let mut commands = Vec::new();
        for conn in &connections {
            if let Some(record) = self.scratch.connection(conn) {
                commands.push(Command::RemoveConnection(record.clone()));
            }
        }
        for rel in relationships.iter().rev() {
            if let Some(record) = self.scratch.relationship(rel) {
                commands.push(Command::RemoveRelationship(record.clone()));
            }
        }
        for command in commands {
            self.push(at, command)?;
        }

        Ok(OpResult::new(ChangeKind::DeleteRelationship)
            .field("id", id.to_string())
            .field("removedRelationships", ids(&relationships[1..]))
            .field("removedConnections", ids(&connections)))
    }

    fn set_property(&mut self, at: At, c: &change::SetProperty) -> Result<OpResult, BuildError> {
        let id = self.resolve_concept(at, "id", &c.id)?;
        let previous;
        if let Some(before) = self.scratch.element(&id).cloned() {
            let mut after = before.clone();
            previous = apply_property(&mut after.properties, &c.key, c.value.as_deref());
            self.push(at, Command::ReplaceElement { before, after })?;
        } else if let Some(before) = self.scratch.relationship(&id).cloned() {
            let mut after = before.clone();
            previous = apply_property(&mut after.properties, &c.key, c.value.as_deref());
            self.push(at, Command::ReplaceRelationship { before, after })?;
        } else {
            return Err(at.unresolved("id", &c.id));
        }

        Ok(OpResult::new(ChangeKind::SetProperty)
            .field("id", id.to_string())
            .field("key", c.key.clone())
            .field("value", c.value.clone())
            .field("previous", previous))
    }

    // === Folders ===

    fn create_folder(&mut self, at: At, c: &change::CreateFolder) -> Result<OpResult, BuildError> {
        let parent_id = match (&c.parent_id, &c.parent_type) {
            (Some(token), _) => self.resolve_folder(at, "parentId", token)?,
            (None, Some(kind)) => {
                let kind = FolderKind::parse(kind)
                    .map_err(|e| at.invalid_value("parentType", kind, e))?;
                self.root_folder(at, kind)?
            }
            (None, None) => return Err(at.unresolved("parentId", "")),
        };
        let parent = self
            .scratch
            .folder(&parent_id)
            .cloned()
            .ok_or_else(|| at.model(ModelError::NotFound(parent_id.to_string())))?;

        let folder = Folder::child(c.name.clone(), &parent);
        let id = folder.id.to_string();
        self.push(at, Command::InsertFolder(folder))?;
        self.bind(c.temp_id.as_ref(), &id);

        Ok(OpResult::new(ChangeKind::CreateFolder)
            .bind(c.temp_id.as_deref(), id.clone())
            .field("folderId", id)
            .field("name", c.name.clone())
            .field("parentId", parent_id.to_string()))
    }

    /// Files an element, relationship or view into another folder of the
    /// matching kind. Moving a detached element re-attaches it.
    fn move_to_folder(&mut self, at: At, c: &change::MoveToFolder) -> Result<OpResult, BuildError> {
        let target = self.lookup(&c.id);
        let concept = ConceptId::from(target.as_str());
        let view = ViewId::from(target.as_str());

        let previous;
        let folder;
        if let Some(before) = self.scratch.element(&concept).cloned() {
            let kind = FolderKind::Layer(before.element_type.layer());
            folder = self.target_folder(at, Some(&c.folder_id), kind)?;
            previous = before.folder.clone();
            let mut after = before.clone();
            after.folder = Some(folder.clone());
            self.push(at, Command::ReplaceElement { before, after })?;
        } else if let Some(before) = self.scratch.relationship(&concept).cloned() {
            let kind = FolderKind::Layer(Layer::Relations);
            folder = self.target_folder(at, Some(&c.folder_id), kind)?;
            previous = before.folder.clone();
            let mut after = before.clone();
            after.folder = Some(folder.clone());
            self.push(at, Command::ReplaceRelationship { before, after })?;
        } else if let Some(before) = self.scratch.view(&view).cloned() {
            folder = self.target_folder(at, Some(&c.folder_id), FolderKind::Views)?;
            previous = before.folder.clone();
            let mut after = before.clone();
            after.folder = Some(folder.clone());
            self.push(at, Command::ReplaceView { before, after })?;
        } else {
            return Err(at.unresolved("id", &c.id));
        }

        Ok(OpResult::new(ChangeKind::MoveToFolder)
            .field("id", target)
            .field("folderId", folder.to_string())
            .field_opt("previousFolderId", previous.map(|f| f.to_string())))
    }

    // === Views ===

    fn create_view(&mut self, at: At, c: &change::CreateView) -> Result<OpResult, BuildError> {
        let folder = self.target_folder(at, c.folder_id.as_ref(), FolderKind::Views)?;
        let mut view = View::new(c.name.clone());
        view.viewpoint = c.viewpoint.clone();
        if let Some(doc) = &c.documentation {
            view.documentation = doc.clone();
        }
        view.folder = Some(folder.clone());

        let id = view.id.to_string();
        self.push(at, Command::InsertView(view))?;
        self.bind(c.temp_id.as_ref(), &id);

        Ok(OpResult::new(ChangeKind::CreateView)
            .bind(c.temp_id.as_deref(), id.clone())
            .field("viewId", id)
            .field("name", c.name.clone())
            .field("folderId", folder.to_string())
            .field_opt("viewpoint", c.viewpoint.clone()))
    }

    fn delete_view(&mut self, at: At, c: &change::DeleteView) -> Result<OpResult, BuildError> {
        let id = self.resolve_view(at, "viewId", &c.view_id)?;

        let mut commands = Vec::new();
        let mut connections: Vec<&ViewConnection> = self.scratch.connections_in_view(&id);
        connections.sort_by(|a, b| a.id.cmp(&b.id));
        for conn in &connections {
            commands.push(Command::RemoveConnection((*conn).clone()));
        }
        let mut objects: Vec<&ViewObject> = self.scratch.objects_in_view(&id);
        objects.sort_by(|a, b| a.id.cmp(&b.id));
        for obj in &objects {
            commands.push(Command::RemoveObject((*obj).clone()));
        }
        if let Some(view) = self.scratch.view(&id) {
            commands.push(Command::RemoveView(view.clone()));
        }
        let (removed_objects, removed_connections) = (objects.len(), connections.len());
        for command in commands {
            self.push(at, command)?;
        }

        Ok(OpResult::new(ChangeKind::DeleteView)
            .field("viewId", id.to_string())
            .field("removedVisuals", removed_objects)
            .field("removedConnections", removed_connections))
    }

    /// Copies the view with fresh ids for every object and connection,
    /// keeping nesting and connection ends pointed at the copies
    fn duplicate_view(&mut self, at: At, c: &change::DuplicateView) -> Result<OpResult, BuildError> {
        let source_id = self.resolve_view(at, "viewId", &c.view_id)?;
        let source = self
            .scratch
            .view(&source_id)
            .cloned()
            .ok_or_else(|| at.unresolved("viewId", &c.view_id))?;

        let name = c
            .name
            .clone()
            .unwrap_or_else(|| format!("{} (copy)", source.name));
        let mut copy = View::new(name.clone());
        copy.documentation = source.documentation.clone();
        copy.viewpoint = source.viewpoint.clone();
        copy.router = source.router;
        copy.folder = source.folder.clone();
        let copy_id = copy.id.clone();

        let mut objects: Vec<ViewObject> = self
            .scratch
            .objects_in_view(&source_id)
            .into_iter()
            .cloned()
            .collect();
        objects.sort_by(|a, b| a.id.cmp(&b.id));
        let remap: HashMap<VisualId, VisualId> = objects
            .iter()
            .map(|o| (o.id.clone(), VisualId::new()))
            .collect();

        let mut connections: Vec<ViewConnection> = self
            .scratch
            .connections_in_view(&source_id)
            .into_iter()
            .cloned()
            .collect();
        connections.sort_by(|a, b| a.id.cmp(&b.id));

        self.push(at, Command::InsertView(copy))?;
        for obj in &objects {
            let mut new_obj = obj.clone();
            new_obj.view = copy_id.clone();
            new_obj.id = remap[&obj.id].clone();
            new_obj.parent = obj.parent.as_ref().and_then(|p| remap.get(p).cloned());
            self.push(at, Command::InsertObject(new_obj))?;
        }
        for conn in &connections {
            let (Some(source), Some(target)) = (remap.get(&conn.source), remap.get(&conn.target))
            else {
                continue;
            };
            let mut new_conn = conn.clone();
            new_conn.id = ConnectionId::new();
            new_conn.view = copy_id.clone();
            new_conn.source = source.clone();
            new_conn.target = target.clone();
            self.push(at, Command::InsertConnection(new_conn))?;
        }

        let id = copy_id.to_string();
        self.bind(c.temp_id.as_ref(), &id);
        Ok(OpResult::new(ChangeKind::DuplicateView)
            .bind(c.temp_id.as_deref(), id.clone())
            .field("viewId", id)
            .field("sourceViewId", source_id.to_string())
            .field("name", name)
            .field("objectsCopied", objects.len())
            .field("connectionsCopied", connections.len()))
    }

    fn set_view_router(&mut self, at: At, c: &change::SetViewRouter) -> Result<OpResult, BuildError> {
        let id = self.resolve_view(at, "viewId", &c.view_id)?;
        let router: Router = c
            .router_type
            .parse()
            .map_err(|e: String| at.invalid_value("routerType", &c.router_type, e))?;
        let before = self
            .scratch
            .view(&id)
            .cloned()
            .ok_or_else(|| at.unresolved("viewId", &c.view_id))?;
        let previous = before.router;
        let mut after = before.clone();
        after.router = router;
        self.push(at, Command::ReplaceView { before, after })?;

        Ok(OpResult::new(ChangeKind::SetViewRouter)
            .field("viewId", id.to_string())
            .field("routerType", c.router_type.clone())
            .field("previous", router_name(previous)))
    }

    fn layout_view(&mut self, at: At, c: &change::LayoutView) -> Result<OpResult, BuildError> {
        let id = self.resolve_view(at, "viewId", &c.view_id)?;
        let algorithm = c.algorithm.as_deref().unwrap_or("grid");
        let spacing = c.spacing.unwrap_or(DEFAULT_SPACING);

        let top_level: Vec<&ViewObject> = self
            .scratch
            .objects_in_view(&id)
            .into_iter()
            .filter(|o| o.parent.is_none())
            .collect();
        let placed = self
            .layout
            .arrange(algorithm, &top_level, spacing)
            .map_err(|e| at.invalid_value("algorithm", algorithm, e.to_string()))?;

        let mut commands = Vec::new();
        for (visual, bounds) in placed {
            if let Some(before) = self.scratch.object(&visual) {
                if before.bounds != bounds {
                    let mut after = before.clone();
                    after.bounds = bounds;
                    commands.push(Command::ReplaceObject {
                        before: before.clone(),
                        after,
                    });
                }
            }
        }
        let moved = commands.len();
        for command in commands {
            self.push(at, command)?;
        }

        Ok(OpResult::new(ChangeKind::LayoutView)
            .field("viewId", id.to_string())
            .field("algorithm", algorithm)
            .field("moved", moved))
    }

    // === Diagram objects ===

    fn add_to_view(&mut self, at: At, c: &change::AddToView) -> Result<OpResult, BuildError> {
        let concept = self.resolve_element(at, "elementId", &c.element_id)?;
        let object = self.place_object(
            at,
            &c.view_id,
            c.parent_visual_id.as_ref(),
            &c.placement,
            ViewObjectKind::Element {
                concept: concept.clone(),
            },
        )?;
        let id = object.id.to_string();
        self.bind(c.temp_id.as_ref(), &id);

        Ok(placed_result(ChangeKind::AddToView, &object)
            .bind(c.temp_id.as_deref(), id.clone())
            .field("visualId", id)
            .field("conceptId", concept.to_string()))
    }

    fn create_note(&mut self, at: At, c: &change::CreateNote) -> Result<OpResult, BuildError> {
        let object = self.place_object(
            at,
            &c.view_id,
            c.parent_visual_id.as_ref(),
            &c.placement,
            ViewObjectKind::Note {
                content: c.content.clone(),
            },
        )?;
        let id = object.id.to_string();
        self.bind(c.temp_id.as_ref(), &id);

        Ok(placed_result(ChangeKind::CreateNote, &object)
            .bind(c.temp_id.as_deref(), id.clone())
            .field("noteId", id))
    }

    fn create_group(&mut self, at: At, c: &change::CreateGroup) -> Result<OpResult, BuildError> {
        let object = self.place_object(
            at,
            &c.view_id,
            c.parent_visual_id.as_ref(),
            &c.placement,
            ViewObjectKind::Group {
                name: c.name.clone(),
            },
        )?;
        let id = object.id.to_string();
        self.bind(c.temp_id.as_ref(), &id);

        Ok(placed_result(ChangeKind::CreateGroup, &object)
            .bind(c.temp_id.as_deref(), id.clone())
            .field("groupId", id)
            .field("name", c.name.clone()))
    }

    /// Draws a relationship between two objects on the same view. The
    /// objects must show the relationship's source and target, in that order.
    fn add_connection(
        &mut self,
        at: At,
        c: &change::AddConnectionToView,
    ) -> Result<OpResult, BuildError> {
        let view = self.resolve_view(at, "viewId", &c.view_id)?;
        let rel_id = self.resolve_relationship(at, "relationshipId", &c.relationship_id)?;
        let source_token = c
            .source_visual_id
            .as_deref()
            .ok_or_else(|| at.unresolved("sourceVisualId", ""))?;
        let target_token = c
            .target_visual_id
            .as_deref()
            .ok_or_else(|| at.unresolved("targetVisualId", ""))?;
        let source = self.resolve_visual(at, "sourceVisualId", source_token)?;
        let target = self.resolve_visual(at, "targetVisualId", target_token)?;

        let (Some(rel), Some(source_obj), Some(target_obj)) = (
            self.scratch.relationship(&rel_id),
            self.scratch.object(&source),
            self.scratch.object(&target),
        ) else {
            return Err(at.unresolved("relationshipId", &c.relationship_id));
        };

        for (field, token, obj) in [
            ("sourceVisualId", source_token, source_obj),
            ("targetVisualId", target_token, target_obj),
        ] {
            if obj.view != view {
                return Err(at.invalid_target(field, token, "object is on a different view"));
            }
        }

        let shown = (source_obj.concept(), target_obj.concept());
        let forward = (Some(&rel.source), Some(&rel.target));
        let reversed = (Some(&rel.target), Some(&rel.source));
        if shown != forward {
            if shown == reversed {
                return Err(BuildError::DirectionSwap {
                    index: at.index,
                    op: at.op.to_string(),
                    relationship: rel_id.to_string(),
                    source_visual: source.to_string(),
                    target_visual: target.to_string(),
                });
            }
            return Err(BuildError::DirectionMismatch {
                index: at.index,
                op: at.op.to_string(),
                relationship: rel_id.to_string(),
                expected: format!("{} -> {}", rel.source, rel.target),
                found: format!("{} -> {}", concept_label(shown.0), concept_label(shown.1)),
            });
        }

        let connection = ViewConnection {
            id: ConnectionId::new(),
            view: view.clone(),
            relationship: rel_id.clone(),
            source: source.clone(),
            target: target.clone(),
            style: Default::default(),
        };
        let id = connection.id.to_string();
        self.push(at, Command::InsertConnection(connection))?;
        self.bind(c.temp_id.as_ref(), &id);

        Ok(OpResult::new(ChangeKind::AddConnectionToView)
            .bind(c.temp_id.as_deref(), id.clone())
            .field("connectionId", id)
            .field("viewId", view.to_string())
            .field("relationshipId", rel_id.to_string())
            .field("sourceVisualId", source.to_string())
            .field("targetVisualId", target.to_string()))
    }

    fn delete_connection(
        &mut self,
        at: At,
        c: &change::DeleteConnectionFromView,
    ) -> Result<OpResult, BuildError> {
        let id = self.resolve_connection(at, "connectionId", &c.connection_id)?;
        let record = self
            .scratch
            .connection(&id)
            .cloned()
            .ok_or_else(|| at.unresolved("connectionId", &c.connection_id))?;
        if let Some(view_token) = &c.view_id {
            let view = self.resolve_view(at, "viewId", view_token)?;
            if record.view != view {
                return Err(at.invalid_target(
                    "viewId",
                    view_token,
                    "connection is not on this view",
                ));
            }
        }
        let view = record.view.to_string();
        self.push(at, Command::RemoveConnection(record))?;

        Ok(OpResult::new(ChangeKind::DeleteConnectionFromView)
            .field("connectionId", id.to_string())
            .field("viewId", view))
    }

    fn move_view_object(&mut self, at: At, c: &change::MoveViewObject) -> Result<OpResult, BuildError> {
        let id = self.resolve_visual(at, "viewObjectId", &c.view_object_id)?;
        let before = self
            .scratch
            .object(&id)
            .cloned()
            .ok_or_else(|| at.unresolved("viewObjectId", &c.view_object_id))?;
        let mut after = before.clone();
        let p = &c.placement;
        if let Some(x) = p.x {
            after.bounds.x = x;
        }
        if let Some(y) = p.y {
            after.bounds.y = y;
        }
        if p.width.is_some() {
            after.bounds.width = size_or_default(p.width, DEFAULT_WIDTH);
        }
        if p.height.is_some() {
            after.bounds.height = size_or_default(p.height, DEFAULT_HEIGHT);
        }
        let object = after.clone();
        self.push(at, Command::ReplaceObject { before, after })?;

        Ok(placed_result(ChangeKind::MoveViewObject, &object).field("viewObjectId", id.to_string()))
    }

    fn style_view_object(
        &mut self,
        at: At,
        c: &change::StyleViewObject,
    ) -> Result<OpResult, BuildError> {
        let id = self.resolve_visual(at, "viewObjectId", &c.view_object_id)?;
        let before = self
            .scratch
            .object(&id)
            .cloned()
            .ok_or_else(|| at.unresolved("viewObjectId", &c.view_object_id))?;
        let mut after = before.clone();
        let style = &mut after.style;
        if c.fill_color.is_some() {
            style.fill_color = c.fill_color.clone();
        }
        if c.line_color.is_some() {
            style.line_color = c.line_color.clone();
        }
        if c.font_color.is_some() {
            style.font_color = c.font_color.clone();
        }
        if let Some(opacity) = c.opacity {
            style.opacity = Some(narrow(at, "opacity", opacity)?);
        }
        if c.font.is_some() {
            style.font = c.font.clone();
        }
        let applied = serde_json::to_value(&after.style).unwrap_or_default();
        self.push(at, Command::ReplaceObject { before, after })?;

        Ok(OpResult::new(ChangeKind::StyleViewObject)
            .field("viewObjectId", id.to_string())
            .field("style", applied))
    }

    fn style_connection(
        &mut self,
        at: At,
        c: &change::StyleConnection,
    ) -> Result<OpResult, BuildError> {
        let id = self.resolve_connection(at, "connectionId", &c.connection_id)?;
        let before = self
            .scratch
            .connection(&id)
            .cloned()
            .ok_or_else(|| at.unresolved("connectionId", &c.connection_id))?;
        let mut after = before.clone();
        let style = &mut after.style;
        if c.line_color.is_some() {
            style.line_color = c.line_color.clone();
        }
        if let Some(width) = c.line_width {
            style.line_width = Some(narrow(at, "lineWidth", width)?);
        }
        if let Some(position) = c.text_position {
            style.text_position = Some(narrow(at, "textPosition", position)?);
        }
        if c.font_color.is_some() {
            style.font_color = c.font_color.clone();
        }
        let applied = serde_json::to_value(&after.style).unwrap_or_default();
        self.push(at, Command::ReplaceConnection { before, after })?;

        Ok(OpResult::new(ChangeKind::StyleConnection)
            .field("connectionId", id.to_string())
            .field("style", applied))
    }
}

fn size_or_default(value: Option<i32>, default: i32) -> i32 {
    match value {
        Some(v) if v > 0 => v,
        _ => default,
    }
}

fn narrow(at: At, field: &str, value: i64) -> Result<u8, BuildError> {
    u8::try_from(value).map_err(|_| at.invalid_value(field, &value.to_string(), format!("{} out of range", field)))
}

fn apply_property(
    properties: &mut Properties,
    key: &str,
    value: Option<&str>,
) -> Option<String> {
    match value {
        Some(v) => properties.set(key, v),
        None => properties.remove(key),
    }
}

/// Indices of `createRelationship` changes, each placed after any
/// relationship in the chunk whose tempId it uses as an endpoint. A cycle
/// keeps document order and fails later as an unresolved reference.
fn relationship_order(changes: &[Change]) -> Vec<usize> {
    let mut waiting: Vec<(usize, &change::CreateRelationship)> = changes
        .iter()
        .enumerate()
        .filter_map(|(index, c)| match c {
            Change::CreateRelationship(r) => Some((index, r)),
            _ => None,
        })
        .collect();
    let mut order = Vec::with_capacity(waiting.len());
    while !waiting.is_empty() {
        let ready: Vec<usize> = waiting
            .iter()
            .filter(|(_, r)| {
                !waiting.iter().any(|(_, other)| {
                    other
                        .temp_id
                        .as_deref()
                        .is_some_and(|t| t == r.source_id || t == r.target_id)
                })
            })
            .map(|(index, _)| *index)
            .collect();
        if ready.is_empty() {
            order.extend(waiting.iter().map(|(index, _)| *index));
            break;
        }
        waiting.retain(|(index, _)| !ready.contains(index));
        order.extend(ready);
    }
    order
}

fn ids<T: ToString>(items: &[T]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

fn router_name(router: Router) -> &'static str {
    match router {
        Router::Bendpoint => "bendpoint",
        Router::Manhattan => "manhattan",
    }
}

fn concept_label(concept: Option<&ConceptId>) -> String {
    concept
        .map(ToString::to_string)
        .unwrap_or_else(|| "(no concept)".to_string())
}

fn placed_result(kind: ChangeKind, object: &ViewObject) -> OpResult {
    OpResult::new(kind)
        .field("viewId", object.view.to_string())
        .field_opt("parentVisualId", object.parent.as_ref().map(|p| p.to_string()))
        .field("x", object.bounds.x)
        .field("y", object.bounds.y)
        .field("width", object.bounds.width)
        .field("height", object.bounds.height)
}

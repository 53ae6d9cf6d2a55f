//! Change: the closed set of logical mutations a caller can request
//!
//! Every reference-bearing field holds either a real identifier or a tempId
//! placeholder. Nothing here resolves references; that happens in the
//! transaction builder (server) and the orchestrator (client).

use super::validate::{ValidationError, ValidationErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Op kind of a change, the value of its `op` tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    CreateElement,
    CreateRelationship,
    UpdateElement,
    UpdateRelationship,
    DeleteElement,
    DeleteRelationship,
    SetProperty,
    CreateFolder,
    MoveToFolder,
    CreateView,
    DeleteView,
    DuplicateView,
    SetViewRouter,
    LayoutView,
    AddToView,
    AddConnectionToView,
    DeleteConnectionFromView,
    MoveViewObject,
    StyleViewObject,
    StyleConnection,
    CreateNote,
    CreateGroup,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 22] = [
        ChangeKind::CreateElement,
        ChangeKind::CreateRelationship,
        ChangeKind::UpdateElement,
        ChangeKind::UpdateRelationship,
        ChangeKind::DeleteElement,
        ChangeKind::DeleteRelationship,
        ChangeKind::SetProperty,
        ChangeKind::CreateFolder,
        ChangeKind::MoveToFolder,
        ChangeKind::CreateView,
        ChangeKind::DeleteView,
        ChangeKind::DuplicateView,
        ChangeKind::SetViewRouter,
        ChangeKind::LayoutView,
        ChangeKind::AddToView,
        ChangeKind::AddConnectionToView,
        ChangeKind::DeleteConnectionFromView,
        ChangeKind::MoveViewObject,
        ChangeKind::StyleViewObject,
        ChangeKind::StyleConnection,
        ChangeKind::CreateNote,
        ChangeKind::CreateGroup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::CreateElement => "createElement",
            ChangeKind::CreateRelationship => "createRelationship",
            ChangeKind::UpdateElement => "updateElement",
            ChangeKind::UpdateRelationship => "updateRelationship",
            ChangeKind::DeleteElement => "deleteElement",
            ChangeKind::DeleteRelationship => "deleteRelationship",
            ChangeKind::SetProperty => "setProperty",
            ChangeKind::CreateFolder => "createFolder",
            ChangeKind::MoveToFolder => "moveToFolder",
            ChangeKind::CreateView => "createView",
            ChangeKind::DeleteView => "deleteView",
            ChangeKind::DuplicateView => "duplicateView",
            ChangeKind::SetViewRouter => "setViewRouter",
            ChangeKind::LayoutView => "layoutView",
            ChangeKind::AddToView => "addToView",
            ChangeKind::AddConnectionToView => "addConnectionToView",
            ChangeKind::DeleteConnectionFromView => "deleteConnectionFromView",
            ChangeKind::MoveViewObject => "moveViewObject",
            ChangeKind::StyleViewObject => "styleViewObject",
            ChangeKind::StyleConnection => "styleConnection",
            ChangeKind::CreateNote => "createNote",
            ChangeKind::CreateGroup => "createGroup",
        }
    }

    /// Fields that must be present (and non-null) in the wire form.
    ///
    /// `setProperty.value` must be present but may be null. The visual ids
    /// of `addConnectionToView` are absent here because the client may omit
    /// them; the server-side schema check requires them separately.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            ChangeKind::CreateElement => &["type", "name"],
            ChangeKind::CreateRelationship => &["type", "sourceId", "targetId"],
            ChangeKind::UpdateElement
            | ChangeKind::UpdateRelationship
            | ChangeKind::DeleteElement
            | ChangeKind::DeleteRelationship => &["id"],
            ChangeKind::SetProperty => &["id", "key", "value"],
            ChangeKind::CreateFolder => &["name"],
            ChangeKind::MoveToFolder => &["id", "folderId"],
            ChangeKind::CreateView => &["name"],
            ChangeKind::DeleteView | ChangeKind::DuplicateView | ChangeKind::LayoutView => {
                &["viewId"]
            }
            ChangeKind::SetViewRouter => &["viewId", "routerType"],
            ChangeKind::AddToView => &["viewId", "elementId"],
            ChangeKind::AddConnectionToView => &["viewId", "relationshipId"],
            ChangeKind::DeleteConnectionFromView | ChangeKind::StyleConnection => {
                &["connectionId"]
            }
            ChangeKind::MoveViewObject | ChangeKind::StyleViewObject => &["viewObjectId"],
            ChangeKind::CreateNote => &["viewId", "content"],
            ChangeKind::CreateGroup => &["viewId", "name"],
        }
    }

    /// Ops built in the first pass: they create the things later ops refer to
    pub fn is_first_pass(&self) -> bool {
        matches!(
            self,
            ChangeKind::CreateElement | ChangeKind::CreateFolder | ChangeKind::CreateView
        )
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChangeKind::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown op: '{}'", s))
    }
}

/// User properties as they appear on the wire
pub type PropertyMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateElement {
    #[serde(rename = "type")]
    pub element_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<PropertyMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRelationship {
    #[serde(rename = "type")]
    pub relationship_type: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<PropertyMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateElement {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<PropertyMap>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRelationship {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<PropertyMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<String>,
}

fn default_cascade() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteElement {
    pub id: String,
    #[serde(default = "default_cascade")]
    pub cascade: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRelationship {
    pub id: String,
}

/// `value: null` removes the key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetProperty {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolder {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveToFolder {
    pub id: String,
    pub folder_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateView {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteView {
    pub view_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateView {
    pub view_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetViewRouter {
    pub view_id: String,
    pub router_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutView {
    pub view_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spacing: Option<i32>,
}

/// Position and size shared by the ops that place something on a view.
/// `-1` for width/height means "default size".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToView {
    pub view_id: String,
    pub element_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    #[serde(flatten)]
    pub placement: Placement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_visual_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddConnectionToView {
    pub view_id: String,
    pub relationship_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_visual_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_visual_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteConnectionFromView {
    pub connection_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveViewObject {
    pub view_object_id: String,
    #[serde(flatten)]
    pub placement: Placement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleViewObject {
    pub view_object_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleConnection {
    pub connection_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_width: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_position: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNote {
    pub view_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    #[serde(flatten)]
    pub placement: Placement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_visual_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroup {
    pub view_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    #[serde(flatten)]
    pub placement: Placement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_visual_id: Option<String>,
}

/// A single requested mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Change {
    CreateElement(CreateElement),
    CreateRelationship(CreateRelationship),
    UpdateElement(UpdateElement),
    UpdateRelationship(UpdateRelationship),
    DeleteElement(DeleteElement),
    DeleteRelationship(DeleteRelationship),
    SetProperty(SetProperty),
    CreateFolder(CreateFolder),
    MoveToFolder(MoveToFolder),
    CreateView(CreateView),
    DeleteView(DeleteView),
    DuplicateView(DuplicateView),
    SetViewRouter(SetViewRouter),
    LayoutView(LayoutView),
    AddToView(AddToView),
    AddConnectionToView(AddConnectionToView),
    DeleteConnectionFromView(DeleteConnectionFromView),
    MoveViewObject(MoveViewObject),
    StyleViewObject(StyleViewObject),
    StyleConnection(StyleConnection),
    CreateNote(CreateNote),
    CreateGroup(CreateGroup),
}

/// Which identifier namespace a reference field points into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefTarget {
    /// Element or relationship
    Concept,
    Element,
    Relationship,
    Folder,
    View,
    /// Element placement, note or group
    Visual,
    Connection,
}

/// One reference-bearing field of a change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference<'a> {
    pub field: &'static str,
    pub target: RefTarget,
    pub value: &'a str,
}

impl Change {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Change::CreateElement(_) => ChangeKind::CreateElement,
            Change::CreateRelationship(_) => ChangeKind::CreateRelationship,
            Change::UpdateElement(_) => ChangeKind::UpdateElement,
            Change::UpdateRelationship(_) => ChangeKind::UpdateRelationship,
            Change::DeleteElement(_) => ChangeKind::DeleteElement,
            Change::DeleteRelationship(_) => ChangeKind::DeleteRelationship,
            Change::SetProperty(_) => ChangeKind::SetProperty,
            Change::CreateFolder(_) => ChangeKind::CreateFolder,
            Change::MoveToFolder(_) => ChangeKind::MoveToFolder,
            Change::CreateView(_) => ChangeKind::CreateView,
            Change::DeleteView(_) => ChangeKind::DeleteView,
            Change::DuplicateView(_) => ChangeKind::DuplicateView,
            Change::SetViewRouter(_) => ChangeKind::SetViewRouter,
            Change::LayoutView(_) => ChangeKind::LayoutView,
            Change::AddToView(_) => ChangeKind::AddToView,
            Change::AddConnectionToView(_) => ChangeKind::AddConnectionToView,
            Change::DeleteConnectionFromView(_) => ChangeKind::DeleteConnectionFromView,
            Change::MoveViewObject(_) => ChangeKind::MoveViewObject,
            Change::StyleViewObject(_) => ChangeKind::StyleViewObject,
            Change::StyleConnection(_) => ChangeKind::StyleConnection,
            Change::CreateNote(_) => ChangeKind::CreateNote,
            Change::CreateGroup(_) => ChangeKind::CreateGroup,
        }
    }

    /// Wire name of the op
    pub fn op(&self) -> &'static str {
        self.kind().as_str()
    }

    /// The tempId this change declares, if any
    pub fn temp_id(&self) -> Option<&str> {
        match self {
            Change::CreateElement(c) => c.temp_id.as_deref(),
            Change::CreateRelationship(c) => c.temp_id.as_deref(),
            Change::CreateFolder(c) => c.temp_id.as_deref(),
            Change::CreateView(c) => c.temp_id.as_deref(),
            Change::DuplicateView(c) => c.temp_id.as_deref(),
            Change::AddToView(c) => c.temp_id.as_deref(),
            Change::AddConnectionToView(c) => c.temp_id.as_deref(),
            Change::CreateNote(c) => c.temp_id.as_deref(),
            Change::CreateGroup(c) => c.temp_id.as_deref(),
            _ => None,
        }
    }

    /// Every reference-bearing field that holds a value, in field order
    pub fn references(&self) -> Vec<Reference<'_>> {
        fn r<'a>(field: &'static str, target: RefTarget, value: &'a str) -> Reference<'a> {
            Reference { field, target, value }
        }
        match self {
            Change::CreateElement(c) => c
                .folder_id
                .as_deref()
                .map(|f| vec![r("folderId", RefTarget::Folder, f)])
                .unwrap_or_default(),
            Change::CreateRelationship(c) => vec![
                r("sourceId", RefTarget::Concept, &c.source_id),
                r("targetId", RefTarget::Concept, &c.target_id),
            ],
            Change::UpdateElement(c) => vec![r("id", RefTarget::Element, &c.id)],
            Change::UpdateRelationship(c) => vec![r("id", RefTarget::Relationship, &c.id)],
            Change::DeleteElement(c) => vec![r("id", RefTarget::Element, &c.id)],
            Change::DeleteRelationship(c) => vec![r("id", RefTarget::Relationship, &c.id)],
            Change::SetProperty(c) => vec![r("id", RefTarget::Concept, &c.id)],
            Change::CreateFolder(c) => c
                .parent_id
                .as_deref()
                .map(|p| vec![r("parentId", RefTarget::Folder, p)])
                .unwrap_or_default(),
            Change::MoveToFolder(c) => vec![
                r("id", RefTarget::Concept, &c.id),
                r("folderId", RefTarget::Folder, &c.folder_id),
            ],
            Change::CreateView(c) => c
                .folder_id
                .as_deref()
                .map(|f| vec![r("folderId", RefTarget::Folder, f)])
                .unwrap_or_default(),
            Change::DeleteView(c) => vec![r("viewId", RefTarget::View, &c.view_id)],
            Change::DuplicateView(c) => vec![r("viewId", RefTarget::View, &c.view_id)],
            Change::SetViewRouter(c) => vec![r("viewId", RefTarget::View, &c.view_id)],
            Change::LayoutView(c) => vec![r("viewId", RefTarget::View, &c.view_id)],
            Change::AddToView(c) => {
                let mut v = vec![
                    r("viewId", RefTarget::View, &c.view_id),
                    r("elementId", RefTarget::Element, &c.element_id),
                ];
                if let Some(p) = &c.parent_visual_id {
                    v.push(r("parentVisualId", RefTarget::Visual, p));
                }
                v
            }
            Change::AddConnectionToView(c) => {
                let mut v = vec![
                    r("viewId", RefTarget::View, &c.view_id),
                    r("relationshipId", RefTarget::Relationship, &c.relationship_id),
                ];
                if let Some(s) = &c.source_visual_id {
                    v.push(r("sourceVisualId", RefTarget::Visual, s));
                }
                if let Some(t) = &c.target_visual_id {
                    v.push(r("targetVisualId", RefTarget::Visual, t));
                }
                v
            }
            Change::DeleteConnectionFromView(c) => {
                let mut v = vec![r("connectionId", RefTarget::Connection, &c.connection_id)];
                if let Some(view) = &c.view_id {
                    v.push(r("viewId", RefTarget::View, view));
                }
                v
            }
            Change::MoveViewObject(c) => {
                vec![r("viewObjectId", RefTarget::Visual, &c.view_object_id)]
            }
            Change::StyleViewObject(c) => {
                vec![r("viewObjectId", RefTarget::Visual, &c.view_object_id)]
            }
            Change::StyleConnection(c) => {
                vec![r("connectionId", RefTarget::Connection, &c.connection_id)]
            }
            Change::CreateNote(c) => placed_refs(&c.view_id, c.parent_visual_id.as_deref()),
            Change::CreateGroup(c) => placed_refs(&c.view_id, c.parent_visual_id.as_deref()),
        }
    }

    /// Rewrite every reference field through `f`. A field is replaced when
    /// `f` returns `Some`.
    pub fn rewrite_references(&mut self, mut f: impl FnMut(&str) -> Option<String>) {
        let mut apply = |slot: &mut String| {
            if let Some(new) = f(slot) {
                *slot = new;
            }
        };
        match self {
            Change::CreateElement(c) => c.folder_id.iter_mut().for_each(&mut apply),
            Change::CreateRelationship(c) => {
                apply(&mut c.source_id);
                apply(&mut c.target_id);
            }
            Change::UpdateElement(c) => apply(&mut c.id),
            Change::UpdateRelationship(c) => apply(&mut c.id),
            Change::DeleteElement(c) => apply(&mut c.id),
            Change::DeleteRelationship(c) => apply(&mut c.id),
            Change::SetProperty(c) => apply(&mut c.id),
            Change::CreateFolder(c) => c.parent_id.iter_mut().for_each(&mut apply),
            Change::MoveToFolder(c) => {
                apply(&mut c.id);
                apply(&mut c.folder_id);
            }
            Change::CreateView(c) => c.folder_id.iter_mut().for_each(&mut apply),
            Change::DeleteView(c) => apply(&mut c.view_id),
            Change::DuplicateView(c) => apply(&mut c.view_id),
            Change::SetViewRouter(c) => apply(&mut c.view_id),
            Change::LayoutView(c) => apply(&mut c.view_id),
            Change::AddToView(c) => {
                apply(&mut c.view_id);
                apply(&mut c.element_id);
                c.parent_visual_id.iter_mut().for_each(&mut apply);
            }
            Change::AddConnectionToView(c) => {
                apply(&mut c.view_id);
                apply(&mut c.relationship_id);
                c.source_visual_id.iter_mut().for_each(&mut apply);
                c.target_visual_id.iter_mut().for_each(&mut apply);
            }
            Change::DeleteConnectionFromView(c) => {
                apply(&mut c.connection_id);
                c.view_id.iter_mut().for_each(&mut apply);
            }
            Change::MoveViewObject(c) => apply(&mut c.view_object_id),
            Change::StyleViewObject(c) => apply(&mut c.view_object_id),
            Change::StyleConnection(c) => apply(&mut c.connection_id),
            Change::CreateNote(c) => {
                apply(&mut c.view_id);
                c.parent_visual_id.iter_mut().for_each(&mut apply);
            }
            Change::CreateGroup(c) => {
                apply(&mut c.view_id);
                c.parent_visual_id.iter_mut().for_each(&mut apply);
            }
        }
    }

    /// Parse one raw change, reporting problems against its position in the chunk
    pub fn from_value(index: usize, value: &Value) -> Result<Change, ValidationError> {
        let schema = |op: &str, message: String, field: Option<&str>, hint: String| {
            ValidationError::new(index, op, ValidationErrorKind::Schema, message)
                .with_field(field)
                .with_hint(hint)
        };

        let obj = value.as_object().ok_or_else(|| {
            schema(
                "unknown",
                "change must be an object".to_string(),
                None,
                "wrap the change in {\"op\": ..., ...}".to_string(),
            )
        })?;

        let op = match obj.get("op") {
            Some(Value::String(op)) => op.as_str(),
            _ => {
                return Err(schema(
                    "unknown",
                    "missing or non-string 'op'".to_string(),
                    Some("op"),
                    known_ops_hint(),
                ))
            }
        };
        let kind: ChangeKind = op.parse().map_err(|e: String| {
            schema(op, e, Some("op"), known_ops_hint()).with_value(op)
        })?;

        for field in kind.required_fields() {
            let present = match obj.get(*field) {
                None => false,
                Some(Value::Null) => kind == ChangeKind::SetProperty && *field == "value",
                Some(_) => true,
            };
            if !present {
                return Err(schema(
                    op,
                    format!("missing required field '{}'", field),
                    Some(field),
                    format!("{} requires: {}", op, kind.required_fields().join(", ")),
                ));
            }
        }

        serde_json::from_value::<Change>(value.clone())
            .map_err(|e| schema(op, format!("malformed change: {}", e), None, String::new()))
    }
}

fn placed_refs<'a>(view_id: &'a str, parent: Option<&'a str>) -> Vec<Reference<'a>> {
    let mut v = vec![Reference {
        field: "viewId",
        target: RefTarget::View,
        value: view_id,
    }];
    if let Some(p) = parent {
        v.push(Reference {
            field: "parentVisualId",
            target: RefTarget::Visual,
            value: p,
        });
    }
    v
}

fn known_ops_hint() -> String {
    let ops: Vec<&str> = ChangeKind::ALL.iter().map(|k| k.as_str()).collect();
    format!("op must be one of: {}", ops.join(", "))
}

//! Views (diagrams) and the objects drawn on them

use super::ids::{ConceptId, ConnectionId, FolderId, ViewId, VisualId};
use serde::{Deserialize, Serialize};

/// Default size of a new diagram object
pub const DEFAULT_WIDTH: i32 = 120;
pub const DEFAULT_HEIGHT: i32 = 55;

/// Connection routing style for a whole view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Router {
    #[default]
    Bendpoint,
    Manhattan,
}

impl std::str::FromStr for Router {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bendpoint" => Ok(Router::Bendpoint),
            "manhattan" => Ok(Router::Manhattan),
            other => Err(format!("unknown router type: '{}'", other)),
        }
    }
}

/// A diagram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub id: ViewId,
    pub name: String,
    #[serde(default)]
    pub documentation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewpoint: Option<String>,
    #[serde(default)]
    pub router: Router,
    pub folder: Option<FolderId>,
}

impl View {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ViewId::new(),
            name: name.into(),
            documentation: String::new(),
            viewpoint: None,
            router: Router::default(),
            folder: None,
        }
    }

    pub fn with_id(mut self, id: ViewId) -> Self {
        self.id = id;
        self
    }
}

/// Position and size of a diagram object, relative to its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Bounds {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::new(0, 0, DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }
}

/// Visual style of a diagram object. `None` means "use the default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
}

/// Visual style of a connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_width: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_position: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_color: Option<String>,
}

/// What a diagram object depicts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ViewObjectKind {
    /// Placement of an element
    Element { concept: ConceptId },
    /// Free-text note
    Note { content: String },
    /// Visual grouping box
    Group { name: String },
}

/// An object drawn on a view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewObject {
    pub id: VisualId,
    pub view: ViewId,
    /// Enclosing diagram object; `None` for top-level objects
    pub parent: Option<VisualId>,
    pub kind: ViewObjectKind,
    pub bounds: Bounds,
    #[serde(default)]
    pub style: ObjectStyle,
}

impl ViewObject {
    pub fn new(view: ViewId, kind: ViewObjectKind) -> Self {
        Self {
            id: VisualId::new(),
            view,
            parent: None,
            kind,
            bounds: Bounds::default(),
            style: ObjectStyle::default(),
        }
    }

    /// The concept this object depicts, if it is an element placement
    pub fn concept(&self) -> Option<&ConceptId> {
        match &self.kind {
            ViewObjectKind::Element { concept } => Some(concept),
            _ => None,
        }
    }
}

/// A relationship drawn between two diagram objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewConnection {
    pub id: ConnectionId,
    pub view: ViewId,
    pub relationship: ConceptId,
    pub source: VisualId,
    pub target: VisualId,
    #[serde(default)]
    pub style: ConnectionStyle,
}

impl ViewConnection {
    /// True if either end is attached to `visual`
    pub fn attaches(&self, visual: &VisualId) -> bool {
        &self.source == visual || &self.target == visual
    }
}

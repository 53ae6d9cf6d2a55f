//! Folders: the hierarchical containers concepts and views are filed into

use super::ids::FolderId;
use super::vocabulary::Layer;
use serde::{Deserialize, Serialize};

/// Which root a folder belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderKind {
    /// Holds concepts of one layer
    Layer(Layer),
    /// Holds views
    Views,
}

impl FolderKind {
    pub fn parse(s: &str) -> Result<Self, String> {
        if s == "views" || s == "diagrams" {
            return Ok(FolderKind::Views);
        }
        s.parse::<Layer>().map(FolderKind::Layer)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FolderKind::Layer(layer) => layer.as_str(),
            FolderKind::Views => "views",
        }
    }
}

/// A folder. Root folders have no parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    pub kind: FolderKind,
    pub parent: Option<FolderId>,
}

impl Folder {
    pub fn root(kind: FolderKind) -> Self {
        let name = match kind {
            FolderKind::Layer(Layer::Strategy) => "Strategy",
            FolderKind::Layer(Layer::Business) => "Business",
            FolderKind::Layer(Layer::Application) => "Application",
            FolderKind::Layer(Layer::Technology) => "Technology & Physical",
            FolderKind::Layer(Layer::Physical) => "Physical",
            FolderKind::Layer(Layer::Motivation) => "Motivation",
            FolderKind::Layer(Layer::Implementation) => "Implementation & Migration",
            FolderKind::Layer(Layer::Relations) => "Relations",
            FolderKind::Layer(Layer::Other) => "Other",
            FolderKind::Views => "Views",
        };
        Self {
            id: FolderId::new(),
            name: name.to_string(),
            kind,
            parent: None,
        }
    }

    pub fn child(name: impl Into<String>, parent: &Folder) -> Self {
        Self {
            id: FolderId::new(),
            name: name.into(),
            kind: parent.kind,
            parent: Some(parent.id.clone()),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

//! Concepts: elements (typed nodes) and relationships (typed edges)

use super::ids::{ConceptId, FolderId};
use super::vocabulary::{ElementType, RelationshipType};
use serde::{Deserialize, Serialize};

/// A single user property. Properties keep insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub key: String,
    pub value: String,
}

/// Ordered property list shared by elements and relationships
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(Vec<Property>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|p| p.key == key).map(|p| p.value.as_str())
    }

    /// Set a property, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|p| p.key == key) {
            Some(existing) => Some(std::mem::replace(&mut existing.value, value)),
            None => {
                self.0.push(Property { key, value });
                None
            }
        }
    }

    /// Remove a property, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.0.iter().position(|p| p.key == key)?;
        Some(self.0.remove(idx).value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A typed node in the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ConceptId,
    #[serde(rename = "type")]
    pub element_type: ElementType,
    pub name: String,
    #[serde(default)]
    pub documentation: String,
    #[serde(default)]
    pub properties: Properties,
    /// Containing folder; `None` once detached by a non-cascading delete
    pub folder: Option<FolderId>,
}

impl Element {
    pub fn new(element_type: ElementType, name: impl Into<String>) -> Self {
        Self {
            id: ConceptId::new(),
            element_type,
            name: name.into(),
            documentation: String::new(),
            properties: Properties::new(),
            folder: None,
        }
    }

    pub fn with_id(mut self, id: ConceptId) -> Self {
        self.id = id;
        self
    }

    pub fn with_documentation(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = documentation.into();
        self
    }

    pub fn in_folder(mut self, folder: FolderId) -> Self {
        self.folder = Some(folder);
        self
    }

    /// True while the element is reachable from the folder tree
    pub fn is_attached(&self) -> bool {
        self.folder.is_some()
    }
}

/// A typed, directed edge between two concepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: ConceptId,
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub documentation: String,
    #[serde(default)]
    pub properties: Properties,
    pub source: ConceptId,
    pub target: ConceptId,
    pub folder: Option<FolderId>,
    /// Only meaningful for access relationships
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_type: Option<String>,
    /// Only meaningful for influence relationships
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<String>,
}

impl Relationship {
    pub fn new(relationship_type: RelationshipType, source: ConceptId, target: ConceptId) -> Self {
        Self {
            id: ConceptId::new(),
            relationship_type,
            name: String::new(),
            documentation: String::new(),
            properties: Properties::new(),
            source,
            target,
            folder: None,
            access_type: None,
            strength: None,
        }
    }

    pub fn with_id(mut self, id: ConceptId) -> Self {
        self.id = id;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn in_folder(mut self, folder: FolderId) -> Self {
        self.folder = Some(folder);
        self
    }

    /// True if `concept` is either endpoint
    pub fn touches(&self, concept: &ConceptId) -> bool {
        &self.source == concept || &self.target == concept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_keep_order_and_report_previous_value() {
        let mut props = Properties::new();
        assert_eq!(props.set("owner", "ops"), None);
        props.set("tier", "1");
        assert_eq!(props.set("owner", "platform"), Some("ops".to_string()));

        let keys: Vec<&str> = props.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["owner", "tier"]);
        assert_eq!(props.remove("tier"), Some("1".to_string()));
        assert_eq!(props.len(), 1);
    }

    #[test]
    fn relationship_touches_both_endpoints() {
        let a = ConceptId::from_string("a");
        let b = ConceptId::from_string("b");
        let rel = Relationship::new(RelationshipType::Serving, a.clone(), b.clone());
        assert!(rel.touches(&a));
        assert!(rel.touches(&b));
        assert!(!rel.touches(&ConceptId::from_string("c")));
    }
}

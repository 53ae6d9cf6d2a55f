//! Serialization tests with wire-shaped fixtures

use serde_json::{json, Value};

/// Fixture: an element as the model stores it
fn element_fixture() -> Value {
    json!({
        "id": "id-4f1c",
        "type": "application-component",
        "name": "Billing",
        "documentation": "Handles invoices",
        "properties": [
            { "key": "owner", "value": "finance" }
        ],
        "folder": "id-folder-app"
    })
}

/// Fixture: a relationship between two concepts
fn relationship_fixture() -> Value {
    json!({
        "id": "id-77aa",
        "type": "serving-relationship",
        "source": "id-4f1c",
        "target": "id-9b02",
        "folder": "id-folder-rel"
    })
}

/// Fixture: a diagram object placing an element
fn view_object_fixture() -> Value {
    json!({
        "id": "id-v1",
        "view": "id-view",
        "parent": null,
        "kind": { "kind": "element", "concept": "id-4f1c" },
        "bounds": { "x": 10, "y": 20, "width": 120, "height": 55 },
        "style": { "fillColor": "#ffffb5" }
    })
}

#[cfg(test)]
mod serialization_tests {
    use super::*;
    use crate::model::{
        ConceptId, Element, ElementType, Relationship, RelationshipType, ViewObject,
        ViewObjectKind,
    };

    #[test]
    fn element_deserializes_from_fixture() {
        let element: Element = serde_json::from_value(element_fixture()).unwrap();
        assert_eq!(element.id, ConceptId::from("id-4f1c"));
        assert_eq!(element.element_type, ElementType::ApplicationComponent);
        assert_eq!(element.properties.get("owner"), Some("finance"));
        assert!(element.is_attached());
    }

    #[test]
    fn element_type_serializes_as_wire_name() {
        let element: Element = serde_json::from_value(element_fixture()).unwrap();
        let json = serde_json::to_value(&element).unwrap();
        assert_eq!(json["type"], "application-component");
    }

    #[test]
    fn relationship_defaults_optional_text() {
        let rel: Relationship = serde_json::from_value(relationship_fixture()).unwrap();
        assert_eq!(rel.relationship_type, RelationshipType::Serving);
        assert!(rel.name.is_empty());
        assert!(rel.access_type.is_none());
    }

    #[test]
    fn unknown_element_type_fails_to_deserialize() {
        let mut fixture = element_fixture();
        fixture["type"] = json!("business-wizard");
        let err = serde_json::from_value::<Element>(fixture).unwrap_err();
        assert!(err.to_string().contains("business-wizard"));
    }

    #[test]
    fn view_object_kind_is_tagged() {
        let obj: ViewObject = serde_json::from_value(view_object_fixture()).unwrap();
        assert_eq!(
            obj.kind,
            ViewObjectKind::Element { concept: ConceptId::from("id-4f1c") }
        );
        assert_eq!(obj.style.fill_color.as_deref(), Some("#ffffb5"));
        assert_eq!(obj.bounds.width, 120);
    }
}

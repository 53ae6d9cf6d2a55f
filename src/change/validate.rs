//! Change validation and duplicate detection
//!
//! Errors render as `Change <index> (<op>): <message>`, with duplicates
//! appending ` (id: <existingId>)`. Clients parse this text to recover the
//! pre-existing identifier, so the format must not drift.
//!
//! Duplicate detection is a linear scan over the snapshot and the batch so
//! far. Keep it that way: an index keyed on normalised names would accept or
//! reject different inputs.

use super::types::{Change, Placement};
use crate::model::{ElementType, FolderKind, RelationshipType, Router, Snapshot};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// What went wrong with a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    /// Missing field, wrong shape, unknown op
    Schema,
    /// Element or relationship type outside the vocabulary
    UnknownType,
    /// A field value outside its allowed range or format
    InvalidValue,
    /// The concept already exists in the model or earlier in the batch
    Duplicate,
}

/// A rejected change. Nothing has been applied when this is returned.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("Change {index} ({op}): {message}{}", id_suffix(.existing_id))]
pub struct ValidationError {
    /// 0-based position inside the submitted chunk
    pub index: usize,
    pub op: String,
    pub kind: ValidationErrorKind,
    pub message: String,
    pub field: Option<String>,
    pub value: Option<String>,
    pub hint: Option<String>,
    pub existing_id: Option<String>,
}

fn id_suffix(existing_id: &Option<String>) -> String {
    match existing_id {
        Some(id) => format!(" (id: {})", id),
        None => String::new(),
    }
}

impl ValidationError {
    pub fn new(
        index: usize,
        op: impl Into<String>,
        kind: ValidationErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            index,
            op: op.into(),
            kind,
            message: message.into(),
            field: None,
            value: None,
            hint: None,
            existing_id: None,
        }
    }

    pub fn with_field(mut self, field: Option<&str>) -> Self {
        self.field = field.map(str::to_string);
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Attach a corrective hint; an empty hint is dropped
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        let hint = hint.into();
        self.hint = if hint.is_empty() { None } else { Some(hint) };
        self
    }

    pub fn with_existing_id(mut self, id: Option<String>) -> Self {
        self.existing_id = id;
        self
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self.kind {
            ValidationErrorKind::Duplicate => "DUPLICATE",
            _ => "VALIDATION",
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.kind == ValidationErrorKind::Duplicate
    }
}

#[derive(Debug, Clone)]
struct DeclaredElement {
    index: usize,
    name: String,
    type_name: String,
    temp_id: Option<String>,
}

#[derive(Debug, Clone)]
struct DeclaredRelationship {
    index: usize,
    source: String,
    target: String,
    type_name: String,
    temp_id: Option<String>,
}

/// Concepts declared earlier in the submission currently being validated
#[derive(Debug, Default)]
pub struct BatchContext {
    elements: Vec<DeclaredElement>,
    relationships: Vec<DeclaredRelationship>,
}

impl BatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.elements.len() + self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find_element(&self, name: &str, type_name: &str) -> Option<&DeclaredElement> {
        self.elements
            .iter()
            .find(|e| e.name == name && e.type_name == type_name)
    }

    fn find_relationship(
        &self,
        source: &str,
        target: &str,
        type_name: &str,
    ) -> Option<&DeclaredRelationship> {
        self.relationships
            .iter()
            .find(|r| r.source == source && r.target == target && r.type_name == type_name)
    }
}

/// Schema, value and duplicate checks for changes
#[derive(Debug, Clone, Copy)]
pub struct ChangeValidator {
    require_visual_ids: bool,
}

impl ChangeValidator {
    /// Validator for submitted chunks: every field the builder needs must be present
    pub fn server() -> Self {
        Self {
            require_visual_ids: true,
        }
    }

    /// Validator for change documents, which may leave connection
    /// endpoints for the orchestrator to fill in
    pub fn client() -> Self {
        Self {
            require_visual_ids: false,
        }
    }

    /// Stateless checks over a list: per-change schema and value rules plus
    /// tempId uniqueness.
    pub fn check_schema(&self, changes: &[Change]) -> Result<(), ValidationError> {
        let mut declared: HashMap<&str, usize> = HashMap::new();
        for (index, change) in changes.iter().enumerate() {
            self.check_change(index, change)?;
            if let Some(temp_id) = change.temp_id() {
                if let Some(first) = declared.insert(temp_id, index) {
                    return Err(ValidationError::new(
                        index,
                        change.op(),
                        ValidationErrorKind::Schema,
                        format!("tempId '{}' already declared by change {}", temp_id, first),
                    )
                    .with_field(Some("tempId"))
                    .with_value(temp_id)
                    .with_hint("every tempId must be unique"));
                }
            }
        }
        Ok(())
    }

    /// Full validation of one chunk against a snapshot, recording new
    /// concepts into `ctx` as it goes.
    pub fn validate(
        &self,
        changes: &[Change],
        snapshot: &Snapshot,
        ctx: &mut BatchContext,
    ) -> Result<(), ValidationError> {
        self.check_schema(changes)?;

        for (index, change) in changes.iter().enumerate() {
            match change {
                Change::CreateElement(c) => {
                    let duplicate = |existing_id: Option<String>, message: String| {
                        ValidationError::new(index, change.op(), ValidationErrorKind::Duplicate, message)
                            .with_field(Some("name"))
                            .with_value(c.name.clone())
                            .with_hint("use a different name or type, or reference the existing element")
                            .with_existing_id(existing_id)
                    };
                    if let Some(existing) = snapshot
                        .elements
                        .iter()
                        .find(|e| e.name == c.name && e.type_name == c.element_type)
                    {
                        return Err(duplicate(
                            Some(existing.id.clone()),
                            format!(
                                "element '{}' of type '{}' already exists",
                                c.name, c.element_type
                            ),
                        ));
                    }
                    if let Some(first) = ctx.find_element(&c.name, &c.element_type) {
                        return Err(duplicate(
                            first.temp_id.clone(),
                            format!(
                                "element '{}' of type '{}' already declared by change {}",
                                c.name, c.element_type, first.index
                            ),
                        ));
                    }
                    ctx.elements.push(DeclaredElement {
                        index,
                        name: c.name.clone(),
                        type_name: c.element_type.clone(),
                        temp_id: c.temp_id.clone(),
                    });
                }
                Change::CreateRelationship(c) => {
                    let duplicate = |existing_id: Option<String>, message: String| {
                        ValidationError::new(index, change.op(), ValidationErrorKind::Duplicate, message)
                            .with_field(Some("type"))
                            .with_value(c.relationship_type.clone())
                            .with_hint("a relationship of this type already connects these concepts")
                            .with_existing_id(existing_id)
                    };
                    if let Some(existing) = snapshot.relationships.iter().find(|r| {
                        r.source == c.source_id
                            && r.target == c.target_id
                            && r.type_name == c.relationship_type
                    }) {
                        return Err(duplicate(
                            Some(existing.id.clone()),
                            format!(
                                "relationship '{}' from '{}' to '{}' already exists",
                                c.relationship_type, c.source_id, c.target_id
                            ),
                        ));
                    }
                    if let Some(first) =
                        ctx.find_relationship(&c.source_id, &c.target_id, &c.relationship_type)
                    {
                        return Err(duplicate(
                            first.temp_id.clone(),
                            format!(
                                "relationship '{}' from '{}' to '{}' already declared by change {}",
                                c.relationship_type, c.source_id, c.target_id, first.index
                            ),
                        ));
                    }
                    ctx.relationships.push(DeclaredRelationship {
                        index,
                        source: c.source_id.clone(),
                        target: c.target_id.clone(),
                        type_name: c.relationship_type.clone(),
                        temp_id: c.temp_id.clone(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Schema and value rules for a single change
    pub fn check_change(&self, index: usize, change: &Change) -> Result<(), ValidationError> {
        let op = change.op();
        let invalid = |field: &str, value: String, message: String, hint: &str| {
            ValidationError::new(index, op, ValidationErrorKind::InvalidValue, message)
                .with_field(Some(field))
                .with_value(value)
                .with_hint(hint)
        };
        let missing = |field: &str| {
            ValidationError::new(
                index,
                op,
                ValidationErrorKind::Schema,
                format!("missing required field '{}'", field),
            )
            .with_field(Some(field))
        };

        match change {
            Change::CreateElement(c) => {
                c.element_type.parse::<ElementType>().map_err(|_| {
                    ValidationError::new(
                        index,
                        op,
                        ValidationErrorKind::UnknownType,
                        format!("unknown element type '{}'", c.element_type),
                    )
                    .with_field(Some("type"))
                    .with_value(c.element_type.clone())
                    .with_hint("use a kebab-case element type such as 'business-actor'")
                })?;
                non_empty(index, op, "name", &c.name)?;
            }
            Change::CreateRelationship(c) => {
                c.relationship_type.parse::<RelationshipType>().map_err(|_| {
                    ValidationError::new(
                        index,
                        op,
                        ValidationErrorKind::UnknownType,
                        format!("unknown relationship type '{}'", c.relationship_type),
                    )
                    .with_field(Some("type"))
                    .with_value(c.relationship_type.clone())
                    .with_hint("relationship types end in '-relationship', e.g. 'serving-relationship'")
                })?;
                check_access_type(index, op, c.access_type.as_deref())?;
            }
            Change::UpdateRelationship(c) => check_access_type(index, op, c.access_type.as_deref())?,
            Change::SetProperty(c) => non_empty(index, op, "key", &c.key)?,
            Change::CreateFolder(c) => {
                non_empty(index, op, "name", &c.name)?;
                match (&c.parent_id, &c.parent_type) {
                    (None, None) => {
                        return Err(missing("parentId").with_hint(
                            "createFolder needs either parentId or parentType",
                        ))
                    }
                    (_, Some(kind)) => {
                        FolderKind::parse(kind).map_err(|e| {
                            invalid("parentType", kind.clone(), e, "use a layer name or 'views'")
                        })?;
                    }
                    _ => {}
                }
            }
            Change::CreateView(c) => non_empty(index, op, "name", &c.name)?,
            Change::SetViewRouter(c) => {
                c.router_type.parse::<Router>().map_err(|e| {
                    invalid("routerType", c.router_type.clone(), e, "use 'bendpoint' or 'manhattan'")
                })?;
            }
            Change::LayoutView(c) => {
                if let Some(spacing) = c.spacing {
                    if spacing <= 0 {
                        return Err(invalid(
                            "spacing",
                            spacing.to_string(),
                            format!("spacing must be positive, got {}", spacing),
                            "",
                        ));
                    }
                }
            }
            Change::AddToView(c) => check_placement(index, op, &c.placement)?,
            Change::AddConnectionToView(c) => {
                if self.require_visual_ids {
                    if c.source_visual_id.is_none() {
                        return Err(missing("sourceVisualId")
                            .with_hint("give the visual id of the relationship's source on this view"));
                    }
                    if c.target_visual_id.is_none() {
                        return Err(missing("targetVisualId")
                            .with_hint("give the visual id of the relationship's target on this view"));
                    }
                }
            }
            Change::MoveViewObject(c) => check_placement(index, op, &c.placement)?,
            Change::StyleViewObject(c) => {
                check_color(index, op, "fillColor", c.fill_color.as_deref())?;
                check_color(index, op, "lineColor", c.line_color.as_deref())?;
                check_color(index, op, "fontColor", c.font_color.as_deref())?;
                check_range(index, op, "opacity", c.opacity, 0, 255)?;
            }
            Change::StyleConnection(c) => {
                check_color(index, op, "lineColor", c.line_color.as_deref())?;
                check_color(index, op, "fontColor", c.font_color.as_deref())?;
                check_range(index, op, "lineWidth", c.line_width, 1, 3)?;
                check_range(index, op, "textPosition", c.text_position, 0, 2)?;
            }
            Change::CreateNote(c) => check_placement(index, op, &c.placement)?,
            Change::CreateGroup(c) => {
                non_empty(index, op, "name", &c.name)?;
                check_placement(index, op, &c.placement)?;
            }
            Change::UpdateElement(_)
            | Change::DeleteElement(_)
            | Change::DeleteRelationship(_)
            | Change::MoveToFolder(_)
            | Change::DeleteView(_)
            | Change::DuplicateView(_)
            | Change::DeleteConnectionFromView(_) => {}
        }
        Ok(())
    }
}

impl Default for ChangeValidator {
    fn default() -> Self {
        Self::server()
    }
}

/// Access modes accepted on access relationships
pub const ACCESS_TYPES: [&str; 4] = ["write", "read", "access", "readwrite"];

fn non_empty(index: usize, op: &str, field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(
            ValidationError::new(index, op, ValidationErrorKind::InvalidValue, format!("'{}' must not be empty", field))
                .with_field(Some(field))
                .with_value(value),
        );
    }
    Ok(())
}

fn check_access_type(index: usize, op: &str, value: Option<&str>) -> Result<(), ValidationError> {
    match value {
        Some(v) if !ACCESS_TYPES.contains(&v) => Err(ValidationError::new(
            index,
            op,
            ValidationErrorKind::InvalidValue,
            format!("invalid accessType '{}'", v),
        )
        .with_field(Some("accessType"))
        .with_value(v)
        .with_hint(format!("accessType must be one of: {}", ACCESS_TYPES.join(", ")))),
        _ => Ok(()),
    }
}

/// `#rrggbb`
fn is_hex_color(s: &str) -> bool {
    s.len() == 7
        && s.starts_with('#')
        && s[1..].chars().all(|c| c.is_ascii_hexdigit())
}

fn check_color(index: usize, op: &str, field: &str, value: Option<&str>) -> Result<(), ValidationError> {
    match value {
        Some(v) if !is_hex_color(v) => Err(ValidationError::new(
            index,
            op,
            ValidationErrorKind::InvalidValue,
            format!("invalid color '{}' for {}", v, field),
        )
        .with_field(Some(field))
        .with_value(v)
        .with_hint("colors are written as #rrggbb")),
        _ => Ok(()),
    }
}

fn check_range(
    index: usize,
    op: &str,
    field: &str,
    value: Option<i64>,
    min: i64,
    max: i64,
) -> Result<(), ValidationError> {
    match value {
        Some(v) if v < min || v > max => Err(ValidationError::new(
            index,
            op,
            ValidationErrorKind::InvalidValue,
            format!("{} must be between {} and {}, got {}", field, min, max, v),
        )
        .with_field(Some(field))
        .with_value(v.to_string())),
        _ => Ok(()),
    }
}

fn check_placement(index: usize, op: &str, placement: &Placement) -> Result<(), ValidationError> {
    for (field, value) in [("width", placement.width), ("height", placement.height)] {
        if let Some(v) = value {
            if v <= 0 && v != -1 {
                return Err(ValidationError::new(
                    index,
                    op,
                    ValidationErrorKind::InvalidValue,
                    format!("{} must be positive, got {}", field, v),
                )
                .with_field(Some(field))
                .with_value(v.to_string())
                .with_hint("use -1 for the default size"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SnapshotElement, SnapshotRelationship};
    use serde_json::json;

    fn parse(values: Vec<serde_json::Value>) -> Vec<Change> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Change::from_value(i, v).unwrap())
            .collect()
    }

    fn snapshot_with_customer() -> Snapshot {
        Snapshot {
            elements: vec![SnapshotElement {
                id: "id-customer".into(),
                name: "Customer".into(),
                type_name: "business-actor".into(),
            }],
            relationships: vec![SnapshotRelationship {
                id: "id-rel".into(),
                source: "id-a".into(),
                target: "id-b".into(),
                type_name: "serving-relationship".into(),
            }],
            taken_at: None,
        }
    }

    // === Scenario: element duplicate against the snapshot names the existing id ===
    #[test]
    fn duplicate_element_in_snapshot_reports_existing_id() {
        let changes = parse(vec![
            json!({"op": "createElement", "type": "business-role", "name": "Clerk"}),
            json!({"op": "createElement", "type": "business-actor", "name": "Customer", "tempId": "t1"}),
        ]);
        let err = ChangeValidator::server()
            .validate(&changes, &snapshot_with_customer(), &mut BatchContext::new())
            .unwrap_err();

        assert_eq!(err.kind, ValidationErrorKind::Duplicate);
        assert_eq!(err.code(), "DUPLICATE");
        assert_eq!(
            err.to_string(),
            "Change 1 (createElement): element 'Customer' of type 'business-actor' already exists (id: id-customer)"
        );
    }

    // === Scenario: same name with a different type is not a duplicate ===
    #[test]
    fn same_name_different_type_is_accepted() {
        let changes = parse(vec![
            json!({"op": "createElement", "type": "business-role", "name": "Customer"}),
        ]);
        ChangeValidator::server()
            .validate(&changes, &snapshot_with_customer(), &mut BatchContext::new())
            .unwrap();
    }

    // === Scenario: intra-batch duplicate names the first occurrence ===
    #[test]
    fn intra_batch_duplicate_reports_first_temp_id() {
        let changes = parse(vec![
            json!({"op": "createElement", "type": "node", "name": "Db", "tempId": "t-db"}),
            json!({"op": "createElement", "type": "node", "name": "Db", "tempId": "t-db2"}),
        ]);
        let mut ctx = BatchContext::new();
        let err = ChangeValidator::server()
            .validate(&changes, &Snapshot::empty(), &mut ctx)
            .unwrap_err();

        assert_eq!(err.index, 1);
        assert_eq!(err.existing_id.as_deref(), Some("t-db"));
        assert!(err.to_string().ends_with("(id: t-db)"));
        assert_eq!(ctx.len(), 1);
    }

    // === Scenario: relationship uniqueness ignores the name ===
    #[test]
    fn relationship_duplicate_ignores_name() {
        let changes = parse(vec![json!({
            "op": "createRelationship",
            "type": "serving-relationship",
            "sourceId": "id-a",
            "targetId": "id-b",
            "name": "different"
        })]);
        let err = ChangeValidator::server()
            .validate(&changes, &snapshot_with_customer(), &mut BatchContext::new())
            .unwrap_err();
        assert_eq!(err.existing_id.as_deref(), Some("id-rel"));

        let reversed = parse(vec![json!({
            "op": "createRelationship",
            "type": "serving-relationship",
            "sourceId": "id-b",
            "targetId": "id-a"
        })]);
        ChangeValidator::server()
            .validate(&reversed, &snapshot_with_customer(), &mut BatchContext::new())
            .unwrap();
    }

    #[test]
    fn unknown_element_type_names_the_value() {
        let changes = parse(vec![json!({"op": "createElement", "type": "wizard", "name": "W"})]);
        let err = ChangeValidator::server().check_schema(&changes).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::UnknownType);
        assert_eq!(err.value.as_deref(), Some("wizard"));
        assert!(err.to_string().contains("'wizard'"));
    }

    #[test]
    fn server_requires_visual_ids_but_client_does_not() {
        let changes = parse(vec![json!({
            "op": "addConnectionToView",
            "viewId": "v",
            "relationshipId": "r",
            "sourceVisualId": "vs"
        })]);
        let err = ChangeValidator::server().check_schema(&changes).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("targetVisualId"));
        ChangeValidator::client().check_schema(&changes).unwrap();
    }

    #[test]
    fn value_rules_are_enforced() {
        let cases = vec![
            (json!({"op": "styleViewObject", "viewObjectId": "v", "fillColor": "red"}), "fillColor"),
            (json!({"op": "styleViewObject", "viewObjectId": "v", "opacity": 300}), "opacity"),
            (json!({"op": "styleConnection", "connectionId": "c", "lineWidth": 4}), "lineWidth"),
            (json!({"op": "styleConnection", "connectionId": "c", "textPosition": 3}), "textPosition"),
            (json!({"op": "addToView", "viewId": "v", "elementId": "e", "width": 0}), "width"),
            (json!({"op": "setViewRouter", "viewId": "v", "routerType": "curvy"}), "routerType"),
            (json!({"op": "createFolder", "name": "F"}), "parentId"),
            (json!({"op": "createRelationship", "type": "access-relationship", "sourceId": "a", "targetId": "b", "accessType": "delete"}), "accessType"),
        ];
        for (value, field) in cases {
            let changes = parse(vec![value]);
            let err = ChangeValidator::server().check_schema(&changes).unwrap_err();
            assert_eq!(err.field.as_deref(), Some(field), "{}", err);
        }
    }

    #[test]
    fn default_size_marker_is_accepted() {
        let changes = parse(vec![
            json!({"op": "createNote", "viewId": "v", "content": "hi", "width": -1, "height": -1}),
        ]);
        ChangeValidator::server().check_schema(&changes).unwrap();
    }

    #[test]
    fn repeated_temp_id_is_a_schema_error() {
        let changes = parse(vec![
            json!({"op": "createView", "name": "A", "tempId": "t"}),
            json!({"op": "createView", "name": "B", "tempId": "t"}),
        ]);
        let err = ChangeValidator::server().check_schema(&changes).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.kind, ValidationErrorKind::Schema);
    }
}

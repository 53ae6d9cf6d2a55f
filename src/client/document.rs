//! Change documents: loading, include flattening, and pre-submission checks
//!
//! A document is JSON or YAML:
//!
//! ```yaml
//! version: "1"
//! description: application layer
//! changes:
//!   - { op: createElement, type: application-component, name: Billing, tempId: billing }
//! includes: [views.yaml]
//! idFiles: [elements.ids.json]
//! ```
//!
//! Include and idFile paths are relative to the declaring document. A
//! document's own changes come first, then each include in order.

use crate::change::{Change, ChangeValidator, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid YAML in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unsupported document format: {} (expected .json, .yaml or .yml)", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("{}: {source}", path.display())]
    InvalidChange {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },

    #[error("include cycle: {}", format_chain(.chain))]
    IncludeCycle { chain: Vec<PathBuf> },

    #[error("tempId '{temp_id}' declared by change {first} and again by change {second}")]
    DuplicateTempId {
        temp_id: String,
        first: usize,
        second: usize,
    },

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl DocumentError {
    pub fn code(&self) -> &'static str {
        match self {
            DocumentError::Io { .. } => "IO",
            DocumentError::Json { .. } | DocumentError::Yaml { .. } => "PARSE",
            DocumentError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            DocumentError::InvalidChange { .. } | DocumentError::Invalid(_) => "INVALID_CHANGE",
            DocumentError::IncludeCycle { .. } => "INCLUDE_CYCLE",
            DocumentError::DuplicateTempId { .. } => "DUPLICATE_TEMP_ID",
        }
    }
}

pub type DocumentResult<T> = Result<T, DocumentError>;

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// One document file as written
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDocument {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub changes: Vec<Value>,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub id_files: Vec<String>,
}

impl ChangeDocument {
    /// Read a document, picking the format from the extension
    pub fn load(path: &Path) -> DocumentResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("json") => serde_json::from_str(&text).map_err(|source| DocumentError::Json {
                path: path.to_path_buf(),
                source,
            }),
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&text).map_err(|source| DocumentError::Yaml {
                    path: path.to_path_buf(),
                    source,
                })
            }
            _ => Err(DocumentError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Parse this document's own changes, indexed within the document
    fn parse_changes(&self, path: &Path) -> DocumentResult<Vec<Change>> {
        self.changes
            .iter()
            .enumerate()
            .map(|(index, value)| {
                Change::from_value(index, value).map_err(|source| DocumentError::InvalidChange {
                    path: path.to_path_buf(),
                    source,
                })
            })
            .collect()
    }
}

/// Where a flattened change came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeOrigin {
    pub file: PathBuf,
    pub index: usize,
}

/// A document with its includes inlined, ready to chunk
#[derive(Debug, Clone, Default)]
pub struct FlattenedDocument {
    pub description: Option<String>,
    pub changes: Vec<Change>,
    pub origins: Vec<ChangeOrigin>,
    /// idFiles of every visited document, resolved against their declarer
    pub id_files: Vec<PathBuf>,
}

impl FlattenedDocument {
    /// Load `path`, inline its includes, and run the whole-document checks
    pub fn load(path: &Path) -> DocumentResult<Self> {
        let mut flat = FlattenedDocument::default();
        let mut stack = Vec::new();
        flatten_into(path, &mut stack, &mut flat)?;
        flat.check()?;
        Ok(flat)
    }

    /// Build from in-memory changes; checks as `load` does
    pub fn from_changes(changes: Vec<Change>) -> DocumentResult<Self> {
        let origins = (0..changes.len())
            .map(|index| ChangeOrigin {
                file: PathBuf::new(),
                index,
            })
            .collect();
        let flat = FlattenedDocument {
            description: None,
            changes,
            origins,
            id_files: Vec::new(),
        };
        flat.check()?;
        Ok(flat)
    }

    pub fn from_values(values: &[Value]) -> DocumentResult<Self> {
        let changes = values
            .iter()
            .enumerate()
            .map(|(index, value)| Change::from_value(index, value))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_changes(changes)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Unique tempIds first, then the client-side schema rules over the
    /// flattened list.
    fn check(&self) -> DocumentResult<()> {
        let mut declared: HashMap<&str, usize> = HashMap::new();
        for (index, change) in self.changes.iter().enumerate() {
            if let Some(temp_id) = change.temp_id() {
                if let Some(first) = declared.insert(temp_id, index) {
                    return Err(DocumentError::DuplicateTempId {
                        temp_id: temp_id.to_string(),
                        first,
                        second: index,
                    });
                }
            }
        }
        ChangeValidator::client().check_schema(&self.changes)?;
        Ok(())
    }
}

fn flatten_into(path: &Path, stack: &mut Vec<PathBuf>, flat: &mut FlattenedDocument) -> DocumentResult<()> {
    let canonical = path.canonicalize().map_err(|source| DocumentError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if stack.contains(&canonical) {
        let mut chain = stack.clone();
        chain.push(canonical);
        return Err(DocumentError::IncludeCycle { chain });
    }

    let doc = ChangeDocument::load(&canonical)?;
    let changes = doc.parse_changes(&canonical)?;
    if flat.description.is_none() {
        flat.description = doc.description.clone();
    }
    for (index, change) in changes.into_iter().enumerate() {
        flat.changes.push(change);
        flat.origins.push(ChangeOrigin {
            file: canonical.clone(),
            index,
        });
    }

    let base = canonical.parent().map(Path::to_path_buf).unwrap_or_default();
    for id_file in &doc.id_files {
        let resolved = base.join(id_file);
        if !flat.id_files.contains(&resolved) {
            flat.id_files.push(resolved);
        }
    }

    stack.push(canonical);
    for include in &doc.includes {
        flatten_into(&base.join(include), stack, flat)?;
    }
    stack.pop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    // === Scenario: includes are inlined after the parent's own changes ===
    #[test]
    fn includes_flatten_depth_first() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "child.yaml",
            "version: '1'\nchanges:\n  - { op: createElement, type: goal, name: Child, tempId: c }\nidFiles: [child.ids.json]\n",
        );
        let root = write(
            dir.path(),
            "root.json",
            &json!({
                "version": "1",
                "description": "root",
                "changes": [{"op": "createElement", "type": "goal", "name": "Root", "tempId": "r"}],
                "includes": ["child.yaml"]
            })
            .to_string(),
        );

        let flat = FlattenedDocument::load(&root).unwrap();
        assert_eq!(flat.len(), 2);
        assert_eq!(flat.changes[0].temp_id(), Some("r"));
        assert_eq!(flat.changes[1].temp_id(), Some("c"));
        assert_eq!(flat.origins[1].index, 0);
        assert!(flat.origins[1].file.ends_with("child.yaml"));
        assert_eq!(flat.description.as_deref(), Some("root"));
        assert!(flat.id_files[0].ends_with("child.ids.json"));
    }

    // === Scenario: a cycle is reported with the include path ===
    #[test]
    fn include_cycle_names_the_path() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.json", r#"{"version": "1", "includes": ["b.json"]}"#);
        write(dir.path(), "b.json", r#"{"version": "1", "includes": ["a.json"]}"#);

        let err = FlattenedDocument::load(&dir.path().join("a.json")).unwrap_err();
        match &err {
            DocumentError::IncludeCycle { chain } => {
                assert_eq!(chain.len(), 3);
                assert!(chain[0].ends_with("a.json"));
                assert!(chain[2].ends_with("a.json"));
            }
            other => panic!("expected cycle, got {other}"),
        }
        assert_eq!(err.code(), "INCLUDE_CYCLE");
    }

    #[test]
    fn duplicate_temp_ids_across_files_fail() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "child.json",
            r#"{"version": "1", "changes": [{"op": "createElement", "type": "goal", "name": "B", "tempId": "x"}]}"#,
        );
        let root = write(
            dir.path(),
            "root.json",
            r#"{"version": "1", "changes": [{"op": "createElement", "type": "goal", "name": "A", "tempId": "x"}], "includes": ["child.json"]}"#,
        );
        let err = FlattenedDocument::load(&root).unwrap_err();
        assert!(matches!(
            err,
            DocumentError::DuplicateTempId { ref temp_id, first: 0, second: 1 } if temp_id == "x"
        ));
    }

    #[test]
    fn bad_change_names_file_and_index() {
        let dir = tempdir().unwrap();
        let root = write(
            dir.path(),
            "root.json",
            r#"{"version": "1", "changes": [{"op": "createElement", "type": "goal", "name": "A"}, {"op": "createElement", "name": "B"}]}"#,
        );
        let err = FlattenedDocument::load(&root).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("root.json"));
        assert!(message.contains("Change 1 (createElement)"));
    }

    #[test]
    fn flattened_list_is_revalidated() {
        let err = FlattenedDocument::from_values(&[
            json!({"op": "createElement", "type": "no-such-type", "name": "A"}),
        ])
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_CHANGE");
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "doc.txt", "version: 1");
        assert!(matches!(
            ChangeDocument::load(&path),
            Err(DocumentError::UnsupportedFormat { .. })
        ));
    }
}

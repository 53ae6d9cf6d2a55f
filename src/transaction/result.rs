//! Per-op results reported back to the caller

use crate::change::ChangeKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outcome of one change inside a committed chunk
///
/// `realId` is the identifier the change's tempId now stands for. The
/// remaining fields are flattened in: namespaced new ids (`conceptId`,
/// `visualId`, `connectionId`, `viewId`, `folderId`, `noteId`, `groupId`)
/// plus echoed input so callers never need a follow-up read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpResult {
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_id: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl OpResult {
    pub fn new(kind: ChangeKind) -> Self {
        Self::named(kind.as_str())
    }

    /// Result for an operation that is not a change, such as `undo`
    pub fn named(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            temp_id: None,
            real_id: None,
            fields: Map::new(),
        }
    }

    /// Record the tempId binding produced by this change
    pub fn bind(mut self, temp_id: Option<&str>, real_id: impl Into<String>) -> Self {
        self.temp_id = temp_id.map(str::to_string);
        self.real_id = Some(real_id.into());
        self
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Set `key` only when `value` is present
    pub fn field_opt<V: Into<Value>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.field(key, v),
            None => self,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// The (tempId, realId) pair if this change declared a tempId
    pub fn binding(&self) -> Option<(&str, &str)> {
        match (&self.temp_id, &self.real_id) {
            (Some(t), Some(r)) => Some((t.as_str(), r.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_serializes_flat() {
        let result = OpResult::new(ChangeKind::AddToView)
            .bind(Some("t-v"), "id-v")
            .field("visualId", "id-v")
            .field_opt::<String>("parentVisualId", None);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["op"], "addToView");
        assert_eq!(json["tempId"], "t-v");
        assert_eq!(json["visualId"], "id-v");
        assert!(json.get("parentVisualId").is_none());

        let back: OpResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.binding(), Some(("t-v", "id-v")));
        assert_eq!(back.get_str("visualId"), Some("id-v"));
    }
}

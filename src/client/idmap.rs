//! Cumulative tempId → real id mapping for a run, and its sidecar file

use super::document::{DocumentError, DocumentResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Running tempId bindings.
///
/// A value may itself be a tempId (an intra-batch duplicate bound to its
/// first occurrence); [`TempIdMap::resolve`] follows such chains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempIdMap {
    bindings: BTreeMap<String, String>,
}

impl TempIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn contains(&self, temp_id: &str) -> bool {
        self.bindings.contains_key(temp_id)
    }

    /// The direct binding of `temp_id`, without following chains
    pub fn get(&self, temp_id: &str) -> Option<&str> {
        self.bindings.get(temp_id).map(String::as_str)
    }

    pub fn bind(&mut self, temp_id: impl Into<String>, real_id: impl Into<String>) {
        let temp_id = temp_id.into();
        let real_id = real_id.into();
        if temp_id != real_id {
            self.bindings.insert(temp_id, real_id);
        }
    }

    pub fn extend(&mut self, other: &TempIdMap) {
        for (k, v) in &other.bindings {
            self.bind(k.clone(), v.clone());
        }
    }

    /// Resolve `token` to the end of its binding chain.
    ///
    /// Returns None when `token` is not bound at all. Chains are followed at
    /// most `len()` steps so a cycle cannot loop forever.
    pub fn resolve(&self, token: &str) -> Option<String> {
        let mut current = self.bindings.get(token)?;
        for _ in 0..self.bindings.len() {
            match self.bindings.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        Some(current.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Load a sidecar: a flat JSON object of `tempId: realId`
    pub fn load(path: &Path) -> DocumentResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| DocumentError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the sidecar with sorted keys
    pub fn save(&self, path: &Path) -> DocumentResult<()> {
        let text = serde_json::to_string_pretty(self).map_err(|source| DocumentError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let io = |source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        std::fs::write(path, text + "\n").map_err(io)
    }
}

impl FromIterator<(String, String)> for TempIdMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut map = TempIdMap::new();
        for (k, v) in iter {
            map.bind(k, v);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolve_follows_chains() {
        let mut map = TempIdMap::new();
        map.bind("dup", "first");
        map.bind("first", "id-1");
        assert_eq!(map.resolve("dup").as_deref(), Some("id-1"));
        assert_eq!(map.get("dup"), Some("first"));
        assert_eq!(map.resolve("unbound"), None);
    }

    #[test]
    fn resolve_terminates_on_cycles() {
        let mut map = TempIdMap::new();
        map.bind("a", "b");
        map.bind("b", "a");
        assert!(map.resolve("a").is_some());
    }

    #[test]
    fn self_binding_is_ignored() {
        let mut map = TempIdMap::new();
        map.bind("x", "x");
        assert!(map.is_empty());
    }

    #[test]
    fn sidecar_is_written_sorted_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ids.json");
        let map: TempIdMap = [("zeta", "id-2"), ("alpha", "id-1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        map.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.find("alpha").unwrap() < text.find("zeta").unwrap());
        assert_eq!(TempIdMap::load(&path).unwrap(), map);
    }

    #[test]
    fn malformed_sidecar_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ids.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        let err = TempIdMap::load(&path).unwrap_err();
        assert!(matches!(err, DocumentError::Json { .. }));
    }
}

//! Splitting a flattened document into ordered, size-bounded chunks

use crate::change::Change;
use std::collections::BTreeSet;

/// A contiguous slice of the flattened document submitted as one operation
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub index: usize,
    /// Position of the first change in the flattened document
    pub offset: usize,
    pub changes: Vec<Change>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// tempIds declared by creates in this chunk
    pub fn declared_temp_ids(&self) -> BTreeSet<String> {
        self.changes
            .iter()
            .filter_map(|c| c.temp_id().map(str::to_string))
            .collect()
    }

    /// Every reference value in this chunk, as currently written
    pub fn referenced_tokens(&self) -> BTreeSet<String> {
        self.changes
            .iter()
            .flat_map(|c| c.references())
            .map(|r| r.value.to_string())
            .collect()
    }
}

/// Split `changes` in order into chunks of at most `size` changes.
/// A size of zero is treated as one.
pub fn split_chunks(changes: &[Change], size: usize) -> Vec<Chunk> {
    changes
        .chunks(size.max(1))
        .enumerate()
        .map(|(index, slice)| Chunk {
            index,
            offset: index * size.max(1),
            changes: slice.to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn elements(n: usize) -> Vec<Change> {
        (0..n)
            .map(|i| {
                let value = json!({"op": "createElement", "type": "goal", "name": format!("G{i}"), "tempId": format!("g{i}")});
                Change::from_value(i, &value).unwrap()
            })
            .collect()
    }

    #[test]
    fn twenty_five_at_eight_gives_four_chunks() {
        let chunks = split_chunks(&elements(25), 8);
        let sizes: Vec<usize> = chunks.iter().map(Chunk::len).collect();
        assert_eq!(sizes, vec![8, 8, 8, 1]);
        assert_eq!(chunks[3].offset, 24);
        assert!(chunks[3].declared_temp_ids().contains("g24"));
    }

    #[test]
    fn referenced_tokens_lists_reference_fields() {
        let value = json!({"op": "createRelationship", "type": "influence-relationship", "sourceId": "a", "targetId": "b"});
        let chunk = Chunk {
            index: 0,
            offset: 0,
            changes: vec![Change::from_value(0, &value).unwrap()],
        };
        let tokens: Vec<String> = chunk.referenced_tokens().into_iter().collect();
        assert_eq!(tokens, vec!["a", "b"]);
        assert!(chunk.declared_temp_ids().is_empty());
    }

    #[test]
    fn zero_size_does_not_panic() {
        assert_eq!(split_chunks(&elements(3), 0).len(), 3);
    }
}

//! Identifier namespaces
//!
//! Concept, visual, connection, view and folder ids are distinct types so a
//! visual id can never be passed where a concept id is expected. All of them
//! serialize as plain strings.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix shared by every generated identifier.
pub const ID_PREFIX: &str = "id-";

/// Generate a fresh identifier string (`id-` followed by 32 hex digits).
pub fn generate_id() -> String {
    format!("{}{}", ID_PREFIX, Uuid::new_v4().simple())
}

macro_rules! model_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random id
            pub fn new() -> Self {
                Self(generate_id())
            }

            /// Wrap an existing id string
            pub fn from_string(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

model_id!(
    /// Identifier of a concept (element or relationship)
    ConceptId
);
model_id!(
    /// Identifier of a diagram object: an element placement, a note or a group
    VisualId
);
model_id!(
    /// Identifier of a connection drawn on a view
    ConnectionId
);
model_id!(
    /// Identifier of a view (diagram)
    ViewId
);
model_id!(
    /// Identifier of a folder
    FolderId
);

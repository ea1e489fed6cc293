//! Schema entries

use serde::{Deserialize, Serialize};
use std::fmt;

/// An immutable `(id, schema)` pair registered in a subject.
///
/// Once an id has been handed out for a subject its schema text never changes,
/// so entries may be cached indefinitely by id or by schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaEntry {
    id: String,
    schema: String,
}

impl SchemaEntry {
    /// Create a new schema entry
    pub fn new(id: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            schema: schema.into(),
        }
    }

    /// Parse the `id<TAB>schema` line form written by [`fmt::Display`].
    ///
    /// Only the first tab separates the two halves, the schema may contain more.
    pub fn from_line(line: &str) -> Option<Self> {
        let (id, schema) = line.split_once('\t')?;
        if id.is_empty() {
            return None;
        }
        Some(Self::new(id, schema))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn into_parts(self) -> (String, String) {
        (self.id, self.schema)
    }
}

impl fmt::Display for SchemaEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.id, self.schema)
    }
}

//! Index identity and key derivation.
//!
//! The primary index's key is always a document's id. A secondary index is
//! defined by an ordered list of fields projected out of the document
//! value; its key is those fields' sort keys concatenated, each
//! length-prefixed so that field boundaries can't be confused by
//! variable-length encodings. Single-valued fields only -- multi-valued
//! index projections (one document producing several keys on the same
//! index) are not supported by this type.
use serde::{
    Deserialize,
    Serialize,
};
use value::{
    DocumentId,
    TableName,
    Value,
};

/// Identifies one index: a table plus a name unique within that table.
/// `"by_id"` is reserved for the primary index every table has implicitly.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexName {
    pub table: TableName,
    pub name: String,
}

impl IndexName {
    pub fn new(table: TableName, name: impl Into<String>) -> Self {
        Self {
            table,
            name: name.into(),
        }
    }

    pub fn primary(table: TableName) -> Self {
        Self::new(table, "by_id")
    }

    pub fn is_primary(&self) -> bool {
        self.name == "by_id"
    }
}

impl std::fmt::Display for IndexName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.table, self.name)
    }
}

/// A single-valued secondary index: an ordered projection of fields out of
/// a document's value. Every document in the index's table participates,
/// producing exactly one key -- multi-valued projections are explicitly
/// unsupported by this type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: IndexName,
    pub fields: Vec<String>,
}

impl IndexDefinition {
    pub fn new(name: IndexName, fields: Vec<String>) -> Self {
        Self { name, fields }
    }

    /// Derive this index's key for `id`'s value. The key is the id's sort
    /// key appended after the projected fields, so that two documents with
    /// identical indexed field values still sort deterministically (and so
    /// the primary index's `by_id` definition, whose `fields` is empty,
    /// degenerates to exactly the id's own key).
    pub fn key_for(&self, id: &DocumentId, value: &Value) -> Vec<u8> {
        let mut out = Vec::new();
        for field in &self.fields {
            let projected = value.get_field(field);
            let key = projected.sort_key();
            out.extend_from_slice(&(key.len() as u32).to_be_bytes());
            out.extend_from_slice(&key);
        }
        out.extend_from_slice(id.internal_id.to_string().as_bytes());
        out
    }
}

//! Per-table schemas consulted before a write is staged. A table with no
//! registered schema accepts any object-shaped document unchecked -- the
//! cache only ever tightens what's accepted, never loosens it.
use std::collections::BTreeMap;

use value::{
    TableName,
    Value,
};

/// The fields a document in a table is required to carry. This engine
/// tracks field presence only, not value types.
#[derive(Clone, Debug, Default)]
pub struct TableSchema {
    pub required_fields: Vec<String>,
}

impl TableSchema {
    pub fn new(required_fields: Vec<String>) -> Self {
        Self { required_fields }
    }

    fn check(&self, value: &Value) -> anyhow::Result<()> {
        let Value::Object(fields) = value else {
            anyhow::bail!(errors::ErrorMetadata::invalid_write("document values must be objects"));
        };
        for field in &self.required_fields {
            if !fields.contains_key(field) {
                anyhow::bail!(errors::ErrorMetadata::invalid_write(format!(
                    "document is missing required field {field:?}"
                )));
            }
        }
        Ok(())
    }
}

/// The set of schemas consulted on every write. Built once at startup and
/// shared read-only across transactions.
#[derive(Clone, Debug, Default)]
pub struct SchemaCache {
    schemas: BTreeMap<TableName, TableSchema>,
}

impl SchemaCache {
    pub fn new(schemas: BTreeMap<TableName, TableSchema>) -> Self {
        Self { schemas }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Validate `value` against `table`'s schema, if one is registered.
    pub fn check(&self, table: &TableName, value: &Value) -> anyhow::Result<()> {
        match self.schemas.get(table) {
            Some(schema) => schema.check(value),
            None => Ok(()),
        }
    }
}

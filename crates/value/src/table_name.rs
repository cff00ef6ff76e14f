use std::{
    fmt::{
        self,
        Debug,
    },
    str::FromStr,
};

use serde::Serialize;

/// Unique name for a table. Every [`crate::DocumentId`] carries the name of
/// the table it belongs to, and every index definition is scoped to one.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, derive_more::Display)]
pub struct TableName(String);

impl FromStr for TableName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        anyhow::ensure!(!s.is_empty(), "table name must not be empty");
        anyhow::ensure!(
            s.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_'),
            "table name {s:?} must be alphanumeric or underscore"
        );
        Ok(Self(s.to_owned()))
    }
}

impl Debug for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl TableName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

use std::fmt::{
    self,
    Display,
};

use rand::Rng;

use crate::TableName;

/// A random 128-bit id, unique within a table, that never changes for the
/// lifetime of a document. Formatted as lowercase hex for debugging; a
/// more compact wire encoding (e.g. base32) isn't load-bearing for
/// anything in this crate's scope.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InternalId([u8; 16]);

impl InternalId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InternalId({self})")
    }
}

/// A fully-resolved reference to a document: which table it lives in plus
/// its immutable internal id. `DocumentId` is the key of the primary index.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct DocumentId {
    pub table: TableName,
    pub internal_id: InternalId,
}

impl DocumentId {
    pub fn new(table: TableName, internal_id: InternalId) -> Self {
        Self { table, internal_id }
    }

    pub fn generate(table: TableName) -> Self {
        Self::new(table, InternalId::generate())
    }
}

impl Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.internal_id)
    }
}

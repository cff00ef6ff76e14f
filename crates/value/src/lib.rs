//! Minimal document/table vocabulary shared by the transaction engine.
//!
//! This crate deliberately knows nothing about schemas, shapes, or the
//! search/vector-index projections a full document database supports --
//! those are out of scope here. It only carries what the core needs
//! to name a document and compare its fields for indexing.
mod document_id;
mod table_name;
mod value;

pub use crate::{
    document_id::{
        DocumentId,
        InternalId,
    },
    table_name::TableName,
    value::Value,
};

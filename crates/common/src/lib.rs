//! Shared vocabulary for the transaction engine: timestamps, half-open
//! interval sets, index identity/key derivation, the persistence interface,
//! the runtime abstraction, and environment-driven configuration knobs.
//!
//! Everything here is deliberately small relative to a full application
//! `common` crate, which would also carry auth, HTTP, schemas,
//! search-query plumbing, and dozens of other concerns outside this
//! crate's scope.
pub mod env;
pub mod index;
pub mod interval;
pub mod knobs;
pub mod persistence;
pub mod runtime;
pub mod types;

//! Shared error taxonomy for the transaction engine.
//!
//! Every fallible operation in the core returns `anyhow::Result<T>`, with an
//! [`ErrorMetadata`] attached via `.context(..)` whenever the failure should
//! be classified (retried, surfaced verbatim, or treated as fatal) rather
//! than bubbled up as an opaque string.
use std::borrow::Cow;

mod metrics;

pub use crate::metrics::{
    log_occ_abort,
    log_out_of_retention,
};

/// Tag attached to an `anyhow::Error` chain describing how the caller should
/// react to a failure.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub code: ErrorCode,
    /// short ScreamingCamelCase tag, stable across copy changes. Usable in
    /// tests and for metrics labels.
    pub short_msg: Cow<'static, str>,
    /// human readable, developer facing message.
    pub msg: Cow<'static, str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Commit lost an OCC race; the caller should retry with a fresh
    /// transaction.
    OCC,
    /// A read's timestamp fell below the retention horizon.
    OutOfRetention,
    /// A write failed a schema or uniqueness check before commit.
    BadRequest,
    /// A commit or subscribe request was rejected because an inbound queue
    /// was full.
    Overloaded,
    /// A transaction ran past its deadline.
    Timeout,
    /// The durability layer failed to accept a commit.
    Unavailable,
    /// An invariant was violated; the process should stop taking commits.
    Internal,
}

impl ErrorMetadata {
    pub fn occ_conflict(conflicting_ts: impl std::fmt::Display) -> Self {
        Self {
            code: ErrorCode::OCC,
            short_msg: "OCCConflict".into(),
            msg: format!(
                "Documents this transaction read were changed by a commit at {conflicting_ts}"
            )
            .into(),
        }
    }

    pub fn out_of_retention() -> Self {
        Self {
            code: ErrorCode::OutOfRetention,
            short_msg: "SnapshotTooOld".into(),
            msg: "This snapshot is older than the retention window and can no longer be read"
                .into(),
        }
    }

    pub fn bad_request(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// A write fails a required-field or shape check against a table's
    /// registered schema.
    pub fn invalid_write(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            short_msg: "InvalidWrite".into(),
            msg: msg.into(),
        }
    }

    pub fn overloaded(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Overloaded,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn transaction_timeout() -> Self {
        Self {
            code: ErrorCode::Timeout,
            short_msg: "TransactionTimeout".into(),
            msg: "The transaction exceeded its deadline before it could commit".into(),
        }
    }

    pub fn persistence_unavailable(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::Unavailable,
            short_msg: "PersistenceUnavailable".into(),
            msg: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::Internal,
            short_msg: "Internal".into(),
            msg: msg.into(),
        }
    }

    pub fn is_occ(&self) -> bool {
        self.code == ErrorCode::OCC
    }

    pub fn is_out_of_retention(&self) -> bool {
        self.code == ErrorCode::OutOfRetention
    }

    /// Whether the function runner may retry this error automatically. Only
    /// `OCC` is safe to retry without caller involvement: every other error
    /// either needs a different input (`BadRequest`) or caller-controlled
    /// backoff (`Overloaded`, `Unavailable`).
    pub fn is_auto_retriable(&self) -> bool {
        self.code == ErrorCode::OCC
    }
}

/// Extension trait for pulling an [`ErrorMetadata`] back out of an
/// `anyhow::Error` chain, mirroring how callers classify errors without
/// downcasting by hand at every call site.
pub trait ErrorMetadataAnyhowExt {
    fn error_metadata(&self) -> Option<&ErrorMetadata>;
    fn code(&self) -> Option<ErrorCode> {
        self.error_metadata().map(|e| e.code)
    }
    fn is_occ(&self) -> bool {
        matches!(self.code(), Some(ErrorCode::OCC))
    }
    fn is_out_of_retention(&self) -> bool {
        matches!(self.code(), Some(ErrorCode::OutOfRetention))
    }
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn error_metadata(&self) -> Option<&ErrorMetadata> {
        self.chain().find_map(|cause| cause.downcast_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occ_is_auto_retriable_others_are_not() {
        assert!(ErrorMetadata::occ_conflict(7u64).is_auto_retriable());
        assert!(!ErrorMetadata::out_of_retention().is_auto_retriable());
        assert!(!ErrorMetadata::transaction_timeout().is_auto_retriable());
    }

    #[test]
    fn anyhow_ext_recovers_code_through_context_chain() {
        let err = anyhow::anyhow!("read failed")
            .context(ErrorMetadata::occ_conflict(42u64))
            .context("while committing");
        assert!(err.is_occ());
        assert_eq!(err.code(), Some(ErrorCode::OCC));
    }
}

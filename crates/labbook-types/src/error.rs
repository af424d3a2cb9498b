//! The closed set of error kinds from spec.md §7.
//!
//! Most call sites use `anyhow::Result` and attach context with
//! `anyhow::Context`; `ErrorKind` exists so a caller that needs to branch on
//! failure class can downcast (`err.downcast_ref::<ErrorKind>()`) instead of
//! matching on message text.

use thiserror::Error;

/// Closed set of error kinds a LabBook operation can fail with.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("merge error: {0}")]
    Merge(String),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorKind {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn merge(msg: impl Into<String>) -> Self {
        Self::Merge(msg.into())
    }

    pub fn lock(msg: impl Into<String>) -> Self {
        Self::Lock(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

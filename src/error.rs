//! # Error Taxonomy
//!
//! Typed error kinds surfaced by the engine. Internally every fallible
//! function returns `eyre::Result`; the kinds below are attached as the
//! root cause wherever control flow (or a caller) needs to distinguish
//! outcomes, and recovered with [`db_error_kind`].
//!
//! ## Kinds
//!
//! | Kind                 | Meaning                                            |
//! |----------------------|----------------------------------------------------|
//! | `Lock`               | Writer lock unavailable (reason attached)          |
//! | `Opening`            | Database absent where one was expected             |
//! | `Corrupt`            | On-disk invariant violated; manual repair needed   |
//! | `Modified`           | Revision churn outran a reader; retryable          |
//! | `DocNotFound`        | Requested document id absent                       |
//! | `InvalidArgument`    | Caller bug (term too long, empty term, ...)        |
//! | `FeatureUnavailable` | Operation needs a table this database doesn't keep |
//! | `Create`             | Database creation failed or raced an existing one  |
//! | `Database`           | Fatal escalation; consistent state not restorable  |
//!
//! ## Propagation policy
//!
//! Document mutations catch any error, wipe the posting buffer, and
//! rethrow, so no partial state survives in memory. Commit failures go
//! through the coordinator's rollback path, which escalates to `Fatal`
//! only when the rollback itself fails.

use thiserror::Error;

/// Why the writer lock could not be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    /// Another process holds the lock.
    InUse,
    /// The filesystem does not support fcntl locking.
    Unsupported,
    /// Out of file descriptors.
    FdLimit,
    /// Anything else; the OS error is carried in the message.
    Unknown,
}

impl std::fmt::Display for LockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LockReason::InUse => "already locked",
            LockReason::Unsupported => "locking probably not supported by this FS",
            LockReason::FdLimit => "too many open files",
            LockReason::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("unable to acquire database write lock on {path}: {reason}")]
    Lock { path: String, reason: LockReason },

    #[error("no database found at {0}")]
    Opening(String),

    #[error("database corrupt: {0}")]
    Corrupt(String),

    #[error("database changed too fast: {0}")]
    Modified(String),

    #[error("document {0} not found")]
    DocNotFound(u32),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("feature unavailable: {0}")]
    FeatureUnavailable(String),

    #[error("cannot create database: {0}")]
    Create(String),

    #[error("database error: {0}")]
    Database(String),
}

/// Recovers the typed kind from an `eyre` report, if one is attached.
pub fn db_error_kind(err: &eyre::Report) -> Option<&DbError> {
    err.downcast_ref::<DbError>()
}

/// True when the report's root cause is a missing-document error.
pub fn is_doc_not_found(err: &eyre::Report) -> bool {
    matches!(db_error_kind(err), Some(DbError::DocNotFound(_)))
}

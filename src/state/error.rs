//! Error types for the catalog core
//!
//! Three small enums, one per concern: the store, edit sessions and
//! catalog queries. Nothing here is fatal; a storage fault surfaces as
//! `StoreError::Unavailable` and the caller decides how to recover.

use thiserror::Error;

use super::data::BookId;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying storage failed; queries built on it go stale and
    /// must re-fetch once the store is reachable again.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Errors from an edit session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// One or more touched books are incomplete; the commit was
    /// rejected and the parent is unchanged. Recoverable: fill in the
    /// missing fields and commit again.
    #[error("validation failed: incomplete book(s) {0:?}")]
    Validation(Vec<BookId>),

    /// The session was already committed or discarded; the handle must
    /// not be reused.
    #[error("session is closed")]
    SessionClosed,

    /// `begin` was called on a parent session that is already closed.
    #[error("parent session is already committed or discarded")]
    InvalidParent,

    /// `commit` or `discard` was called a second time.
    #[error("session was already committed")]
    AlreadyCommitted,

    /// A field set with a value of the wrong kind (e.g. a date into a
    /// text field), or an unknown record id.
    #[error("bad field operation: {0}")]
    BadField(String),

    /// The commit reached the store and the store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from a catalog query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The requested sort field does not exist on Book.
    #[error("invalid sort key: {0}")]
    InvalidSortKey(String),

    /// The requested group field does not exist on Book.
    #[error("invalid group key: {0}")]
    InvalidGroupKey(String),

    /// The store failed while the query was applying an event; the
    /// query is now stale and must re-fetch.
    #[error(transparent)]
    Store(#[from] StoreError),
}

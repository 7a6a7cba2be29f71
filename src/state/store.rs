//! Record store contract
//!
//! The catalog core treats durable storage as a keyed table of Book
//! records with simple grouped listing and a subscription channel that
//! emits one event per committed mutation, in commit order. Any
//! embedded store can sit behind this trait; [`super::library::Library`]
//! is the SQLite implementation.

use std::sync::mpsc::Receiver;

use serde::{Deserialize, Serialize};

use super::data::{Book, BookField, BookId};
use super::error::StoreResult;

/// Kind of a committed store mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// New record inserted
    Insert,
    /// Existing record updated
    Update,
    /// Record deleted
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Insert => write!(f, "insert"),
            ChangeKind::Update => write!(f, "update"),
            ChangeKind::Delete => write!(f, "delete"),
        }
    }
}

/// One committed mutation, as delivered to subscribers.
///
/// `group_key` is the record's group-field value at the time of the
/// mutation (for deletes, the value the record had before it was
/// removed), so a projection can locate the affected group without a
/// read-back for the delete case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub id: BookId,
    pub group_key: String,
}

/// Durable keyed storage of Book records.
///
/// All calls are synchronous; the concurrency model is a single
/// logical sequence (see the crate docs). `list` returns group keys in
/// ascending order, ids within a group ordered by (sort field, id).
pub trait RecordStore {
    /// Insert a new record. The record keeps the id it was drafted with.
    fn create(&mut self, book: &Book) -> StoreResult<()>;

    /// Read one record.
    fn read(&self, id: BookId) -> StoreResult<Option<Book>>;

    /// Overwrite all fields of an existing record.
    fn update(&mut self, book: &Book) -> StoreResult<()>;

    /// Remove a record. Removing an unknown id is a no-op.
    fn delete(&mut self, id: BookId) -> StoreResult<()>;

    /// Ordered, grouped listing of all record ids.
    fn list(&self, sort_key: BookField, group_key: BookField) -> StoreResult<Vec<(String, Vec<BookId>)>>;

    /// Subscribe to committed mutations. Events arrive in commit order,
    /// one per mutated record.
    fn subscribe(&mut self) -> Receiver<ChangeEvent>;
}

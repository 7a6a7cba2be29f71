//! bookshelf — a personal book catalog core
//!
//! Durable storage of book records (SQLite), scoped edit sessions with
//! bounded undo/redo, and a live grouped catalog projection that turns
//! committed mutations into incremental view deltas.
//!
//! Everything runs on a single logical sequence: store calls are
//! synchronous, and the session tree is enforced with exclusive
//! borrows, so there is never more than one writer to any scope.

pub mod state;

pub use state::catalog::{CatalogQuery, Delta, QueryState};
pub use state::data::{Book, BookField, BookId, FieldValue};
pub use state::error::{QueryError, SessionError, StoreError};
pub use state::library::Library;
pub use state::session::{CommitSet, EditSession, SessionParent, DEFAULT_UNDO_DEPTH};
pub use state::store::{ChangeEvent, ChangeKind, RecordStore};

//! Scoped edit sessions
//!
//! An EditSession is an isolated scratchpad of pending changes over
//! one or more books, with a bounded undo/redo log. Changes stay
//! invisible to the session's parent until `commit`; `discard` throws
//! them away. Sessions nest: a child session commits into its parent
//! session, and only a commit against the store itself makes changes
//! durable and observable by catalog queries.
//!
//! The parent tree is enforced with exclusive borrows: a session holds
//! `&mut` on its parent for its whole lifetime, so exactly one owner
//! can mutate any level at a time.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::data::{Book, BookField, BookId, FieldValue};
use super::library::Library;
use super::store::RecordStore;
use super::error::SessionError;

/// Default undo depth, matching the catalog app's historical value.
pub const DEFAULT_UNDO_DEPTH: usize = 3;

/// One recorded field edit.
#[derive(Debug, Clone)]
struct FieldChange {
    id: BookId,
    field: BookField,
    old: FieldValue,
    new: FieldValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Open,
    Committed,
    Discarded,
}

/// The net effect of a session, handed to its parent on commit.
#[derive(Debug, Default)]
pub struct CommitSet {
    /// Records that did not exist in the parent.
    pub creates: Vec<Book>,
    /// Existing records with their final working values.
    pub updates: Vec<Book>,
    /// Deletions, with the group-field value the record had.
    pub deletes: Vec<(BookId, String)>,
}

/// Anything a session can be begun on: the store itself, or another
/// open session.
pub trait SessionParent {
    /// Whether new child sessions may still be begun on this parent.
    fn is_open(&self) -> bool;

    /// The parent's current view of a record (its own working copy,
    /// falling back up the tree to the store).
    fn snapshot(&self, id: BookId) -> Result<Option<Book>, SessionError>;

    /// Atomically absorb a committed child's net changes.
    fn apply(&mut self, set: CommitSet) -> Result<(), SessionError>;
}

impl SessionParent for Library {
    fn is_open(&self) -> bool {
        true
    }

    fn snapshot(&self, id: BookId) -> Result<Option<Book>, SessionError> {
        Ok(self.read(id)?)
    }

    fn apply(&mut self, set: CommitSet) -> Result<(), SessionError> {
        Library::apply(self, &set.creates, &set.updates, &set.deletes)?;
        Ok(())
    }
}

/// A scoped, isolated transaction over book records.
pub struct EditSession<'p> {
    parent: &'p mut (dyn SessionParent + 'p),
    /// Working copies of every record this session has loaded,
    /// created or modified.
    drafts: BTreeMap<BookId, Book>,
    /// Ids created in this session (pending insert).
    created: BTreeSet<BookId>,
    /// Ids whose fields were modified (including created ones).
    touched: BTreeSet<BookId>,
    /// Pending deletions, with the group value captured at delete time.
    deleted: BTreeMap<BookId, String>,
    /// Bounded field-change log; `cursor` entries are "done", the rest
    /// are redoable.
    history: VecDeque<FieldChange>,
    cursor: usize,
    undo_depth: usize,
    state: SessionState,
    on_finished: Option<Box<dyn FnOnce(bool) + 'p>>,
}

impl<'p> EditSession<'p> {
    /// Begin a session on a parent (the store, or another open
    /// session), with the default undo depth.
    pub fn begin(parent: &'p mut (dyn SessionParent + 'p)) -> Result<Self, SessionError> {
        Self::with_undo_depth(parent, DEFAULT_UNDO_DEPTH)
    }

    /// Begin a session with an explicit undo depth.
    pub fn with_undo_depth(
        parent: &'p mut (dyn SessionParent + 'p),
        undo_depth: usize,
    ) -> Result<Self, SessionError> {
        if !parent.is_open() {
            return Err(SessionError::InvalidParent);
        }
        Ok(EditSession {
            parent,
            drafts: BTreeMap::new(),
            created: BTreeSet::new(),
            touched: BTreeSet::new(),
            deleted: BTreeMap::new(),
            history: VecDeque::new(),
            cursor: 0,
            undo_depth,
            state: SessionState::Open,
            on_finished: None,
        })
    }

    /// Register a callback fired exactly once when the session ends,
    /// with `true` on commit and `false` on discard.
    pub fn on_finished(&mut self, callback: impl FnOnce(bool) + 'p) {
        self.on_finished = Some(Box::new(callback));
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Open => Ok(()),
            _ => Err(SessionError::SessionClosed),
        }
    }

    /// Create a new empty draft owned by this session. The returned id
    /// is stable; the record reaches the store only when the whole
    /// session chain commits.
    pub fn create(&mut self) -> Result<BookId, SessionError> {
        self.ensure_open()?;
        let book = Book::draft();
        let id = book.id;
        self.drafts.insert(id, book);
        self.created.insert(id);
        self.touched.insert(id);
        Ok(id)
    }

    /// Bring the parent's snapshot of a record into this session for
    /// editing. No-op if the record is already loaded.
    pub fn edit(&mut self, id: BookId) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.load(id).map(|_| ())
    }

    fn load(&mut self, id: BookId) -> Result<&mut Book, SessionError> {
        if self.deleted.contains_key(&id) {
            return Err(SessionError::BadField(format!("book {} is deleted", id)));
        }
        if !self.drafts.contains_key(&id) {
            let book = self
                .parent
                .snapshot(id)?
                .ok_or_else(|| SessionError::BadField(format!("unknown book {}", id)))?;
            self.drafts.insert(id, book);
        }
        Ok(self.drafts.get_mut(&id).unwrap())
    }

    /// The session's current working copy of a record
    /// (read-your-writes).
    pub fn book(&self, id: BookId) -> Option<&Book> {
        self.drafts.get(&id)
    }

    /// Set one field of a record, recording the change in the undo
    /// log. The value is visible to this session immediately; the
    /// parent is untouched until commit.
    pub fn set_field(
        &mut self,
        id: BookId,
        field: BookField,
        value: FieldValue,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        let book = self.load(id)?;
        let old = book.field(field);
        if !book.set(field, value.clone()) {
            return Err(SessionError::BadField(format!(
                "value kind does not match field '{}'",
                field
            )));
        }

        // A new edit invalidates the redo tail, then the log is
        // trimmed to the undo depth, oldest first.
        self.history.truncate(self.cursor);
        self.history.push_back(FieldChange {
            id,
            field,
            old,
            new: value,
        });
        while self.history.len() > self.undo_depth {
            self.history.pop_front();
        }
        self.cursor = self.history.len();
        self.touched.insert(id);
        Ok(())
    }

    /// Mark a record for deletion at commit. Deleting a record that
    /// was created in this session simply forgets it.
    pub fn delete(&mut self, id: BookId) -> Result<(), SessionError> {
        self.ensure_open()?;
        if self.created.remove(&id) {
            self.drafts.remove(&id);
            self.touched.remove(&id);
            return Ok(());
        }
        let book = match self.drafts.remove(&id) {
            Some(book) => book,
            None => self
                .parent
                .snapshot(id)?
                .ok_or_else(|| SessionError::BadField(format!("unknown book {}", id)))?,
        };
        self.touched.remove(&id);
        self.deleted.insert(id, book.author.unwrap_or_default());
        Ok(())
    }

    /// Step the undo cursor back one change, restoring the prior
    /// value. A no-op at the start of the log. Returns whether a
    /// change was undone.
    pub fn undo(&mut self) -> Result<bool, SessionError> {
        self.ensure_open()?;
        if self.cursor == 0 {
            return Ok(false);
        }
        self.cursor -= 1;
        let change = self.history[self.cursor].clone();
        if let Some(book) = self.drafts.get_mut(&change.id) {
            book.set(change.field, change.old);
        }
        Ok(true)
    }

    /// Step the undo cursor forward one change, reapplying the value.
    /// A no-op at the end of the log. Returns whether a change was
    /// redone.
    pub fn redo(&mut self) -> Result<bool, SessionError> {
        self.ensure_open()?;
        if self.cursor == self.history.len() {
            return Ok(false);
        }
        let change = self.history[self.cursor].clone();
        self.cursor += 1;
        if let Some(book) = self.drafts.get_mut(&change.id) {
            book.set(change.field, change.new);
        }
        Ok(true)
    }

    /// Validate every touched record and atomically apply the
    /// session's net changes to the parent.
    ///
    /// On a validation failure the parent is untouched and the session
    /// stays open so the caller can complete the record and try again.
    pub fn commit(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Open => {}
            SessionState::Committed => return Err(SessionError::AlreadyCommitted),
            SessionState::Discarded => return Err(SessionError::SessionClosed),
        }

        let invalid: Vec<BookId> = self
            .touched
            .iter()
            .filter(|id| !self.drafts[*id].is_valid())
            .copied()
            .collect();
        if !invalid.is_empty() {
            return Err(SessionError::Validation(invalid));
        }

        let mut set = CommitSet::default();
        for id in &self.touched {
            let book = self.drafts[id].clone();
            if self.created.contains(id) {
                set.creates.push(book);
            } else {
                set.updates.push(book);
            }
        }
        set.deletes = self
            .deleted
            .iter()
            .map(|(id, group)| (*id, group.clone()))
            .collect();

        self.parent.apply(set)?;
        self.state = SessionState::Committed;
        if let Some(callback) = self.on_finished.take() {
            callback(true);
        }
        Ok(())
    }

    /// Close the session without applying anything. The parent is
    /// untouched.
    pub fn discard(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Open => {}
            SessionState::Committed => return Err(SessionError::AlreadyCommitted),
            SessionState::Discarded => return Err(SessionError::SessionClosed),
        }
        self.state = SessionState::Discarded;
        if let Some(callback) = self.on_finished.take() {
            callback(false);
        }
        Ok(())
    }
}

impl<'p> SessionParent for EditSession<'p> {
    fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    fn snapshot(&self, id: BookId) -> Result<Option<Book>, SessionError> {
        if self.deleted.contains_key(&id) {
            return Ok(None);
        }
        if let Some(book) = self.drafts.get(&id) {
            return Ok(Some(book.clone()));
        }
        self.parent.snapshot(id)
    }

    fn apply(&mut self, set: CommitSet) -> Result<(), SessionError> {
        self.ensure_open()?;
        // A child's net changes merge into this session's working
        // state as plain field values; they do not enter the undo log
        // (they arrive as a single push, like a child-context save).
        for book in set.creates {
            self.created.insert(book.id);
            self.touched.insert(book.id);
            self.drafts.insert(book.id, book);
        }
        for book in set.updates {
            self.touched.insert(book.id);
            self.drafts.insert(book.id, book);
        }
        for (id, group) in set.deletes {
            if self.created.remove(&id) {
                self.drafts.remove(&id);
                self.touched.remove(&id);
            } else {
                self.drafts.remove(&id);
                self.touched.remove(&id);
                self.deleted.insert(id, group);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for EditSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditSession")
            .field("state", &self.state)
            .field("drafts", &self.drafts.len())
            .field("history", &self.history.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}

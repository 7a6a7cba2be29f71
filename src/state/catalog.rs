//! Live grouped catalog projection
//!
//! A CatalogQuery keeps an ordered, grouped snapshot of the store
//! (books grouped by author, by default) and turns each committed
//! store mutation into the minimal sequence of view deltas a rendered
//! list needs: insert/delete of rows and groups, in-place updates and
//! in-group moves.
//!
//! Delta ordering is part of the contract: groups come before their
//! rows on insert, rows before their groups on delete, so a consumer
//! applying deltas one by one never sees a row without its group.

use serde::Serialize;

use super::data::{Book, BookField, BookId};
use super::error::{QueryError, StoreError};
use super::store::{ChangeEvent, ChangeKind, RecordStore};

/// One incremental view change. Indices refer to the consumer's list
/// state at the moment the delta is applied, in sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "delta")]
pub enum Delta {
    InsertGroup { group: usize, key: String },
    InsertRow { group: usize, row: usize },
    UpdateRow { group: usize, row: usize },
    MoveRow { from_group: usize, from_row: usize, to_group: usize, to_row: usize },
    DeleteRow { group: usize, row: usize },
    DeleteGroup { group: usize },
}

/// Lifecycle of a query.
///
/// `Uninitialized -> Active -> Stale -> Active` (on re-fetch)
/// `-> Closed` (terminal). Events produce deltas only while Active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Uninitialized,
    Active,
    Stale,
    Closed,
}

#[derive(Debug, Clone)]
struct Row {
    id: BookId,
    sort: String,
}

#[derive(Debug, Clone)]
struct Group {
    key: String,
    rows: Vec<Row>,
}

/// A live, grouped, sorted projection over the record store.
#[derive(Debug)]
pub struct CatalogQuery {
    sort_key: BookField,
    group_key: BookField,
    groups: Vec<Group>,
    state: QueryState,
}

impl CatalogQuery {
    /// Build a query sorting and grouping by the named Book fields.
    /// Unknown field names fail immediately.
    pub fn new(sort_key: &str, group_key: &str) -> Result<Self, QueryError> {
        let sort_key = BookField::from_key(sort_key)
            .ok_or_else(|| QueryError::InvalidSortKey(sort_key.to_string()))?;
        let group_key = BookField::from_key(group_key)
            .ok_or_else(|| QueryError::InvalidGroupKey(group_key.to_string()))?;
        Ok(CatalogQuery {
            sort_key,
            group_key,
            groups: Vec::new(),
            state: QueryState::Uninitialized,
        })
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    /// The cached snapshot: group keys with their ordered book ids.
    pub fn snapshot(&self) -> Vec<(String, Vec<BookId>)> {
        self.groups
            .iter()
            .map(|g| (g.key.clone(), g.rows.iter().map(|r| r.id).collect()))
            .collect()
    }

    /// Load the full grouped snapshot from the store. This is the only
    /// way to leave the Stale state. A closed query stays closed.
    pub fn refetch<S: RecordStore>(&mut self, store: &S) -> Result<(), QueryError> {
        if self.state == QueryState::Closed {
            return Ok(());
        }
        let listed = match store.list(self.sort_key, self.group_key) {
            Ok(listed) => listed,
            Err(e) => {
                self.state = QueryState::Stale;
                return Err(e.into());
            }
        };

        let mut groups = Vec::with_capacity(listed.len());
        for (key, ids) in listed {
            let mut rows = Vec::with_capacity(ids.len());
            for id in ids {
                let book = match store.read(id) {
                    Ok(Some(book)) => book,
                    // Listed a moment ago; a miss here means the store
                    // changed under us mid-fetch.
                    Ok(None) => {
                        self.state = QueryState::Stale;
                        return Err(StoreError::Unavailable(format!(
                            "record {} vanished during fetch",
                            id
                        ))
                        .into());
                    }
                    Err(e) => {
                        self.state = QueryState::Stale;
                        return Err(e.into());
                    }
                };
                rows.push(Row {
                    id,
                    sort: self.sort_value(&book),
                });
            }
            groups.push(Group { key, rows });
        }
        self.groups = groups;
        self.state = QueryState::Active;
        Ok(())
    }

    /// Translate one committed store mutation into view deltas.
    ///
    /// Returns an empty sequence unless the query is Active. If the
    /// store fails mid-translation the query goes Stale and no partial
    /// deltas are emitted.
    pub fn apply_event<S: RecordStore>(
        &mut self,
        store: &S,
        event: &ChangeEvent,
    ) -> Result<Vec<Delta>, QueryError> {
        if self.state != QueryState::Active {
            return Ok(Vec::new());
        }

        let result = match event.kind {
            ChangeKind::Insert => self.on_upsert(store, event.id),
            ChangeKind::Update => self.on_upsert(store, event.id),
            ChangeKind::Delete => Ok(self.on_delete(event.id)),
        };
        if result.is_err() {
            self.state = QueryState::Stale;
        }
        result
    }

    /// Close the query. Terminal: no deltas are ever emitted again.
    pub fn close(&mut self) {
        self.state = QueryState::Closed;
        self.groups.clear();
    }

    fn sort_value(&self, book: &Book) -> String {
        match self.sort_key {
            BookField::Title => book.title.clone().unwrap_or_default(),
            BookField::Author => book.author.clone().unwrap_or_default(),
            BookField::Copyright => book.copyright.map(|d| d.to_string()).unwrap_or_default(),
        }
    }

    fn group_value(&self, book: &Book) -> String {
        match self.group_key {
            BookField::Title => book.title.clone().unwrap_or_default(),
            BookField::Author => book.author.clone().unwrap_or_default(),
            BookField::Copyright => book.copyright.map(|d| d.to_string()).unwrap_or_default(),
        }
    }

    /// Cached position of a record, if any.
    fn position_of(&self, id: BookId) -> Option<(usize, usize)> {
        for (g, group) in self.groups.iter().enumerate() {
            if let Some(r) = group.rows.iter().position(|row| row.id == id) {
                return Some((g, r));
            }
        }
        None
    }

    /// Insert and update share one path: both resolve to the record's
    /// fresh store value. An insert for an already-cached id behaves
    /// like an update; an update whose record is gone behaves like a
    /// delete.
    fn on_upsert<S: RecordStore>(
        &mut self,
        store: &S,
        id: BookId,
    ) -> Result<Vec<Delta>, QueryError> {
        let book = match store.read(id)? {
            Some(book) => book,
            None => return Ok(self.on_delete(id)),
        };
        let key = self.group_value(&book);
        let sort = self.sort_value(&book);

        let Some((old_g, old_r)) = self.position_of(id) else {
            return Ok(self.insert_row(key, Row { id, sort }));
        };

        if self.groups[old_g].key == key {
            // Same group: either an in-place update or an in-group move.
            self.groups[old_g].rows.remove(old_r);
            let new_r = self.row_insertion_index(old_g, &sort, id);
            self.groups[old_g].rows.insert(new_r, Row { id, sort });
            if new_r == old_r {
                return Ok(vec![Delta::UpdateRow {
                    group: old_g,
                    row: old_r,
                }]);
            }
            return Ok(vec![Delta::MoveRow {
                from_group: old_g,
                from_row: old_r,
                to_group: old_g,
                to_row: new_r,
            }]);
        }

        // Group changed: delete side first (rows before groups), then
        // insert side (groups before rows).
        let mut deltas = self.remove_row(old_g, old_r);
        deltas.extend(self.insert_row(key, Row { id, sort }));
        Ok(deltas)
    }

    fn on_delete(&mut self, id: BookId) -> Vec<Delta> {
        match self.position_of(id) {
            Some((g, r)) => self.remove_row(g, r),
            // Never cached; nothing for the view to do.
            None => Vec::new(),
        }
    }

    /// Remove a cached row, dropping its group if it becomes empty.
    /// Emits DeleteRow strictly before DeleteGroup.
    fn remove_row(&mut self, g: usize, r: usize) -> Vec<Delta> {
        self.groups[g].rows.remove(r);
        let mut deltas = vec![Delta::DeleteRow { group: g, row: r }];
        if self.groups[g].rows.is_empty() {
            self.groups.remove(g);
            deltas.push(Delta::DeleteGroup { group: g });
        }
        deltas
    }

    /// Insert a row into its group, creating the group if needed.
    /// Emits InsertGroup strictly before InsertRow.
    fn insert_row(&mut self, key: String, row: Row) -> Vec<Delta> {
        match self.groups.binary_search_by(|g| g.key.cmp(&key)) {
            Ok(g) => {
                let r = self.row_insertion_index(g, &row.sort, row.id);
                self.groups[g].rows.insert(r, row);
                vec![Delta::InsertRow { group: g, row: r }]
            }
            Err(g) => {
                self.groups.insert(
                    g,
                    Group {
                        key: key.clone(),
                        rows: vec![row],
                    },
                );
                vec![
                    Delta::InsertGroup { group: g, key },
                    Delta::InsertRow { group: g, row: 0 },
                ]
            }
        }
    }

    /// Sorted position for a row within a group, ordered by
    /// (sort value, id) for determinism.
    fn row_insertion_index(&self, g: usize, sort: &str, id: BookId) -> usize {
        self.groups[g]
            .rows
            .binary_search_by(|row| (row.sort.as_str(), row.id).cmp(&(sort, id)))
            .unwrap_or_else(|pos| pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::FieldValue;
    use crate::state::library::Library;
    use crate::state::session::EditSession;
    use chrono::NaiveDate;
    use std::sync::mpsc::Receiver;

    fn date(y: i32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, 1, 1).unwrap()
    }

    fn add_book(library: &mut Library, title: &str, author: &str, year: i32) -> BookId {
        let mut session = EditSession::begin(library).unwrap();
        let id = session.create().unwrap();
        session
            .set_field(id, BookField::Title, FieldValue::text(title))
            .unwrap();
        session
            .set_field(id, BookField::Author, FieldValue::text(author))
            .unwrap();
        session
            .set_field(id, BookField::Copyright, FieldValue::date(date(year)))
            .unwrap();
        session.commit().unwrap();
        id
    }

    fn drain(
        catalog: &mut CatalogQuery,
        library: &Library,
        events: &Receiver<ChangeEvent>,
    ) -> Vec<Delta> {
        let mut deltas = Vec::new();
        while let Ok(event) = events.try_recv() {
            deltas.extend(catalog.apply_event(library, &event).unwrap());
        }
        deltas
    }

    /// A store whose every call fails, for driving the Stale path.
    struct BrokenStore;

    impl RecordStore for BrokenStore {
        fn create(&mut self, _: &Book) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("broken".into()))
        }
        fn read(&self, _: BookId) -> Result<Option<Book>, StoreError> {
            Err(StoreError::Unavailable("broken".into()))
        }
        fn update(&mut self, _: &Book) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("broken".into()))
        }
        fn delete(&mut self, _: BookId) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("broken".into()))
        }
        fn list(
            &self,
            _: BookField,
            _: BookField,
        ) -> Result<Vec<(String, Vec<BookId>)>, StoreError> {
            Err(StoreError::Unavailable("broken".into()))
        }
        fn subscribe(&mut self) -> Receiver<ChangeEvent> {
            std::sync::mpsc::channel().1
        }
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(matches!(
            CatalogQuery::new("publisher", "author"),
            Err(QueryError::InvalidSortKey(_))
        ));
        assert!(matches!(
            CatalogQuery::new("author", "publisher"),
            Err(QueryError::InvalidGroupKey(_))
        ));
    }

    #[test]
    fn test_first_book_emits_group_before_row() {
        let mut library = Library::open_in_memory().unwrap();
        let events = library.subscribe();
        let mut catalog = CatalogQuery::new("author", "author").unwrap();
        catalog.refetch(&library).unwrap();

        add_book(&mut library, "Dune", "Herbert", 1965);

        let deltas = drain(&mut catalog, &library, &events);
        assert_eq!(
            deltas,
            vec![
                Delta::InsertGroup {
                    group: 0,
                    key: "Herbert".to_string()
                },
                Delta::InsertRow { group: 0, row: 0 },
            ]
        );
    }

    #[test]
    fn test_second_book_in_group_emits_row_only() {
        let mut library = Library::open_in_memory().unwrap();
        let mut catalog = CatalogQuery::new("title", "author").unwrap();
        add_book(&mut library, "Dune", "Herbert", 1965);

        let events = library.subscribe();
        catalog.refetch(&library).unwrap();
        add_book(&mut library, "Dune Messiah", "Herbert", 1969);

        let deltas = drain(&mut catalog, &library, &events);
        assert_eq!(deltas, vec![Delta::InsertRow { group: 0, row: 1 }]);
    }

    #[test]
    fn test_delete_keeps_surviving_group() {
        let mut library = Library::open_in_memory().unwrap();
        let mut catalog = CatalogQuery::new("title", "author").unwrap();
        add_book(&mut library, "Dune", "Herbert", 1965);
        let second = add_book(&mut library, "Dune Messiah", "Herbert", 1969);

        let events = library.subscribe();
        catalog.refetch(&library).unwrap();
        library.delete(second).unwrap();

        let deltas = drain(&mut catalog, &library, &events);
        assert_eq!(deltas, vec![Delta::DeleteRow { group: 0, row: 1 }]);
    }

    #[test]
    fn test_deleting_last_book_emits_row_before_group() {
        let mut library = Library::open_in_memory().unwrap();
        let mut catalog = CatalogQuery::new("author", "author").unwrap();
        let id = add_book(&mut library, "Dune", "Herbert", 1965);

        let events = library.subscribe();
        catalog.refetch(&library).unwrap();
        library.delete(id).unwrap();

        let deltas = drain(&mut catalog, &library, &events);
        assert_eq!(
            deltas,
            vec![
                Delta::DeleteRow { group: 0, row: 0 },
                Delta::DeleteGroup { group: 0 },
            ]
        );
    }

    #[test]
    fn test_update_in_place() {
        let mut library = Library::open_in_memory().unwrap();
        let mut catalog = CatalogQuery::new("author", "author").unwrap();
        let id = add_book(&mut library, "Dune", "Herbert", 1965);

        let events = library.subscribe();
        catalog.refetch(&library).unwrap();

        // Title is neither the sort nor the group key here.
        let mut book = library.read(id).unwrap().unwrap();
        book.title = Some("Dune (revised)".to_string());
        library.update(&book).unwrap();

        let deltas = drain(&mut catalog, &library, &events);
        assert_eq!(deltas, vec![Delta::UpdateRow { group: 0, row: 0 }]);
    }

    #[test]
    fn test_update_moves_row_within_group() {
        let mut library = Library::open_in_memory().unwrap();
        let mut catalog = CatalogQuery::new("title", "author").unwrap();
        add_book(&mut library, "Children of Dune", "Herbert", 1976);
        let id = add_book(&mut library, "Dune", "Herbert", 1965);

        let events = library.subscribe();
        catalog.refetch(&library).unwrap();

        // "Dune" -> "A Dune" sorts before "Children of Dune".
        let mut book = library.read(id).unwrap().unwrap();
        book.title = Some("A Dune".to_string());
        library.update(&book).unwrap();

        let deltas = drain(&mut catalog, &library, &events);
        assert_eq!(
            deltas,
            vec![Delta::MoveRow {
                from_group: 0,
                from_row: 1,
                to_group: 0,
                to_row: 0,
            }]
        );
    }

    #[test]
    fn test_group_change_deletes_then_inserts() {
        let mut library = Library::open_in_memory().unwrap();
        let mut catalog = CatalogQuery::new("title", "author").unwrap();
        add_book(&mut library, "Emma", "Austen", 1815);
        let id = add_book(&mut library, "Dune", "Herbert", 1965);

        let events = library.subscribe();
        catalog.refetch(&library).unwrap();

        // Reattribute "Dune": its Herbert group empties, a new group
        // appears after Austen.
        let mut book = library.read(id).unwrap().unwrap();
        book.author = Some("Zelazny".to_string());
        library.update(&book).unwrap();

        let deltas = drain(&mut catalog, &library, &events);
        assert_eq!(
            deltas,
            vec![
                Delta::DeleteRow { group: 1, row: 0 },
                Delta::DeleteGroup { group: 1 },
                Delta::InsertGroup {
                    group: 1,
                    key: "Zelazny".to_string()
                },
                Delta::InsertRow { group: 1, row: 0 },
            ]
        );
        assert_eq!(catalog.snapshot()[1].0, "Zelazny");
    }

    #[test]
    fn test_events_ignored_unless_active() {
        let library = Library::open_in_memory().unwrap();
        let mut catalog = CatalogQuery::new("author", "author").unwrap();
        assert_eq!(catalog.state(), QueryState::Uninitialized);

        let event = ChangeEvent {
            kind: ChangeKind::Insert,
            id: BookId::new(),
            group_key: "Herbert".to_string(),
        };
        assert!(catalog.apply_event(&library, &event).unwrap().is_empty());

        catalog.close();
        assert_eq!(catalog.state(), QueryState::Closed);
        assert!(catalog.apply_event(&library, &event).unwrap().is_empty());

        // Closed is terminal, even across refetch.
        catalog.refetch(&library).unwrap();
        assert_eq!(catalog.state(), QueryState::Closed);
    }

    #[test]
    fn test_store_failure_marks_query_stale_until_refetch() {
        let mut library = Library::open_in_memory().unwrap();
        let mut catalog = CatalogQuery::new("author", "author").unwrap();
        catalog.refetch(&library).unwrap();
        assert_eq!(catalog.state(), QueryState::Active);

        let event = ChangeEvent {
            kind: ChangeKind::Insert,
            id: BookId::new(),
            group_key: "Herbert".to_string(),
        };
        assert!(catalog.apply_event(&BrokenStore, &event).is_err());
        assert_eq!(catalog.state(), QueryState::Stale);

        // Stale queries emit nothing until a full re-fetch.
        add_book(&mut library, "Dune", "Herbert", 1965);
        let okay = ChangeEvent {
            kind: ChangeKind::Delete,
            id: BookId::new(),
            group_key: String::new(),
        };
        assert!(catalog.apply_event(&library, &okay).unwrap().is_empty());

        catalog.refetch(&library).unwrap();
        assert_eq!(catalog.state(), QueryState::Active);
        assert_eq!(catalog.snapshot().len(), 1);
    }
}

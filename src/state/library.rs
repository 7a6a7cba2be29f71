//! SQLite-backed record store
//!
//! The Library manages the SQLite catalog database: schema setup,
//! book CRUD, grouped listing, and the mutation-event channel that
//! live queries subscribe to.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

use super::data::{Book, BookField, BookId};
use super::error::{StoreError, StoreResult};
use super::store::{ChangeEvent, ChangeKind, RecordStore};

/// The Library manages the SQLite catalog database.
pub struct Library {
    conn: Connection,
    db_path: Option<PathBuf>,
    subscribers: Vec<Sender<ChangeEvent>>,
}

impl Library {
    /// Create a new Library at the default location and initialize the
    /// database.
    ///
    /// The database file is created in the user's data directory:
    /// - Linux: ~/.local/share/bookshelf/bookshelf.db
    /// - macOS: ~/Library/Application Support/bookshelf/bookshelf.db
    /// - Windows: %APPDATA%\bookshelf\bookshelf.db
    pub fn new() -> StoreResult<Self> {
        let db_path = Self::default_db_path()?;

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("create data dir: {}", e)))?;
        }

        Self::open(&db_path)
    }

    /// Open (or create) a catalog database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let mut library = Library {
            conn,
            db_path: Some(path.to_path_buf()),
            subscribers: Vec::new(),
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Open an in-memory catalog (used by tests).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let mut library = Library {
            conn,
            db_path: None,
            subscribers: Vec::new(),
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Get the path where the database is stored by default
    fn default_db_path() -> StoreResult<PathBuf> {
        let mut path = dirs::data_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| StoreError::Unavailable("no user data directory".to_string()))?;

        path.push("bookshelf");
        path.push("bookshelf.db");
        Ok(path)
    }

    /// Initialize the database schema.
    /// Creates the books table and its indexes if they don't exist.
    fn init_schema(&mut self) -> StoreResult<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS books (
                id          TEXT PRIMARY KEY,
                title       TEXT,
                author      TEXT,
                copyright   TEXT
            )",
            [],
        )?;

        // Index for the default author grouping
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_books_author
             ON books(author)",
            [],
        )?;

        Ok(())
    }

    /// Get the path to the database file (None for in-memory catalogs)
    pub fn path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Get a count of books in the library
    pub fn book_count(&self) -> StoreResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM books", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Pre-populate an empty catalog with a handful of classics, the
    /// way the app ships a default store on first launch. Returns the
    /// number of books inserted (0 if the catalog already had content).
    pub fn seed_if_empty(&mut self) -> StoreResult<usize> {
        if self.book_count()? > 0 {
            return Ok(0);
        }

        let classics: [(&str, &str, (i32, u32, u32)); 3] = [
            ("Dune", "Frank Herbert", (1965, 8, 1)),
            ("Pride and Prejudice", "Jane Austen", (1813, 1, 28)),
            ("Emma", "Jane Austen", (1815, 12, 23)),
        ];

        let mut seeded = 0;
        for (title, author, (y, m, d)) in classics {
            let book = Book {
                id: BookId::new(),
                title: Some(title.to_string()),
                author: Some(author.to_string()),
                copyright: NaiveDate::from_ymd_opt(y, m, d),
            };
            self.create(&book)?;
            seeded += 1;
        }
        Ok(seeded)
    }

    /// Apply a batch of mutations in a single transaction and emit one
    /// event per record, in application order, after the transaction
    /// commits. This is the atomic landing point for session commits.
    pub fn apply(
        &mut self,
        creates: &[Book],
        updates: &[Book],
        deletes: &[(BookId, String)],
    ) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        for book in creates {
            tx.execute(
                "INSERT INTO books (id, title, author, copyright) VALUES (?1, ?2, ?3, ?4)",
                params![
                    book.id.to_string(),
                    book.title,
                    book.author,
                    book.copyright.map(|d| d.to_string()),
                ],
            )?;
        }
        for book in updates {
            tx.execute(
                "UPDATE books SET title = ?2, author = ?3, copyright = ?4 WHERE id = ?1",
                params![
                    book.id.to_string(),
                    book.title,
                    book.author,
                    book.copyright.map(|d| d.to_string()),
                ],
            )?;
        }
        for (id, _) in deletes {
            tx.execute("DELETE FROM books WHERE id = ?1", params![id.to_string()])?;
        }
        tx.commit()?;

        for book in creates {
            self.emit(ChangeKind::Insert, book.id, group_of(book));
        }
        for book in updates {
            self.emit(ChangeKind::Update, book.id, group_of(book));
        }
        for (id, group) in deletes {
            self.emit(ChangeKind::Delete, *id, group.clone());
        }
        Ok(())
    }

    /// Send an event to every live subscriber, dropping channels whose
    /// receiver has gone away.
    fn emit(&mut self, kind: ChangeKind, id: BookId, group_key: String) {
        let event = ChangeEvent { kind, id, group_key };
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn row_to_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<Book> {
        let id: String = row.get(0)?;
        let copyright: Option<String> = row.get(3)?;
        Ok(Book {
            id: BookId::parse(&id).unwrap_or_default(),
            title: row.get(1)?,
            author: row.get(2)?,
            copyright: copyright.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        })
    }
}

/// The author (or other group field) value of a book, with missing
/// values folded into the empty-string group.
fn group_of(book: &Book) -> String {
    book.author.clone().unwrap_or_default()
}

impl RecordStore for Library {
    fn create(&mut self, book: &Book) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO books (id, title, author, copyright) VALUES (?1, ?2, ?3, ?4)",
            params![
                book.id.to_string(),
                book.title,
                book.author,
                book.copyright.map(|d| d.to_string()),
            ],
        )?;
        self.emit(ChangeKind::Insert, book.id, group_of(book));
        Ok(())
    }

    fn read(&self, id: BookId) -> StoreResult<Option<Book>> {
        let book = self
            .conn
            .query_row(
                "SELECT id, title, author, copyright FROM books WHERE id = ?1",
                params![id.to_string()],
                Self::row_to_book,
            )
            .optional()?;
        Ok(book)
    }

    fn update(&mut self, book: &Book) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE books SET title = ?2, author = ?3, copyright = ?4 WHERE id = ?1",
            params![
                book.id.to_string(),
                book.title,
                book.author,
                book.copyright.map(|d| d.to_string()),
            ],
        )?;
        self.emit(ChangeKind::Update, book.id, group_of(book));
        Ok(())
    }

    fn delete(&mut self, id: BookId) -> StoreResult<()> {
        // The group value must be captured before the row disappears.
        let existing = self.read(id)?;
        let changed = self
            .conn
            .execute("DELETE FROM books WHERE id = ?1", params![id.to_string()])?;
        if changed > 0 {
            let group = existing.as_ref().map(group_of).unwrap_or_default();
            self.emit(ChangeKind::Delete, id, group);
        }
        Ok(())
    }

    fn list(
        &self,
        sort_key: BookField,
        group_key: BookField,
    ) -> StoreResult<Vec<(String, Vec<BookId>)>> {
        // Field names come from the BookField enum, never from user
        // input, so interpolating them into the statement is safe.
        let sql = format!(
            "SELECT id, COALESCE({group}, '') FROM books
             ORDER BY COALESCE({group}, ''), COALESCE({sort}, ''), id",
            group = group_key.key(),
            sort = sort_key.key(),
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let group: String = row.get(1)?;
            Ok((id, group))
        })?;

        let mut groups: Vec<(String, Vec<BookId>)> = Vec::new();
        for row in rows {
            let (id, group) = row?;
            let id = BookId::parse(&id)
                .ok_or_else(|| StoreError::Unavailable(format!("corrupt id: {}", id)))?;
            match groups.last_mut() {
                Some((key, ids)) if *key == group => ids.push(id),
                _ => groups.push((group, vec![id])),
            }
        }
        Ok(groups)
    }

    fn subscribe(&mut self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db_path", &self.db_path)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(title: &str, author: &str, year: i32) -> Book {
        Book {
            id: BookId::new(),
            title: Some(title.to_string()),
            author: Some(author.to_string()),
            copyright: NaiveDate::from_ymd_opt(year, 1, 1),
        }
    }

    #[test]
    fn test_create_read_round_trip() {
        let mut library = Library::open_in_memory().unwrap();
        let dune = book("Dune", "Herbert", 1965);
        library.create(&dune).unwrap();

        let loaded = library.read(dune.id).unwrap().unwrap();
        assert_eq!(loaded, dune);
        assert_eq!(library.book_count().unwrap(), 1);
    }

    #[test]
    fn test_read_unknown_is_none() {
        let library = Library::open_in_memory().unwrap();
        assert!(library.read(BookId::new()).unwrap().is_none());
    }

    #[test]
    fn test_update_and_delete() {
        let mut library = Library::open_in_memory().unwrap();
        let mut dune = book("Dune", "Herbert", 1965);
        library.create(&dune).unwrap();

        dune.title = Some("Dune Messiah".to_string());
        library.update(&dune).unwrap();
        assert_eq!(
            library.read(dune.id).unwrap().unwrap().title.as_deref(),
            Some("Dune Messiah")
        );

        library.delete(dune.id).unwrap();
        assert!(library.read(dune.id).unwrap().is_none());
        assert_eq!(library.book_count().unwrap(), 0);
    }

    #[test]
    fn test_list_groups_by_author_sorted() {
        let mut library = Library::open_in_memory().unwrap();
        library.create(&book("Emma", "Austen", 1815)).unwrap();
        library.create(&book("Dune", "Herbert", 1965)).unwrap();
        library.create(&book("Persuasion", "Austen", 1817)).unwrap();

        let groups = library.list(BookField::Author, BookField::Author).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "Austen");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "Herbert");
        assert_eq!(groups[1].1.len(), 1);
    }

    #[test]
    fn test_subscribe_sees_each_committed_mutation() {
        let mut library = Library::open_in_memory().unwrap();
        let events = library.subscribe();

        let dune = book("Dune", "Herbert", 1965);
        library.create(&dune).unwrap();
        library.delete(dune.id).unwrap();

        let first = events.recv().unwrap();
        assert_eq!(first.kind, ChangeKind::Insert);
        assert_eq!(first.id, dune.id);
        assert_eq!(first.group_key, "Herbert");

        let second = events.recv().unwrap();
        assert_eq!(second.kind, ChangeKind::Delete);
        assert_eq!(second.group_key, "Herbert");
    }

    #[test]
    fn test_apply_is_atomic_and_ordered() {
        let mut library = Library::open_in_memory().unwrap();
        let keep = book("Emma", "Austen", 1815);
        library.create(&keep).unwrap();

        let events = library.subscribe();
        let new = book("Dune", "Herbert", 1965);
        let mut edited = keep.clone();
        edited.title = Some("Emma (2nd ed.)".to_string());

        library.apply(&[new.clone()], &[edited], &[]).unwrap();

        assert_eq!(library.book_count().unwrap(), 2);
        assert_eq!(events.recv().unwrap().kind, ChangeKind::Insert);
        assert_eq!(events.recv().unwrap().kind, ChangeKind::Update);
    }

    #[test]
    fn test_seed_if_empty_runs_once() {
        let mut library = Library::open_in_memory().unwrap();
        let seeded = library.seed_if_empty().unwrap();
        assert!(seeded > 0);
        assert_eq!(library.book_count().unwrap(), seeded as i64);
        assert_eq!(library.seed_if_empty().unwrap(), 0);
    }
}

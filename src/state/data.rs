//! Shared data structures for the catalog
//!
//! These structs represent the data model that flows between
//! the database layer, edit sessions and the view layer.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable, opaque identifier of a Book record.
///
/// Assigned when the draft is created; becomes durable once a session
/// commit reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BookId(Uuid);

impl BookId {
    pub fn new() -> Self {
        BookId(Uuid::new_v4())
    }

    /// Parse an id from its string form (as printed by `Display`).
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(BookId)
    }
}

impl Default for BookId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A single book in the catalog.
///
/// All three descriptive fields are optional while the record is being
/// drafted in an edit session; a record must be valid before it can be
/// saved (see [`Book::is_valid`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    /// Unique record id
    pub id: BookId,
    /// Book title
    pub title: Option<String>,
    /// Author name
    pub author: Option<String>,
    /// Copyright date
    pub copyright: Option<NaiveDate>,
}

impl Book {
    /// Create an empty draft with a fresh id.
    pub fn draft() -> Self {
        Book {
            id: BookId::new(),
            title: None,
            author: None,
            copyright: None,
        }
    }

    /// A book is savable only when title, author and copyright are all
    /// present and the text fields are non-empty.
    pub fn is_valid(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.is_empty())
            && self.author.as_deref().is_some_and(|a| !a.is_empty())
            && self.copyright.is_some()
    }

    /// Current value of one field, as a [`FieldValue`].
    pub fn field(&self, field: BookField) -> FieldValue {
        match field {
            BookField::Title => FieldValue::Text(self.title.clone()),
            BookField::Author => FieldValue::Text(self.author.clone()),
            BookField::Copyright => FieldValue::Date(self.copyright),
        }
    }

    /// Overwrite one field. The value kind must match the field kind;
    /// mismatches are rejected so a date can never land in a text column.
    pub fn set(&mut self, field: BookField, value: FieldValue) -> bool {
        match (field, value) {
            (BookField::Title, FieldValue::Text(v)) => self.title = v,
            (BookField::Author, FieldValue::Text(v)) => self.author = v,
            (BookField::Copyright, FieldValue::Date(v)) => self.copyright = v,
            _ => return false,
        }
        true
    }
}

/// The editable fields of a [`Book`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookField {
    Title,
    Author,
    Copyright,
}

impl BookField {
    /// Column name in the store schema.
    pub fn key(self) -> &'static str {
        match self {
            BookField::Title => "title",
            BookField::Author => "author",
            BookField::Copyright => "copyright",
        }
    }

    /// Look a field up by its column name.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "title" => Some(BookField::Title),
            "author" => Some(BookField::Author),
            "copyright" => Some(BookField::Copyright),
            _ => None,
        }
    }
}

impl std::fmt::Display for BookField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// One field's value. `Text(None)` / `Date(None)` clear the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(Option<String>),
    Date(Option<NaiveDate>),
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(Some(s.into()))
    }

    pub fn date(d: NaiveDate) -> Self {
        FieldValue::Date(Some(d))
    }
}

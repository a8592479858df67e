use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

/// Catalog entry as stored and returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub isbn10: Option<String>,
    pub isbn13: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    pub page_count: Option<i64>,
    pub published_date: Option<String>,
}

/// Request model for creating a new book.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewBook {
    #[serde(default)]
    pub isbn10: Option<String>,
    #[serde(default)]
    pub isbn13: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub page_count: Option<i64>,
    #[serde(default)]
    pub published_date: Option<String>,
}

/// Partial update; `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BookUpdate {
    #[serde(default)]
    pub isbn10: Option<String>,
    #[serde(default)]
    pub isbn13: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub authors: Option<Vec<String>>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    #[serde(default)]
    pub page_count: Option<i64>,
    #[serde(default)]
    pub published_date: Option<String>,
}

/// Body of `POST /books/`: bare, or wrapped as `{"new_book": {...}}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CreateBookBody {
    Wrapped { new_book: NewBook },
    Bare(NewBook),
}

impl CreateBookBody {
    pub fn into_inner(self) -> NewBook {
        match self {
            CreateBookBody::Wrapped { new_book } | CreateBookBody::Bare(new_book) => new_book,
        }
    }
}

/// Body of `PATCH /books/{id}`: bare, or wrapped as `{"update_data": {...}}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum UpdateBookBody {
    Wrapped { update_data: BookUpdate },
    Bare(BookUpdate),
}

impl UpdateBookBody {
    pub fn into_inner(self) -> BookUpdate {
        match self {
            UpdateBookBody::Wrapped { update_data } | UpdateBookBody::Bare(update_data) => {
                update_data
            }
        }
    }
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub error: &'static str,
}

impl FieldError {
    pub fn to_json(&self) -> serde_json::Value {
        json!({"field": self.field, "error": self.error})
    }
}

fn check_title(title: &str, problems: &mut Vec<FieldError>) {
    if title.trim().is_empty() {
        problems.push(FieldError {
            field: "title",
            error: "must not be empty",
        });
    }
}

fn check_shared(
    isbn10: Option<&str>,
    isbn13: Option<&str>,
    page_count: Option<i64>,
    problems: &mut Vec<FieldError>,
) {
    if isbn10.is_some_and(|isbn| isbn.chars().count() > 10) {
        problems.push(FieldError {
            field: "isbn10",
            error: "must be at most 10 characters",
        });
    }
    if isbn13.is_some_and(|isbn| isbn.chars().count() > 13) {
        problems.push(FieldError {
            field: "isbn13",
            error: "must be at most 13 characters",
        });
    }
    if page_count.is_some_and(|count| count < 0) {
        problems.push(FieldError {
            field: "page_count",
            error: "must not be negative",
        });
    }
}

impl NewBook {
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut problems = Vec::new();
        check_title(&self.title, &mut problems);
        check_shared(
            self.isbn10.as_deref(),
            self.isbn13.as_deref(),
            self.page_count,
            &mut problems,
        );
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

impl BookUpdate {
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut problems = Vec::new();
        if let Some(title) = &self.title {
            check_title(title, &mut problems);
        }
        check_shared(
            self.isbn10.as_deref(),
            self.isbn13.as_deref(),
            self.page_count,
            &mut problems,
        );
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    /// Overlay the supplied fields onto `book`.
    pub fn apply_to(self, mut book: Book) -> Book {
        if let Some(isbn10) = self.isbn10 {
            book.isbn10 = Some(isbn10);
        }
        if let Some(isbn13) = self.isbn13 {
            book.isbn13 = Some(isbn13);
        }
        if let Some(title) = self.title {
            book.title = title;
        }
        if let Some(description) = self.description {
            book.description = Some(description);
        }
        if let Some(authors) = self.authors {
            book.authors = authors;
        }
        if let Some(categories) = self.categories {
            book.categories = categories;
        }
        if let Some(page_count) = self.page_count {
            book.page_count = Some(page_count);
        }
        if let Some(published_date) = self.published_date {
            book.published_date = Some(published_date);
        }
        book
    }
}

/// One borrow of a book; `returning_date` is `None` while the book is out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LendingRecord {
    pub id: i64,
    pub book_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub borrowing_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub returning_date: Option<OffsetDateTime>,
}

impl LendingRecord {
    /// An open record marks the book as currently borrowed.
    pub fn is_open(&self) -> bool {
        self.returning_date.is_none()
    }
}

/// Borrow state of a book, derived from its latest lending record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LendingState {
    Available,
    Borrowed(LendingRecord),
}

impl LendingState {
    pub fn from_latest(latest: Option<LendingRecord>) -> Self {
        match latest {
            Some(record) if record.is_open() => LendingState::Borrowed(record),
            _ => LendingState::Available,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, LendingState::Available)
    }
}

//! Book catalog: CRUD over the `books` table.
//!
//! Lookups return `None` for a missing id instead of failing; callers decide
//! what absence means for them.

use lectern_db::{is_foreign_key_violation, is_unique_violation, Database};
use sqlx::types::Json;
use sqlx::SqliteConnection;
use thiserror::Error;

use super::models::{Book, BookUpdate, FieldError, NewBook};

const BOOK_COLUMNS: &str =
    "id, isbn10, isbn13, title, description, authors, categories, page_count, published_date";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("book data is invalid")]
    Invalid(Vec<FieldError>),

    #[error("a book with the same isbn already exists")]
    DuplicateIsbn,

    #[error("book {0} has lending history and cannot be deleted")]
    HasHistory(i64),

    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

/// Offset pagination over books ordered by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 10,
            offset: 0,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BookRow {
    id: i64,
    isbn10: Option<String>,
    isbn13: Option<String>,
    title: String,
    description: Option<String>,
    authors: Json<Vec<String>>,
    categories: Json<Vec<String>>,
    page_count: Option<i64>,
    published_date: Option<String>,
}

impl From<BookRow> for Book {
    fn from(row: BookRow) -> Self {
        Book {
            id: row.id,
            isbn10: row.isbn10,
            isbn13: row.isbn13,
            title: row.title,
            description: row.description,
            authors: row.authors.0,
            categories: row.categories.0,
            page_count: row.page_count,
            published_date: row.published_date,
        }
    }
}

fn map_write_error(err: sqlx::Error) -> CatalogError {
    if is_unique_violation(&err) {
        CatalogError::DuplicateIsbn
    } else {
        CatalogError::Store(err)
    }
}

pub async fn create(conn: &mut SqliteConnection, new_book: &NewBook) -> Result<Book, CatalogError> {
    new_book.validate().map_err(CatalogError::Invalid)?;

    let sql = format!(
        "INSERT INTO books (isbn10, isbn13, title, description, authors, categories, page_count, published_date)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING {BOOK_COLUMNS}"
    );
    let row: BookRow = sqlx::query_as(&sql)
        .bind(&new_book.isbn10)
        .bind(&new_book.isbn13)
        .bind(&new_book.title)
        .bind(&new_book.description)
        .bind(Json(&new_book.authors))
        .bind(Json(&new_book.categories))
        .bind(new_book.page_count)
        .bind(&new_book.published_date)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_write_error)?;

    tracing::info!(book_id = row.id, title = %row.title, "book created");
    Ok(row.into())
}

pub async fn get(conn: &mut SqliteConnection, id: i64) -> Result<Option<Book>, sqlx::Error> {
    let sql = format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?");
    let row: Option<BookRow> = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(Book::from))
}

pub async fn exists(conn: &mut SqliteConnection, id: i64) -> Result<bool, sqlx::Error> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM books WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

pub async fn list(conn: &mut SqliteConnection, page: Page) -> Result<Vec<Book>, sqlx::Error> {
    let sql = format!("SELECT {BOOK_COLUMNS} FROM books ORDER BY id LIMIT ? OFFSET ?");
    let rows: Vec<BookRow> = sqlx::query_as(&sql)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(Book::from).collect())
}

/// Merge `update` into the stored book. Read and write share one transaction.
pub async fn update(
    db: &Database,
    id: i64,
    update: BookUpdate,
) -> Result<Option<Book>, CatalogError> {
    update.validate().map_err(CatalogError::Invalid)?;

    let mut tx = db.begin_immediate().await?;
    let Some(existing) = get(&mut tx, id).await? else {
        return Ok(None);
    };
    let merged = update.apply_to(existing);

    let sql = format!(
        "UPDATE books
         SET isbn10 = ?, isbn13 = ?, title = ?, description = ?, authors = ?,
             categories = ?, page_count = ?, published_date = ?
         WHERE id = ?
         RETURNING {BOOK_COLUMNS}"
    );
    let row: BookRow = sqlx::query_as(&sql)
        .bind(&merged.isbn10)
        .bind(&merged.isbn13)
        .bind(&merged.title)
        .bind(&merged.description)
        .bind(Json(&merged.authors))
        .bind(Json(&merged.categories))
        .bind(merged.page_count)
        .bind(&merged.published_date)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_write_error)?;
    tx.commit().await?;

    tracing::info!(book_id = id, "book updated");
    Ok(Some(row.into()))
}

/// Delete a book and return what was removed.
///
/// A book that was ever lent out is kept; its history rows reference it.
pub async fn delete(db: &Database, id: i64) -> Result<Option<Book>, CatalogError> {
    let mut tx = db.begin_immediate().await?;

    let lent: Option<i64> = sqlx::query_scalar("SELECT 1 FROM histories WHERE book_id = ? LIMIT 1")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    if lent.is_some() {
        return Err(CatalogError::HasHistory(id));
    }

    let sql = format!("DELETE FROM books WHERE id = ? RETURNING {BOOK_COLUMNS}");
    let row: Option<BookRow> = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|err| {
            if is_foreign_key_violation(&err) {
                CatalogError::HasHistory(id)
            } else {
                CatalogError::Store(err)
            }
        })?;
    tx.commit().await?;

    if let Some(row) = &row {
        tracing::info!(book_id = row.id, "book deleted");
    }
    Ok(row.map(Book::from))
}

/// Insert many books atomically; any invalid or duplicate entry aborts all.
pub async fn import(db: &Database, books: &[NewBook]) -> Result<usize, CatalogError> {
    let mut tx = db.begin_immediate().await?;
    for new_book in books {
        create(&mut tx, new_book).await?;
    }
    tx.commit().await?;

    tracing::info!(count = books.len(), "books imported");
    Ok(books.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::books::test_support::migrated_db;

    fn sample(title: &str) -> NewBook {
        NewBook {
            isbn10: Some("0000000000".to_string()),
            isbn13: Some("0000000000000".to_string()),
            title: title.to_string(),
            description: Some("test description".to_string()),
            authors: vec!["John Doe".to_string(), "Jane Roe".to_string()],
            categories: vec!["Literature".to_string()],
            page_count: Some(123),
            published_date: Some("2022-01-01".to_string()),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips_every_field() {
        let db = migrated_db().await;
        let mut conn = db.acquire().await.unwrap();

        let created = create(&mut conn, &sample("test book")).await.unwrap();
        let fetched = get(&mut conn, created.id).await.unwrap().unwrap();

        assert_eq!(fetched, created);
        assert_eq!(fetched.authors, vec!["John Doe", "Jane Roe"]);
        assert!(exists(&mut conn, created.id).await.unwrap());
    }

    #[tokio::test]
    async fn missing_book_is_none_not_error() {
        let db = migrated_db().await;
        let mut conn = db.acquire().await.unwrap();

        assert!(get(&mut conn, 500).await.unwrap().is_none());
        assert!(get(&mut conn, -1).await.unwrap().is_none());
        assert!(!exists(&mut conn, 500).await.unwrap());
        drop(conn);

        assert!(delete(&db, 500).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_isbn_is_rejected() {
        let db = migrated_db().await;
        let mut conn = db.acquire().await.unwrap();

        create(&mut conn, &sample("first")).await.unwrap();
        let err = create(&mut conn, &sample("second")).await.unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateIsbn));
    }

    #[tokio::test]
    async fn invalid_book_never_reaches_the_store() {
        let db = migrated_db().await;
        let mut conn = db.acquire().await.unwrap();

        let err = create(&mut conn, &NewBook::default()).await.unwrap_err();
        assert!(matches!(err, CatalogError::Invalid(ref problems) if problems[0].field == "title"));
        assert!(list(&mut conn, Page::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_pages_in_id_order() {
        let db = migrated_db().await;
        let mut conn = db.acquire().await.unwrap();
        for n in 0..5 {
            let book = NewBook {
                title: format!("book {n}"),
                ..NewBook::default()
            };
            create(&mut conn, &book).await.unwrap();
        }

        let page = list(&mut conn, Page { limit: 2, offset: 1 }).await.unwrap();
        let titles: Vec<&str> = page.iter().map(|book| book.title.as_str()).collect();
        assert_eq!(titles, vec!["book 1", "book 2"]);

        let past_end = list(&mut conn, Page { limit: 10, offset: 5 }).await.unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn update_merges_only_supplied_fields() {
        let db = migrated_db().await;
        let id = {
            let mut conn = db.acquire().await.unwrap();
            create(&mut conn, &sample("test book")).await.unwrap().id
        };

        let patch = BookUpdate {
            title: Some("new test book".to_string()),
            page_count: Some(500),
            ..BookUpdate::default()
        };
        let updated = update(&db, id, patch).await.unwrap().unwrap();

        assert_eq!(updated.title, "new test book");
        assert_eq!(updated.page_count, Some(500));
        assert_eq!(updated.isbn13.as_deref(), Some("0000000000000"));
        assert_eq!(updated.categories, vec!["Literature"]);

        assert!(update(&db, id + 100, BookUpdate::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_returns_snapshot_once() {
        let db = migrated_db().await;
        let created = {
            let mut conn = db.acquire().await.unwrap();
            create(&mut conn, &sample("doomed")).await.unwrap()
        };

        let deleted = delete(&db, created.id).await.unwrap().unwrap();
        assert_eq!(deleted, created);
        assert!(delete(&db, created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn book_with_history_is_not_deleted() {
        let db = migrated_db().await;
        let mut conn = db.acquire().await.unwrap();
        let created = create(&mut conn, &sample("lent")).await.unwrap();
        sqlx::query("INSERT INTO histories (book_id, borrowing_date, returning_date) VALUES (?, 0, 1)")
            .bind(created.id)
            .execute(&mut *conn)
            .await
            .unwrap();
        drop(conn);

        let err = delete(&db, created.id).await.unwrap_err();
        assert!(matches!(err, CatalogError::HasHistory(id) if id == created.id));

        let mut conn = db.acquire().await.unwrap();
        assert!(exists(&mut conn, created.id).await.unwrap());
    }

    #[tokio::test]
    async fn store_refuses_to_orphan_history() {
        let db = migrated_db().await;
        let mut conn = db.acquire().await.unwrap();
        let created = create(&mut conn, &sample("lent")).await.unwrap();
        sqlx::query("INSERT INTO histories (book_id, borrowing_date) VALUES (?, 0)")
            .bind(created.id)
            .execute(&mut *conn)
            .await
            .unwrap();

        let err = sqlx::query("DELETE FROM books WHERE id = ?")
            .bind(created.id)
            .execute(&mut *conn)
            .await
            .unwrap_err();
        assert!(is_foreign_key_violation(&err));
    }

    #[tokio::test]
    async fn import_is_all_or_nothing() {
        let db = migrated_db().await;

        let batch = vec![sample("one"), sample("two")];
        let err = import(&db, &batch).await.unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateIsbn));

        let mut conn = db.acquire().await.unwrap();
        assert!(list(&mut conn, Page::default()).await.unwrap().is_empty());
        drop(conn);

        let batch = vec![
            sample("one"),
            NewBook {
                title: "two".to_string(),
                ..NewBook::default()
            },
        ];
        assert_eq!(import(&db, &batch).await.unwrap(), 2);
    }
}

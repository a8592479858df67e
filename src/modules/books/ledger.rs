//! Lending ledger: the borrow/return history of every book.
//!
//! Whether a book is out is never stored on the book itself. It is derived
//! from the most recent `histories` row: an open row (no `returning_date`)
//! means borrowed, anything else means available.
//!
//! Each transition is one transaction that reads the latest row and then
//! writes conditionally. Two store-level guards back the read-then-write:
//! the partial unique index `histories_one_open_per_book` rejects a second
//! open row for a book, and the close statement only matches a row that is
//! still open. Transactions begin `IMMEDIATE`, so a concurrent caller waits
//! for the writer and then sees its result. Only a wait past the busy timeout
//! surfaces as a store error.

use std::sync::Arc;

use lectern_db::{from_micros, is_unique_violation, to_micros, truncate_to_micros, Database};
use lectern_kernel::Clock;
use sqlx::SqliteConnection;
use thiserror::Error;
use time::OffsetDateTime;

use super::catalog;
use super::models::{LendingRecord, LendingState};

const RECENCY_ORDER: &str =
    "ORDER BY borrowing_date DESC, returning_date DESC NULLS FIRST, id DESC";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("book {0} does not exist")]
    BookNotFound(i64),

    #[error("cannot borrow book {0}: it is already out")]
    AlreadyBorrowed(i64),

    #[error("cannot return book {0}: it is not currently out")]
    NotBorrowed(i64),

    /// The open record read for a return no longer matched when closing it.
    #[error("lending record {record_id} of book {book_id} changed before it could be closed")]
    StaleRecord { record_id: i64, book_id: i64 },

    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    book_id: i64,
    borrowing_date: i64,
    returning_date: Option<i64>,
}

impl TryFrom<HistoryRow> for LendingRecord {
    type Error = sqlx::Error;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(LendingRecord {
            id: row.id,
            book_id: row.book_id,
            borrowing_date: from_micros(row.borrowing_date)?,
            returning_date: row.returning_date.map(from_micros).transpose()?,
        })
    }
}

/// Most recent lending record of a book, if it was ever borrowed.
pub async fn latest(
    conn: &mut SqliteConnection,
    book_id: i64,
) -> Result<Option<LendingRecord>, sqlx::Error> {
    let sql = format!(
        "SELECT id, book_id, borrowing_date, returning_date
         FROM histories
         WHERE book_id = ?
         {RECENCY_ORDER}
         LIMIT 1"
    );
    let row: Option<HistoryRow> = sqlx::query_as(&sql)
        .bind(book_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(LendingRecord::try_from).transpose()
}

/// Every lending record of a book, most recent first.
pub async fn history(
    conn: &mut SqliteConnection,
    book_id: i64,
) -> Result<Vec<LendingRecord>, sqlx::Error> {
    let sql = format!(
        "SELECT id, book_id, borrowing_date, returning_date
         FROM histories
         WHERE book_id = ?
         {RECENCY_ORDER}"
    );
    let rows: Vec<HistoryRow> = sqlx::query_as(&sql)
        .bind(book_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(LendingRecord::try_from).collect()
}

pub async fn state(conn: &mut SqliteConnection, book_id: i64) -> Result<LendingState, sqlx::Error> {
    Ok(LendingState::from_latest(latest(conn, book_id).await?))
}

/// Close `open` at `returned_at`, matching the exact row that was read.
async fn close_record(
    conn: &mut SqliteConnection,
    open: &LendingRecord,
    returned_at: OffsetDateTime,
) -> Result<LendingRecord, LedgerError> {
    let row: Option<HistoryRow> = sqlx::query_as(
        "UPDATE histories
         SET returning_date = ?
         WHERE id = ? AND book_id = ? AND borrowing_date = ? AND returning_date IS NULL
         RETURNING id, book_id, borrowing_date, returning_date",
    )
    .bind(to_micros(returned_at))
    .bind(open.id)
    .bind(open.book_id)
    .bind(to_micros(open.borrowing_date))
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(LendingRecord::try_from(row)?),
        None => Err(LedgerError::StaleRecord {
            record_id: open.id,
            book_id: open.book_id,
        }),
    }
}

/// Borrow/return transitions, stamped by an injected clock.
#[derive(Clone)]
pub struct LendingLedger {
    clock: Arc<dyn Clock>,
}

impl LendingLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn now(&self) -> OffsetDateTime {
        truncate_to_micros(self.clock.now())
    }

    /// Open a new lending record for an available book.
    pub async fn borrow(&self, db: &Database, book_id: i64) -> Result<LendingRecord, LedgerError> {
        let mut tx = db.begin_immediate().await?;

        if !catalog::exists(&mut tx, book_id).await? {
            return Err(LedgerError::BookNotFound(book_id));
        }

        let previous = latest(&mut tx, book_id).await?;
        if previous.as_ref().is_some_and(LendingRecord::is_open) {
            tracing::debug!(book_id, "borrow rejected: book already out");
            return Err(LedgerError::AlreadyBorrowed(book_id));
        }

        // Never stamp a borrow before the last return, so the new row stays latest.
        let mut borrowed_at = self.now();
        if let Some(returned_at) = previous.and_then(|record| record.returning_date) {
            borrowed_at = borrowed_at.max(returned_at);
        }

        let row: HistoryRow = sqlx::query_as(
            "INSERT INTO histories (book_id, borrowing_date, returning_date)
             VALUES (?, ?, NULL)
             RETURNING id, book_id, borrowing_date, returning_date",
        )
        .bind(book_id)
        .bind(to_micros(borrowed_at))
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                LedgerError::AlreadyBorrowed(book_id)
            } else {
                LedgerError::Store(err)
            }
        })?;
        tx.commit().await?;

        let record = LendingRecord::try_from(row)?;
        tracing::info!(book_id, record_id = record.id, "book borrowed");
        Ok(record)
    }

    /// Close the open lending record of a borrowed book.
    pub async fn return_book(
        &self,
        db: &Database,
        book_id: i64,
    ) -> Result<LendingRecord, LedgerError> {
        let mut tx = db.begin_immediate().await?;

        if !catalog::exists(&mut tx, book_id).await? {
            return Err(LedgerError::BookNotFound(book_id));
        }

        let open = match latest(&mut tx, book_id).await? {
            Some(record) if record.is_open() => record,
            _ => {
                tracing::debug!(book_id, "return rejected: book not out");
                return Err(LedgerError::NotBorrowed(book_id));
            }
        };

        let returned_at = self.now().max(open.borrowing_date);
        let record = close_record(&mut tx, &open, returned_at).await?;
        tx.commit().await?;

        tracing::info!(book_id, record_id = record.id, "book returned");
        Ok(record)
    }
}

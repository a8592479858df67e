//! HTTP routes for books and lending.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use lectern_db::Database;
use lectern_http::error::AppError;
use lectern_http::extract::{Json, Path, Query};
use serde::Deserialize;
use serde_json::json;

use super::catalog::{self, CatalogError, Page};
use super::ledger::{self, LedgerError, LendingLedger};
use super::models::{Book, CreateBookBody, LendingRecord, UpdateBookBody};

/// Shared state handed to every books handler
#[derive(Clone)]
pub struct BooksState {
    pub db: Database,
    pub ledger: LendingLedger,
}

pub fn router(state: BooksState) -> Router {
    Router::new()
        .route("/books", get(list_books).post(create_book))
        .route("/books/", get(list_books).post(create_book))
        .route(
            "/books/{id}",
            get(get_book).patch(update_book).delete(delete_book),
        )
        .route("/books/{id}/burrow", post(borrow_book))
        .route("/books/{id}/return", post(return_book))
        .route("/books/{id}/burrow-history", get(borrow_history))
        .with_state(state)
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        let message = err.to_string();
        match err {
            CatalogError::Invalid(problems) => AppError::validation(
                problems.iter().map(|problem| problem.to_json()).collect(),
                message,
            ),
            CatalogError::DuplicateIsbn => AppError::conflict(
                vec![json!({"field": "isbn", "error": "already in use"})],
                message,
            ),
            CatalogError::HasHistory(id) => AppError::conflict(vec![json!({"book_id": id})], message),
            CatalogError::Store(source) => AppError::internal(source),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let message = err.to_string();
        match err {
            LedgerError::BookNotFound(_) => AppError::not_found(message),
            LedgerError::AlreadyBorrowed(_) => AppError::forbidden("already_borrowed", message),
            LedgerError::NotBorrowed(_) => AppError::forbidden("not_borrowed", message),
            LedgerError::StaleRecord { record_id, book_id } => AppError::conflict(
                vec![json!({"record_id": record_id, "book_id": book_id})],
                message,
            ),
            LedgerError::Store(source) => AppError::internal(source),
        }
    }
}

fn no_book(id: i64) -> String {
    format!("No book found with id {id}.")
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    limit: Option<i64>,
    offset: Option<i64>,
}

impl ListParams {
    fn page(&self) -> Result<Page, AppError> {
        let defaults = Page::default();
        let page = Page {
            limit: self.limit.unwrap_or(defaults.limit),
            offset: self.offset.unwrap_or(defaults.offset),
        };

        let mut problems = Vec::new();
        if page.limit < 0 {
            problems.push(json!({"field": "limit", "error": "must not be negative"}));
        }
        if page.offset < 0 {
            problems.push(json!({"field": "offset", "error": "must not be negative"}));
        }
        if problems.is_empty() {
            Ok(page)
        } else {
            Err(AppError::validation(problems, "pagination is invalid"))
        }
    }
}

async fn create_book(
    State(state): State<BooksState>,
    Json(body): Json<CreateBookBody>,
) -> Result<(StatusCode, Json<Book>), AppError> {
    let mut conn = state.db.acquire().await.map_err(AppError::internal)?;
    let book = catalog::create(&mut conn, &body.into_inner()).await?;
    Ok((StatusCode::CREATED, Json(book)))
}

async fn get_book(
    State(state): State<BooksState>,
    Path(id): Path<i64>,
) -> Result<Json<Book>, AppError> {
    let mut conn = state.db.acquire().await.map_err(AppError::internal)?;
    catalog::get(&mut conn, id)
        .await
        .map_err(AppError::internal)?
        .map(Json)
        .ok_or_else(|| AppError::not_found(no_book(id)))
}

async fn list_books(
    State(state): State<BooksState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Book>>, AppError> {
    let page = params.page()?;
    let mut conn = state.db.acquire().await.map_err(AppError::internal)?;
    let books = catalog::list(&mut conn, page)
        .await
        .map_err(AppError::internal)?;

    if books.is_empty() {
        return Err(AppError::not_found("No books found."));
    }
    Ok(Json(books))
}

async fn update_book(
    State(state): State<BooksState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateBookBody>,
) -> Result<Json<Book>, AppError> {
    catalog::update(&state.db, id, body.into_inner())
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(no_book(id)))
}

async fn delete_book(
    State(state): State<BooksState>,
    Path(id): Path<i64>,
) -> Result<Json<Book>, AppError> {
    catalog::delete(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::gone(no_book(id)))
}

async fn borrow_book(
    State(state): State<BooksState>,
    Path(id): Path<i64>,
) -> Result<Json<LendingRecord>, AppError> {
    let record = state.ledger.borrow(&state.db, id).await?;
    Ok(Json(record))
}

async fn return_book(
    State(state): State<BooksState>,
    Path(id): Path<i64>,
) -> Result<Json<LendingRecord>, AppError> {
    let record = state.ledger.return_book(&state.db, id).await?;
    Ok(Json(record))
}

async fn borrow_history(
    State(state): State<BooksState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<LendingRecord>>, AppError> {
    let mut conn = state.db.acquire().await.map_err(AppError::internal)?;
    let records = ledger::history(&mut conn, id)
        .await
        .map_err(AppError::internal)?;

    if records.is_empty() {
        return Err(AppError::not_found(format!(
            "No lending history found for book {id}."
        )));
    }
    Ok(Json(records))
}

pub mod catalog;
pub mod ledger;
pub mod models;
pub mod routes;

use async_trait::async_trait;
use axum::Router;
use lectern_kernel::{InitCtx, Migration, Module};

use ledger::LendingLedger;

/// Books module: catalog CRUD plus the lending ledger
pub struct BooksModule;

impl BooksModule {
    pub const fn new() -> Self {
        Self
    }
}

impl Default for BooksModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for BooksModule {
    fn name(&self) -> &'static str {
        "books"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            "books module initialized"
        );
        Ok(())
    }

    fn routes(&self, ctx: &InitCtx<'_>) -> Router {
        routes::router(routes::BooksState {
            db: ctx.db.clone(),
            ledger: LendingLedger::new(ctx.clock.clone()),
        })
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        Some(openapi_fragment())
    }

    fn migrations(&self) -> Vec<Migration> {
        vec![
            Migration {
                id: "001_create_books",
                up: r#"
                CREATE TABLE books (
                    id             INTEGER PRIMARY KEY AUTOINCREMENT,
                    isbn10         TEXT UNIQUE CHECK (isbn10 IS NULL OR length(isbn10) <= 10),
                    isbn13         TEXT UNIQUE CHECK (isbn13 IS NULL OR length(isbn13) <= 13),
                    title          TEXT NOT NULL CHECK (title <> ''),
                    description    TEXT,
                    authors        TEXT NOT NULL DEFAULT '[]',
                    categories     TEXT NOT NULL DEFAULT '[]',
                    page_count     INTEGER CHECK (page_count IS NULL OR page_count >= 0),
                    published_date TEXT
                );
                "#,
            },
            Migration {
                id: "002_create_histories",
                up: r#"
                CREATE TABLE histories (
                    id             INTEGER PRIMARY KEY AUTOINCREMENT,
                    book_id        INTEGER NOT NULL REFERENCES books (id),
                    borrowing_date INTEGER NOT NULL,
                    returning_date INTEGER CHECK (returning_date IS NULL OR returning_date >= borrowing_date)
                );
                CREATE INDEX histories_book_recency
                    ON histories (book_id, borrowing_date DESC);
                CREATE UNIQUE INDEX histories_one_open_per_book
                    ON histories (book_id) WHERE returning_date IS NULL;
                "#,
            },
        ]
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "books module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "books module stopped");
        Ok(())
    }
}

/// Create a new instance of the books module
pub fn create_module() -> std::sync::Arc<dyn Module> {
    std::sync::Arc::new(BooksModule::new())
}

fn error_response(description: &str) -> serde_json::Value {
    serde_json::json!({
        "description": description,
        "content": {
            "application/json": {
                "schema": { "$ref": "#/components/schemas/ErrorResponse" }
            }
        }
    })
}

fn json_response(description: &str, schema: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "description": description,
        "content": { "application/json": { "schema": schema } }
    })
}

fn id_parameter() -> serde_json::Value {
    serde_json::json!({
        "name": "id",
        "in": "path",
        "required": true,
        "schema": { "type": "integer", "format": "int64" }
    })
}

fn openapi_fragment() -> serde_json::Value {
    let book = serde_json::json!({ "$ref": "#/components/schemas/Book" });
    let books = serde_json::json!({ "type": "array", "items": book.clone() });
    let record = serde_json::json!({ "$ref": "#/components/schemas/LendingRecord" });
    let records = serde_json::json!({ "type": "array", "items": record.clone() });

    serde_json::json!({
        "paths": {
            "/books/": {
                "get": {
                    "summary": "List books",
                    "tags": ["Books"],
                    "parameters": [
                        { "name": "limit", "in": "query", "schema": { "type": "integer", "default": 10 } },
                        { "name": "offset", "in": "query", "schema": { "type": "integer", "default": 0 } }
                    ],
                    "responses": {
                        "200": json_response("Page of books", books),
                        "404": error_response("No books on this page"),
                        "422": error_response("Invalid pagination")
                    }
                },
                "post": {
                    "summary": "Create a book",
                    "tags": ["Books"],
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": { "$ref": "#/components/schemas/NewBook" }
                            }
                        }
                    },
                    "responses": {
                        "201": json_response("Created book", book.clone()),
                        "409": error_response("Duplicate isbn"),
                        "422": error_response("Invalid body")
                    }
                }
            },
            "/books/{id}": {
                "get": {
                    "summary": "Get a book",
                    "tags": ["Books"],
                    "parameters": [id_parameter()],
                    "responses": {
                        "200": json_response("Book", book.clone()),
                        "404": error_response("No book found with that id")
                    }
                },
                "patch": {
                    "summary": "Update a book; only supplied fields change",
                    "tags": ["Books"],
                    "parameters": [id_parameter()],
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": { "$ref": "#/components/schemas/BookUpdate" }
                            }
                        }
                    },
                    "responses": {
                        "200": json_response("Updated book", book.clone()),
                        "404": error_response("No book found with that id"),
                        "422": error_response("Invalid body")
                    }
                },
                "delete": {
                    "summary": "Delete a book",
                    "tags": ["Books"],
                    "parameters": [id_parameter()],
                    "responses": {
                        "200": json_response("Deleted book", book),
                        "409": error_response("Book has lending history"),
                        "410": error_response("No book found with that id")
                    }
                }
            },
            "/books/{id}/burrow": {
                "post": {
                    "summary": "Borrow a book",
                    "tags": ["Lending"],
                    "parameters": [id_parameter()],
                    "responses": {
                        "200": json_response("Opened lending record", record.clone()),
                        "403": error_response("Book is already out"),
                        "404": error_response("No book found with that id")
                    }
                }
            },
            "/books/{id}/return": {
                "post": {
                    "summary": "Return a book",
                    "tags": ["Lending"],
                    "parameters": [id_parameter()],
                    "responses": {
                        "200": json_response("Closed lending record", record),
                        "403": error_response("Book is not out"),
                        "404": error_response("No book found with that id"),
                        "409": error_response("Lending record changed concurrently")
                    }
                }
            },
            "/books/{id}/burrow-history": {
                "get": {
                    "summary": "Lending history, most recent first",
                    "tags": ["Lending"],
                    "parameters": [id_parameter()],
                    "responses": {
                        "200": json_response("Lending records", records),
                        "404": error_response("Book was never borrowed")
                    }
                }
            }
        },
        "components": {
            "schemas": {
                "Book": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "integer", "format": "int64" },
                        "isbn10": { "type": ["string", "null"], "maxLength": 10 },
                        "isbn13": { "type": ["string", "null"], "maxLength": 13 },
                        "title": { "type": "string" },
                        "description": { "type": ["string", "null"] },
                        "authors": { "type": "array", "items": { "type": "string" } },
                        "categories": { "type": "array", "items": { "type": "string" } },
                        "page_count": { "type": ["integer", "null"], "minimum": 0 },
                        "published_date": { "type": ["string", "null"] }
                    },
                    "required": ["id", "title", "authors", "categories"]
                },
                "NewBook": {
                    "type": "object",
                    "properties": {
                        "isbn10": { "type": "string", "maxLength": 10 },
                        "isbn13": { "type": "string", "maxLength": 13 },
                        "title": { "type": "string", "minLength": 1 },
                        "description": { "type": "string" },
                        "authors": { "type": "array", "items": { "type": "string" } },
                        "categories": { "type": "array", "items": { "type": "string" } },
                        "page_count": { "type": "integer", "minimum": 0 },
                        "published_date": { "type": "string" }
                    },
                    "required": ["title"]
                },
                "BookUpdate": {
                    "type": "object",
                    "properties": {
                        "isbn10": { "type": "string", "maxLength": 10 },
                        "isbn13": { "type": "string", "maxLength": 13 },
                        "title": { "type": "string", "minLength": 1 },
                        "description": { "type": "string" },
                        "authors": { "type": "array", "items": { "type": "string" } },
                        "categories": { "type": "array", "items": { "type": "string" } },
                        "page_count": { "type": "integer", "minimum": 0 },
                        "published_date": { "type": "string" }
                    }
                },
                "LendingRecord": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "integer", "format": "int64" },
                        "book_id": { "type": "integer", "format": "int64" },
                        "borrowing_date": { "type": "string", "format": "date-time" },
                        "returning_date": { "type": ["string", "null"], "format": "date-time" }
                    },
                    "required": ["id", "book_id", "borrowing_date", "returning_date"]
                }
            }
        }
    })
}

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use lectern_kernel::settings::Settings;
use lectern_kernel::{Database, InitCtx, ManualClock};
use serde_json::{json, Value};
use time::macros::datetime;
use time::Duration;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    clock: Arc<ManualClock>,
}

impl TestApp {
    async fn new() -> Self {
        let settings = Settings::default();
        let registry = lectern_app::registry();
        let db = Database::in_memory().await.unwrap();
        lectern_app::apply_migrations(&db, &registry).await.unwrap();

        let clock = Arc::new(ManualClock::new(datetime!(2024-06-01 08:00 UTC)));
        let ctx = InitCtx {
            settings: &settings,
            db: &db,
            clock: clock.clone(),
        };
        let router = lectern_http::build_router(&registry, &ctx);

        Self { router, clock }
    }

    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(&self, book: Value) -> Value {
        let (status, body) = self.send(Method::POST, "/books/", Some(book)).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }
}

fn sample_book() -> Value {
    json!({
        "isbn10": "0000000000",
        "isbn13": "0000000000000",
        "title": "test book",
        "description": "test description",
        "authors": ["John Doe"],
        "categories": ["Literature"],
        "page_count": 123,
        "published_date": "2022-01-01"
    })
}

#[tokio::test]
async fn create_book_echoes_every_field() {
    let app = TestApp::new().await;

    let created = app.create(json!({ "new_book": sample_book() })).await;
    assert!(created["id"].as_i64().is_some());
    for (field, value) in sample_book().as_object().unwrap() {
        assert_eq!(&created[field], value, "field {field}");
    }
}

#[tokio::test]
async fn invalid_create_payloads_are_unprocessable() {
    let app = TestApp::new().await;

    for payload in [
        json!(null),
        json!({}),
        json!({"new_book": null}),
        json!({"new_book": {}}),
        json!({"new_book": {"title": null}}),
        json!({"new_book": {"title": "t", "page_count": 123.45}}),
        json!({"new_book": {"title": null, "description": "test description"}}),
        json!({"title": ""}),
        json!({"title": "t", "page_count": -3}),
    ] {
        let (status, body) = app.send(Method::POST, "/books/", Some(payload.clone())).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "payload {payload}");
        assert_eq!(body["error"]["code"], "validation_error");
    }
}

#[tokio::test]
async fn duplicate_isbn_is_a_conflict() {
    let app = TestApp::new().await;
    app.create(sample_book()).await;

    let (status, _) = app.send(Method::POST, "/books/", Some(sample_book())).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn get_book_by_id_and_missing_ids() {
    let app = TestApp::new().await;
    let created = app.create(json!({"title": "X"})).await;
    let id = created["id"].as_i64().unwrap();

    let (status, body) = app.send(Method::GET, &format!("/books/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, created);

    let (status, _) = app.send(Method::GET, "/books/500", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.send(Method::GET, "/books/-1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.send(Method::GET, "/books/abc", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn list_books_pages_and_reports_empty_pages() {
    let app = TestApp::new().await;

    let (status, _) = app.send(Method::GET, "/books/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    for n in 0..3 {
        app.create(json!({ "title": format!("book {n}") })).await;
    }

    let (status, body) = app.send(Method::GET, "/books/?limit=2&offset=1", None).await;
    assert_eq!(status, StatusCode::OK);
    let titles: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|book| book["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["book 1", "book 2"]);

    let (status, body) = app.send(Method::GET, "/books", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);

    let (status, _) = app.send(Method::GET, "/books/?offset=10", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.send(Method::GET, "/books/?limit=-1", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn patch_merges_supplied_fields() {
    let app = TestApp::new().await;
    let created = app.create(sample_book()).await;
    let id = created["id"].as_i64().unwrap();

    let (status, body) = app
        .send(
            Method::PATCH,
            &format!("/books/{id}"),
            Some(json!({"update_data": {"title": "new test book", "page_count": 500}})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "new test book");
    assert_eq!(body["page_count"], 500);
    assert_eq!(body["isbn10"], created["isbn10"]);
    assert_eq!(body["authors"], created["authors"]);

    let (status, _) = app
        .send(Method::PATCH, &format!("/books/{id}"), Some(json!({"update_data": null})))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .send(Method::PATCH, "/books/50", Some(json!({"title": "new title"})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_returns_snapshot_then_gone() {
    let app = TestApp::new().await;
    let created = app.create(json!({"title": "X"})).await;
    let id = created["id"].as_i64().unwrap();

    let (status, body) = app.send(Method::DELETE, &format!("/books/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, created);

    let (status, body) = app.send(Method::DELETE, &format!("/books/{id}"), None).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error"]["code"], "gone");

    let (status, _) = app.send(Method::DELETE, "/books/12345", None).await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn borrow_and_return_scenario() {
    let app = TestApp::new().await;
    let created = app.create(json!({"title": "X"})).await;
    let id = created["id"].as_i64().unwrap();

    let (status, borrowed) = app.send(Method::POST, &format!("/books/{id}/burrow"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(borrowed["book_id"], id);
    assert_eq!(borrowed["borrowing_date"], "2024-06-01T08:00:00Z");
    assert!(borrowed["returning_date"].is_null());

    let (status, body) = app.send(Method::POST, &format!("/books/{id}/burrow"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "already_borrowed");

    app.clock.advance(Duration::days(7));
    let (status, returned) = app.send(Method::POST, &format!("/books/{id}/return"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(returned["id"], borrowed["id"]);
    assert_eq!(returned["borrowing_date"], borrowed["borrowing_date"]);
    assert_eq!(returned["returning_date"], "2024-06-08T08:00:00Z");

    let (status, body) = app.send(Method::POST, &format!("/books/{id}/return"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "not_borrowed");
}

#[tokio::test]
async fn lending_a_missing_book_is_not_found() {
    let app = TestApp::new().await;

    let (status, _) = app.send(Method::POST, "/books/77/burrow", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.send(Method::POST, "/books/77/return", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn borrow_history_lists_most_recent_first() {
    let app = TestApp::new().await;
    let created = app.create(json!({"title": "X"})).await;
    let id = created["id"].as_i64().unwrap();

    let (status, _) = app.send(Method::GET, &format!("/books/{id}/burrow-history"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, first) = app.send(Method::POST, &format!("/books/{id}/burrow"), None).await;
    app.clock.advance(Duration::hours(1));
    app.send(Method::POST, &format!("/books/{id}/return"), None).await;
    app.clock.advance(Duration::hours(1));
    let (_, second) = app.send(Method::POST, &format!("/books/{id}/burrow"), None).await;

    let (status, body) = app.send(Method::GET, &format!("/books/{id}/burrow-history"), None).await;
    assert_eq!(status, StatusCode::OK);
    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["id"], second["id"]);
    assert!(records[0]["returning_date"].is_null());
    assert_eq!(records[1]["id"], first["id"]);
    assert_eq!(records[1]["returning_date"], "2024-06-01T09:00:00Z");
}

#[tokio::test]
async fn book_with_history_cannot_be_deleted() {
    let app = TestApp::new().await;
    let created = app.create(json!({"title": "X"})).await;
    let id = created["id"].as_i64().unwrap();

    app.send(Method::POST, &format!("/books/{id}/burrow"), None).await;

    let (status, body) = app.send(Method::DELETE, &format!("/books/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["details"][0]["book_id"], id);

    let (status, _) = app.send(Method::GET, &format!("/books/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
}

//! Integration tests for the HTTP surface and the live route registry.
//!
//! Tests verify that:
//! - Built-in routes list tables, describe tables and run free-form queries
//! - POST /generate-api registers routes that are callable immediately
//! - Re-generation replaces routes instead of duplicating them
//! - Errors map to 400/404/500 with an `error` field
//! - Registration counts are reported in `x-endpoints-*` headers
//! - Non-ASCII columns and percent-encoded table names round-trip

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use common::{MockConnector, logs_table, sqlite_fixture, users_table};
use db_api_gateway::api::{EndpointRegistry, GeneratorConfig};
use db_api_gateway::db::{CancelToken, Connector};
use db_api_gateway::models::{Column, HttpMethod, TableMetadata};
use db_api_gateway::transport::{HttpState, router};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tower::ServiceExt;

fn app_with(connector: Arc<dyn Connector>, config: GeneratorConfig) -> (Router, Arc<EndpointRegistry>) {
    let registry = Arc::new(EndpointRegistry::new());
    let state = HttpState::new(connector, Arc::clone(&registry), config, CancelToken::new());
    (router(Arc::new(state)), registry)
}

fn mock_app(connector: Arc<MockConnector>) -> (Router, Arc<EndpointRegistry>) {
    app_with(connector, GeneratorConfig::default())
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, JsonValue) {
    let (status, _, value) = call_with_headers(app, method, uri, body).await;
    (status, value)
}

async fn call_with_headers(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<&str>,
) -> (StatusCode, HeaderMap, JsonValue) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, value)
}

fn header_count(headers: &HeaderMap, name: &str) -> usize {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap()
}

#[tokio::test]
async fn test_list_tables() {
    let connector = Arc::new(MockConnector::new(vec![users_table(), logs_table()]));
    let (app, _) = mock_app(connector);

    let (status, body) = call(&app, "GET", "/api/db/tables", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"name": "users", "row_count": 2}, {"name": "logs", "row_count": 0}]));
}

#[tokio::test]
async fn test_list_tables_failure_is_500() {
    let mut connector = MockConnector::new(vec![]);
    connector.fail_list = true;
    let (app, _) = mock_app(Arc::new(connector));

    let (status, body) = call(&app, "GET", "/api/db/tables", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .starts_with("Failed to list tables")
    );
}

#[tokio::test]
async fn test_table_metadata() {
    let connector = Arc::new(MockConnector::new(vec![users_table()]));
    let (app, _) = mock_app(connector);

    let (status, body) = call(&app, "GET", "/api/db/tables/users", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "users");
    assert_eq!(body["columns"][0]["type"], "serial");
    assert!(body.get("verbose_description").is_none());

    let (status, body) = call(&app, "GET", "/api/db/tables/missing", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("table not found"));
}

#[tokio::test]
async fn test_table_metadata_enhanced_when_enabled() {
    let connector = Arc::new(MockConnector::new(vec![users_table()]));
    let (app, _) = app_with(connector, GeneratorConfig::default().with_enable_llm(true));

    let (status, body) = call(&app, "GET", "/api/db/tables/users", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        body["verbose_description"]
            .as_str()
            .unwrap()
            .starts_with("Table users contains 2 columns")
    );
}

#[tokio::test]
async fn test_query_endpoint() {
    let connector = Arc::new(MockConnector::new(vec![]));
    let (app, _) = mock_app(Arc::clone(&connector));

    let (status, body) = call(
        &app,
        "POST",
        "/api/db/query",
        Some(r#"{"query": "SELECT * FROM t WHERE id = :id", "params": {"id": 5}}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"id": 5}]));
    let (sql, _) = connector.last_executed().unwrap();
    assert_eq!(sql, "SELECT * FROM t WHERE id = :id");
}

#[tokio::test]
async fn test_query_endpoint_malformed_body_is_400() {
    let connector = Arc::new(MockConnector::new(vec![]));
    let (app, _) = mock_app(Arc::clone(&connector));

    for body in [Some("{not json"), Some(r#"{"params": {}}"#), None] {
        let (status, value) = call(&app, "POST", "/api/db/query", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(value["error"].as_str().unwrap().contains("Invalid request"));
    }
    assert!(connector.last_executed().is_none());
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let connector = Arc::new(MockConnector::new(vec![users_table()]));
    let (app, _) = mock_app(connector);

    let (status, body) = call(&app, "GET", "/api/db/users", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = call(&app, "GET", "/elsewhere/tables", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, "PATCH", "/api/db/tables", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_generate_api_registers_live_routes() {
    let connector = Arc::new(MockConnector::new(vec![users_table(), logs_table()]));
    let (app, registry) = mock_app(Arc::clone(&connector));

    let (status, body) = call(&app, "POST", "/api/db/generate-api", Some(r#"{"tables": ["users"]}"#)).await;
    assert_eq!(status, StatusCode::OK);
    let generated = body.as_array().unwrap();
    assert_eq!(generated.len(), 8);
    assert_eq!(generated[0]["method"], "GET");
    assert_eq!(generated[0]["path"], "/users");

    // 4 built-ins + 5 users routes
    assert_eq!(registry.len().await, 9);

    let (status, body) = call(&app, "GET", "/api/db/users/7?id=9&extra=x", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"id": "7", "extra": "x"}]));
    let (sql, _) = connector.last_executed().unwrap();
    assert_eq!(sql, r#"SELECT * FROM "users" WHERE "id" = :id"#);

    let (status, body) = call(
        &app,
        "PUT",
        "/api/db/users/7",
        Some(r#"{"email": "new@example.com"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"id": "7", "email": "new@example.com"}]));

    let (status, _) = call(&app, "GET", "/api/db/logs", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_generate_api_without_body_covers_all_tables() {
    let connector = Arc::new(MockConnector::new(vec![users_table(), logs_table()]));
    let (app, registry) = mock_app(connector);

    let (status, body) = call(&app, "POST", "/api/db/generate-api", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 10);
    assert_eq!(registry.len().await, 11);
}

#[tokio::test]
async fn test_regeneration_replaces_routes() {
    let connector = Arc::new(MockConnector::new(vec![users_table()]));
    let (app, registry) = mock_app(connector);

    for _ in 0..3 {
        let (status, _) = call(&app, "POST", "/api/db/generate-api", Some(r#"{"tables": ["users"]}"#)).await;
        assert_eq!(status, StatusCode::OK);
    }

    assert_eq!(registry.len().await, 9);
    let endpoints = registry.endpoints().await;
    let get_by_id = endpoints
        .iter()
        .filter(|e| e.method == HttpMethod::Get && e.path == "/users/:id")
        .count();
    assert_eq!(get_by_id, 1);
}

#[tokio::test]
async fn test_generate_api_failure_is_500() {
    let mut connector = MockConnector::new(vec![]);
    connector.fail_list = true;
    let (app, _) = mock_app(Arc::new(connector));

    let (status, body) = call(&app, "POST", "/api/db/generate-api", Some("{}")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("Failed to generate API"));
}

#[tokio::test]
async fn test_custom_prefix() {
    let connector = Arc::new(MockConnector::new(vec![users_table()]));
    let (app, _) = app_with(connector, GeneratorConfig::default().with_api_prefix("/v1"));

    let (status, _) = call(&app, "GET", "/v1/tables", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "GET", "/api/db/tables", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_generated_routes_against_sqlite() {
    let (_dir, connector) = sqlite_fixture(
        true,
        &[
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, email TEXT NOT NULL)",
            "INSERT INTO users (email) VALUES ('a@example.com'), ('b@example.com')",
        ],
    )
    .await;
    let (app, _) = app_with(connector, GeneratorConfig::default());

    let (status, _) = call(&app, "POST", "/api/db/generate-api", Some(r#"{"tables": []}"#)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "GET", "/api/db/users?limit=1&offset=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"id": 2, "email": "b@example.com"}]));

    let (status, _) = call(&app, "POST", "/api/db/users", Some(r#"{"email": "c@example.com"}"#)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "GET", "/api/db/users/3", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["email"], "c@example.com");

    let (status, body) = call(&app, "DELETE", "/api/db/users/3", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    // Missing paging parameters cannot be bound.
    let (status, body) = call(&app, "GET", "/api/db/users", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("limit"));
}

#[tokio::test]
async fn test_generate_api_reports_counts_in_headers() {
    let connector = Arc::new(MockConnector::new(vec![users_table()]));
    let (app, _) = mock_app(connector);

    let (status, headers, _) =
        call_with_headers(&app, "POST", "/api/db/generate-api", Some(r#"{"tables": ["users"]}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header_count(&headers, "x-endpoints-added"), 5);
    assert_eq!(header_count(&headers, "x-endpoints-replaced"), 3);
    assert_eq!(header_count(&headers, "x-endpoints-skipped"), 0);
}

#[tokio::test]
async fn test_table_named_like_builtin_reports_skipped_routes() {
    let tables = TableMetadata::new("tables")
        .with_column(Column::new("id", "serial").with_primary_key(true))
        .with_column(Column::new("label", "text"));
    let connector = Arc::new(MockConnector::new(vec![tables]));
    let (app, _) = mock_app(Arc::clone(&connector));

    let (status, headers, body) = call_with_headers(&app, "POST", "/api/db/generate-api", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 8);
    // GET /tables and GET /tables/:id collide with the built-ins.
    assert_eq!(header_count(&headers, "x-endpoints-skipped"), 2);
    assert_eq!(header_count(&headers, "x-endpoints-added"), 3);

    let (status, body) = call(&app, "GET", "/api/db/tables", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"name": "tables", "row_count": 0}]));
    assert!(connector.last_executed().is_none());
}

#[tokio::test]
async fn test_non_ascii_column_against_sqlite() {
    let (_dir, connector) = sqlite_fixture(
        true,
        &[r#"CREATE TABLE prefs (id INTEGER PRIMARY KEY AUTOINCREMENT, "café" TEXT)"#],
    )
    .await;
    let (app, _) = app_with(connector, GeneratorConfig::default());

    let (status, _) = call(&app, "POST", "/api/db/generate-api", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&app, "POST", "/api/db/prefs", Some(r#"{"café": "noir"}"#)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "GET", "/api/db/prefs/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"id": 1, "café": "noir"}]));
}

#[tokio::test]
async fn test_percent_encoded_table_name_against_sqlite() {
    let (_dir, connector) = sqlite_fixture(
        true,
        &[
            r#"CREATE TABLE "order items" (id INTEGER PRIMARY KEY, sku TEXT)"#,
            r#"INSERT INTO "order items" (id, sku) VALUES (1, 'A-1')"#,
        ],
    )
    .await;
    let (app, _) = app_with(connector, GeneratorConfig::default());

    let (status, _) = call(&app, "POST", "/api/db/generate-api", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "GET", "/api/db/order%20items/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"id": 1, "sku": "A-1"}]));
}

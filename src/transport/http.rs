//! HTTP transport for the generated endpoints.
//!
//! Routing is data-driven: axum hands every request to one fallback handler,
//! which strips the API prefix and looks the route up in the registry at
//! request time. Routes registered by `POST /generate-api` are therefore live
//! immediately, without rebuilding the router.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tokio::net::TcpListener;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use crate::api::{ApiGenerator, Builtin, EndpointRegistry, GeneratorConfig, RouteMatch};
use crate::db::enhance::try_enhance;
use crate::db::{CancelToken, Connector, QueryParams};
use crate::error::{DbError, DbResult};
use crate::models::HttpMethod;
use crate::transport::Transport;

/// Everything a request handler needs. One per server start.
pub struct HttpState {
    connector: Arc<dyn Connector>,
    registry: Arc<EndpointRegistry>,
    generator: GeneratorConfig,
    cancel: CancelToken,
}

impl HttpState {
    /// Requests are served under `generator.api_prefix`.
    pub fn new(
        connector: Arc<dyn Connector>,
        registry: Arc<EndpointRegistry>,
        generator: GeneratorConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            connector,
            registry,
            generator,
            cancel,
        }
    }

    fn prefix(&self) -> &str {
        &self.generator.api_prefix
    }
}

/// Body of `POST /query`.
#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    params: QueryParams,
}

/// Body of `POST /generate-api`.
#[derive(Debug, Default, Deserialize)]
struct GenerateRequest {
    #[serde(default)]
    tables: Vec<String>,
}

/// Build the router serving every registered route.
pub fn router(state: Arc<HttpState>) -> Router {
    Router::new().fallback(dispatch).with_state(state)
}

async fn dispatch(
    State(state): State<Arc<HttpState>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!("request", id = %request_id, method = %method, path = %uri.path());

    async move {
        let response = route_request(&state, &method, &uri, &body).await;
        debug!(status = response.status().as_u16(), "Request completed");
        response
    }
    .instrument(span)
    .await
}

async fn route_request(state: &HttpState, method: &Method, uri: &Uri, body: &[u8]) -> Response {
    let Some(relative) = strip_prefix(uri.path(), state.prefix()) else {
        return not_found(method, uri.path());
    };
    let Some(http_method) = HttpMethod::parse(method.as_str()) else {
        return not_found(method, uri.path());
    };
    let Some(route) = state.registry.resolve(http_method, relative).await else {
        return not_found(method, uri.path());
    };

    let body = match parse_body(body) {
        Ok(body) => body,
        Err(e) => return e.into_response(),
    };

    match route.builtin {
        Some(Builtin::ListTables) => list_tables(state).await,
        Some(Builtin::TableMetadata) => table_metadata(state, &route).await,
        Some(Builtin::Query) => execute_query(state, body).await,
        Some(Builtin::GenerateApi) => generate_api(state, body).await,
        None => execute_generated(state, &route, uri.query(), body.as_ref()).await,
    }
}

/// `path` relative to `prefix`, or `None` when outside it.
fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

fn parse_body(body: &[u8]) -> DbResult<Option<JsonValue>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| DbError::invalid_input(format!("Invalid request: {}", e)))
}

fn not_found(method: &Method, path: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("No endpoint for {} {}", method, path) })),
    )
        .into_response()
}

/// Error response whose message is prefixed with what was being attempted.
fn failure(context: &str, err: DbError) -> Response {
    (
        err.status_code(),
        Json(json!({ "error": format!("{}: {}", context, err) })),
    )
        .into_response()
}

async fn list_tables(state: &HttpState) -> Response {
    match state.connector.list_tables(&state.cancel).await {
        Ok(tables) => Json(tables).into_response(),
        Err(e) => failure("Failed to list tables", e),
    }
}

async fn table_metadata(state: &HttpState, route: &RouteMatch) -> Response {
    let Some(JsonValue::String(table)) = route.path_params.get("tableName") else {
        return DbError::invalid_input("Invalid request: missing table name").into_response();
    };

    match state.connector.get_table_metadata(&state.cancel, table).await {
        Ok(mut metadata) => {
            if state.generator.enable_llm {
                try_enhance(state.connector.as_ref(), &state.cancel, &mut metadata).await;
            }
            Json(metadata).into_response()
        }
        Err(e) => failure("Failed to get table metadata", e),
    }
}

async fn execute_query(state: &HttpState, body: Option<JsonValue>) -> Response {
    let request = match body
        .map(serde_json::from_value::<QueryRequest>)
        .transpose()
    {
        Ok(Some(request)) => request,
        Ok(None) => {
            return DbError::invalid_input("Invalid request: missing body").into_response();
        }
        Err(e) => {
            return DbError::invalid_input(format!("Invalid request: {}", e)).into_response();
        }
    };
    if request.query.trim().is_empty() {
        return DbError::invalid_input("Invalid request: query is empty").into_response();
    }

    match state
        .connector
        .execute_query(&state.cancel, &request.query, &request.params)
        .await
    {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => failure("Failed to execute query", e),
    }
}

/// Generate and register endpoints. The body lists every generated descriptor;
/// the `x-endpoints-*` headers report how many were added, replaced or skipped.
/// Descriptors landing on a built-in route shape, such as those of a table
/// named `tables`, are skipped.
async fn generate_api(state: &HttpState, body: Option<JsonValue>) -> Response {
    let request = match body
        .map(serde_json::from_value::<GenerateRequest>)
        .transpose()
    {
        Ok(request) => request.unwrap_or_default(),
        Err(e) => {
            return DbError::invalid_input(format!("Invalid request: {}", e)).into_response();
        }
    };

    let generator = ApiGenerator::new(Arc::clone(&state.connector), state.generator.clone());
    match generator.generate(&state.cancel, &request.tables).await {
        Ok(endpoints) => {
            let report = state.registry.register(&endpoints).await;
            info!(
                added = report.added,
                replaced = report.replaced,
                skipped = report.skipped,
                "Registered generated endpoints"
            );
            let counts = [
                (HeaderName::from_static("x-endpoints-added"), report.added),
                (HeaderName::from_static("x-endpoints-replaced"), report.replaced),
                (HeaderName::from_static("x-endpoints-skipped"), report.skipped),
            ]
            .map(|(name, count)| (name, HeaderValue::from(count)));
            (counts, Json(endpoints)).into_response()
        }
        Err(e) => failure("Failed to generate API", e),
    }
}

async fn execute_generated(
    state: &HttpState,
    route: &RouteMatch,
    query: Option<&str>,
    body: Option<&JsonValue>,
) -> Response {
    let params = route.parameters(query, body);
    match state
        .connector
        .execute_query(&state.cancel, &route.descriptor.query, &params)
        .await
    {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Binds a TCP listener and serves the router until the token fires.
pub struct HttpTransport {
    state: Arc<HttpState>,
    bind_addr: String,
}

impl HttpTransport {
    pub fn new(state: Arc<HttpState>, bind_addr: impl Into<String>) -> Self {
        Self {
            state,
            bind_addr: bind_addr.into(),
        }
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }
}

impl Transport for HttpTransport {
    async fn run(&self) -> DbResult<()> {
        let listener = TcpListener::bind(&self.bind_addr).await.map_err(|e| {
            DbError::connection(
                format!("Failed to bind to {}: {}", self.bind_addr, e),
                "Check that the port is available",
            )
        })?;

        info!(
            addr = %self.bind_addr,
            prefix = %self.state.prefix(),
            "HTTP API listening"
        );

        let cancel = self.state.cancel.clone();
        axum::serve(listener, router(Arc::clone(&self.state)))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| DbError::internal(format!("HTTP server error: {}", e)))?;

        info!(addr = %self.bind_addr, "HTTP API stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

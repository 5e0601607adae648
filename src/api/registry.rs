//! Runtime route table for generated endpoints.
//!
//! Routes are keyed by method and path shape, where every `:param` segment is
//! normalised, so `/users/:id` and `/users/:user_id` collide. The newest
//! descriptor behind a key replaces the previous one. The built-in routes are
//! reserved and cannot be shadowed by generated SQL.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::api::query_builder;
use crate::db::QueryParams;
use crate::models::{EndpointDescriptor, HttpMethod};

/// Fixed handlers a sentinel descriptor dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    ListTables,
    TableMetadata,
    Query,
    GenerateApi,
}

impl Builtin {
    const ALL: [Builtin; 4] = [
        Builtin::ListTables,
        Builtin::TableMetadata,
        Builtin::Query,
        Builtin::GenerateApi,
    ];

    fn method(&self) -> HttpMethod {
        match self {
            Builtin::ListTables | Builtin::TableMetadata => HttpMethod::Get,
            Builtin::Query | Builtin::GenerateApi => HttpMethod::Post,
        }
    }

    fn path(&self) -> &'static str {
        match self {
            Builtin::ListTables => "/tables",
            Builtin::TableMetadata => "/tables/:tableName",
            Builtin::Query => "/query",
            Builtin::GenerateApi => "/generate-api",
        }
    }

    fn key(&self) -> RouteKey {
        RouteKey::new(self.method(), self.path())
    }

    fn from_key(key: &RouteKey) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.key() == *key)
    }
}

/// The descriptor for `POST /generate-api`.
pub fn generate_api_endpoint() -> EndpointDescriptor {
    EndpointDescriptor::new(
        HttpMethod::Post,
        "/generate-api",
        "Generate API endpoints for database tables",
        "",
    )
    .with_parameter("tables", "Names of the tables to generate endpoints for (default: all)")
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RouteKey {
    method: HttpMethod,
    shape: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Segment {
    Literal(String),
    Param,
}

impl RouteKey {
    fn new(method: HttpMethod, path: &str) -> Self {
        let shape = split_path(path)
            .map(|seg| {
                if seg.starts_with(':') {
                    Segment::Param
                } else {
                    Segment::Literal(seg.to_string())
                }
            })
            .collect();
        Self { method, shape }
    }

    fn literal_count(&self) -> usize {
        self.shape
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    fn matches(&self, method: HttpMethod, segments: &[String]) -> bool {
        self.method == method
            && self.shape.len() == segments.len()
            && self.shape.iter().zip(segments).all(|(s, seg)| match s {
                Segment::Literal(lit) => lit == seg,
                Segment::Param => true,
            })
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Outcome of one `register` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistrationReport {
    pub added: usize,
    pub replaced: usize,
    pub skipped: usize,
}

/// A resolved request.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub descriptor: Arc<EndpointDescriptor>,
    /// Set when the route dispatches to a fixed handler.
    pub builtin: Option<Builtin>,
    /// Decoded values of the path's `:param` segments declared by the descriptor.
    pub path_params: QueryParams,
}

impl RouteMatch {
    /// Merge path, query-string and body parameters, earlier sources winning.
    ///
    /// Query-string values keep the first occurrence of a repeated key. Body
    /// fields are only read from a JSON object and keep their JSON types.
    pub fn parameters(&self, query: Option<&str>, body: Option<&JsonValue>) -> QueryParams {
        let mut params = self.path_params.clone();

        if let Some(query) = query {
            for (key, value) in form_urlencoded::parse(query.as_bytes()) {
                if !params.contains_key(key.as_ref()) {
                    params.insert(key.into_owned(), JsonValue::String(value.into_owned()));
                }
            }
        }

        if let Some(JsonValue::Object(fields)) = body {
            for (key, value) in fields {
                if !params.contains_key(key) {
                    params.insert(key.clone(), value.clone());
                }
            }
        }

        params
    }
}

/// Concurrent route table. Cloned descriptors are shared behind `Arc` and never mutated.
pub struct EndpointRegistry {
    routes: RwLock<BTreeMap<RouteKey, Arc<EndpointDescriptor>>>,
}

impl EndpointRegistry {
    /// A registry holding only the built-in routes.
    pub fn new() -> Self {
        let mut routes = BTreeMap::new();
        for descriptor in query_builder::metadata_endpoints()
            .into_iter()
            .chain(std::iter::once(generate_api_endpoint()))
        {
            routes.insert(
                RouteKey::new(descriptor.method, &descriptor.path),
                Arc::new(descriptor),
            );
        }
        Self {
            routes: RwLock::new(routes),
        }
    }

    /// Install `descriptors`, replacing any route with the same key.
    ///
    /// Sentinel descriptors are accepted only on a built-in key. Descriptors
    /// carrying SQL are skipped on a built-in key.
    pub async fn register(&self, descriptors: &[EndpointDescriptor]) -> RegistrationReport {
        let mut report = RegistrationReport::default();
        let mut routes = self.routes.write().await;

        for descriptor in descriptors {
            let key = RouteKey::new(descriptor.method, &descriptor.path);
            let reserved = Builtin::from_key(&key).is_some();

            if reserved != descriptor.is_builtin() {
                warn!(
                    method = %descriptor.method,
                    path = %descriptor.path,
                    "Skipping endpoint: conflicts with built-in routing"
                );
                report.skipped += 1;
                continue;
            }

            match routes.insert(key, Arc::new(descriptor.clone())) {
                Some(previous) => {
                    if !reserved && previous.query != descriptor.query {
                        info!(
                            method = %descriptor.method,
                            path = %descriptor.path,
                            previous = %previous.path,
                            "Replaced endpoint"
                        );
                    }
                    report.replaced += 1;
                }
                None => {
                    debug!(method = %descriptor.method, path = %descriptor.path, "Registered endpoint");
                    report.added += 1;
                }
            }
        }

        report
    }

    /// Find the route for a request path relative to the API prefix.
    ///
    /// Segments are percent-decoded before matching, so literal segments
    /// compare against raw table names. When several routes match, the one
    /// with the most literal segments wins.
    pub async fn resolve(&self, method: HttpMethod, path: &str) -> Option<RouteMatch> {
        let segments: Vec<String> = split_path(path).map(decode_segment).collect();
        let routes = self.routes.read().await;

        let (key, descriptor) = routes
            .iter()
            .filter(|(key, _)| key.matches(method, &segments))
            .max_by(|(a, _), (b, _)| {
                a.literal_count()
                    .cmp(&b.literal_count())
                    .then_with(|| b.cmp(a))
            })?;

        let mut path_params = QueryParams::new();
        for (template, value) in split_path(&descriptor.path).zip(&segments) {
            if let Some(name) = template.strip_prefix(':') {
                if descriptor.parameters.contains_key(name) {
                    path_params.insert(name.to_string(), JsonValue::String(value.clone()));
                }
            }
        }

        Some(RouteMatch {
            descriptor: Arc::clone(descriptor),
            builtin: Builtin::from_key(key),
            path_params,
        })
    }

    /// Snapshot of all routes, ordered by method and shape.
    pub async fn endpoints(&self) -> Vec<EndpointDescriptor> {
        self.routes
            .read()
            .await
            .values()
            .map(|d| d.as_ref().clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.routes.read().await.is_empty()
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Percent-decode one path segment. `+` is kept literally.
fn decode_segment(segment: &str) -> String {
    let escaped = segment
        .replace('+', "%2B")
        .replace('&', "%26")
        .replace('=', "%3D");
    form_urlencoded::parse(escaped.as_bytes())
        .next()
        .map(|(decoded, _)| decoded.into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn get_user(query: &str) -> EndpointDescriptor {
        EndpointDescriptor::new(HttpMethod::Get, "/users/:id", "Get user", query)
            .with_parameter("id", "ID")
    }

    #[tokio::test]
    async fn test_new_registry_has_builtins() {
        let registry = EndpointRegistry::new();
        assert_eq!(registry.len().await, 4);

        let route = registry.resolve(HttpMethod::Get, "/tables").await.unwrap();
        assert_eq!(route.builtin, Some(Builtin::ListTables));

        let route = registry
            .resolve(HttpMethod::Post, "/generate-api")
            .await
            .unwrap();
        assert_eq!(route.builtin, Some(Builtin::GenerateApi));
    }

    #[tokio::test]
    async fn test_builtin_table_metadata_binds_table_name() {
        let registry = EndpointRegistry::new();
        let route = registry
            .resolve(HttpMethod::Get, "/tables/users")
            .await
            .unwrap();
        assert_eq!(route.builtin, Some(Builtin::TableMetadata));
        assert_eq!(route.path_params.get("tableName"), Some(&json!("users")));
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = EndpointRegistry::new();
        let report = registry.register(&[get_user("SELECT 1")]).await;
        assert_eq!(report, RegistrationReport { added: 1, replaced: 0, skipped: 0 });

        let route = registry.resolve(HttpMethod::Get, "/users/42").await.unwrap();
        assert!(route.builtin.is_none());
        assert_eq!(route.path_params.get("id"), Some(&json!("42")));
        assert!(registry.resolve(HttpMethod::Delete, "/users/42").await.is_none());
        assert!(registry.resolve(HttpMethod::Get, "/users/42/x").await.is_none());
    }

    #[tokio::test]
    async fn test_replace_on_conflict() {
        let registry = EndpointRegistry::new();
        registry.register(&[get_user("SELECT 1")]).await;

        let renamed = EndpointDescriptor::new(HttpMethod::Get, "/users/:user_id", "Get", "SELECT 2")
            .with_parameter("user_id", "ID");
        let report = registry.register(&[renamed]).await;
        assert_eq!(report.replaced, 1);
        assert_eq!(registry.len().await, 5);

        let route = registry.resolve(HttpMethod::Get, "/users/7").await.unwrap();
        assert_eq!(route.descriptor.query, "SELECT 2");
        assert_eq!(route.path_params.get("user_id"), Some(&json!("7")));
        assert!(route.path_params.get("id").is_none());
    }

    #[tokio::test]
    async fn test_builtin_keys_are_reserved() {
        let registry = EndpointRegistry::new();
        let shadow = EndpointDescriptor::new(HttpMethod::Get, "/tables", "x", "SELECT 1");
        let stray_sentinel = EndpointDescriptor::new(HttpMethod::Get, "/stray", "x", "");
        let report = registry.register(&[shadow, stray_sentinel]).await;
        assert_eq!(report.skipped, 2);

        let route = registry.resolve(HttpMethod::Get, "/tables").await.unwrap();
        assert_eq!(route.builtin, Some(Builtin::ListTables));
        assert!(registry.resolve(HttpMethod::Get, "/stray").await.is_none());
    }

    #[tokio::test]
    async fn test_metadata_sentinels_alias_builtins() {
        let registry = EndpointRegistry::new();
        let report = registry.register(&query_builder::metadata_endpoints()).await;
        assert_eq!(report, RegistrationReport { added: 0, replaced: 3, skipped: 0 });
        assert_eq!(registry.len().await, 4);
    }

    #[tokio::test]
    async fn test_literal_segments_win() {
        let registry = EndpointRegistry::new();
        let tables = EndpointDescriptor::new(HttpMethod::Get, "/:table", "Any", "SELECT 1")
            .with_parameter("table", "t");
        registry.register(&[tables]).await;

        let route = registry.resolve(HttpMethod::Get, "/tables").await.unwrap();
        assert_eq!(route.builtin, Some(Builtin::ListTables));

        let route = registry.resolve(HttpMethod::Get, "/users").await.unwrap();
        assert_eq!(route.path_params.get("table"), Some(&json!("users")));
    }

    #[tokio::test]
    async fn test_parameter_precedence() {
        let registry = EndpointRegistry::new();
        registry.register(&[get_user("SELECT 1")]).await;
        let route = registry.resolve(HttpMethod::Get, "/users/1").await.unwrap();

        let body = json!({"id": 99, "active": true, "name": "body"});
        let params = route.parameters(Some("id=2&name=first&name=second"), Some(&body));

        assert_eq!(params.get("id"), Some(&json!("1")));
        assert_eq!(params.get("name"), Some(&json!("first")));
        assert_eq!(params.get("active"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_path_segments_are_decoded() {
        let registry = EndpointRegistry::new();
        registry.register(&[get_user("SELECT 1")]).await;
        let route = registry
            .resolve(HttpMethod::Get, "/users/a%20b+c")
            .await
            .unwrap();
        assert_eq!(route.path_params.get("id"), Some(&json!("a b+c")));
    }

    #[tokio::test]
    async fn test_encoded_literal_segments_match() {
        let registry = EndpointRegistry::new();
        let items = EndpointDescriptor::new(
            HttpMethod::Get,
            "/order items/:id",
            "Get order item",
            "SELECT 1",
        )
        .with_parameter("id", "ID");
        registry.register(&[items]).await;

        let route = registry
            .resolve(HttpMethod::Get, "/order%20items/5")
            .await
            .unwrap();
        assert_eq!(route.descriptor.path, "/order items/:id");
        assert_eq!(route.path_params.get("id"), Some(&json!("5")));
    }

    #[test]
    fn test_route_key_normalises_params() {
        assert_eq!(
            RouteKey::new(HttpMethod::Get, "/t/:id"),
            RouteKey::new(HttpMethod::Get, "t/:name/")
        );
        assert_ne!(
            RouteKey::new(HttpMethod::Get, "/t/:id"),
            RouteKey::new(HttpMethod::Put, "/t/:id")
        );
    }
}

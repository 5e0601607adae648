//! Endpoint descriptor models.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// HTTP methods a generated endpoint can bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    /// Parse a method name (case-insensitive). Unsupported methods yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generated endpoint: an HTTP method and path template paired with a
/// parameterized SQL template.
///
/// An empty `query` marks a built-in endpoint that is dispatched to a fixed
/// handler instead of generic query execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub method: HttpMethod,
    /// Relative to the API prefix; `:name` segments bind path parameters
    pub path: String,
    pub description: String,
    /// SQL with `:name` placeholders
    pub query: String,
    /// Parameter name to human description
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl EndpointDescriptor {
    /// Create a new descriptor with no documented parameters.
    pub fn new(
        method: HttpMethod,
        path: impl Into<String>,
        description: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            description: description.into(),
            query: query.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Document a parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), description.into());
        self
    }

    /// Replace the documented parameters.
    pub fn with_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    /// True for built-in endpoints (empty query template).
    pub fn is_builtin(&self) -> bool {
        self.query.is_empty()
    }
}

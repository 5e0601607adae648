//! Server and backend configuration models.
//!
//! These types are deserialized from the server's JSON configuration. Backend
//! settings are nested under the section named by `DatabaseConfig::db_type`.

use crate::config::{
    DEFAULT_API_PREFIX, DEFAULT_HTTP_HOST, DEFAULT_HTTP_PORT, DEFAULT_POSTGRES_SCHEMA,
    PoolOptions,
};
use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    /// Parse the configuration discriminator (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::PostgreSQL),
            "sqlite" => Some(Self::SQLite),
            _ => None,
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::PostgreSQL => Some(5432),
            Self::SQLite => None,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Backend selection plus backend-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Backend discriminator: "postgres" or "sqlite"
    #[serde(rename = "type")]
    pub db_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite: Option<SqliteConfig>,
    #[serde(default)]
    pub pool: PoolOptions,
    /// Run `COUNT(*)` per table when listing tables. Full scans; disable for large schemas.
    #[serde(default = "default_true")]
    pub count_rows: bool,
}

impl DatabaseConfig {
    /// Configuration for a PostgreSQL backend.
    pub fn postgres(config: PostgresConfig) -> Self {
        Self {
            db_type: "postgres".to_string(),
            postgres: Some(config),
            sqlite: None,
            pool: PoolOptions::default(),
            count_rows: true,
        }
    }

    /// Configuration for a SQLite backend.
    pub fn sqlite(config: SqliteConfig) -> Self {
        Self {
            db_type: "sqlite".to_string(),
            postgres: None,
            sqlite: Some(config),
            pool: PoolOptions::default(),
            count_rows: true,
        }
    }

    /// Set the pool options.
    pub fn with_pool(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }

    /// Enable or disable per-table row counts when listing.
    pub fn with_count_rows(mut self, count_rows: bool) -> Self {
        self.count_rows = count_rows;
        self
    }
}

fn default_true() -> bool {
    true
}

/// PostgreSQL connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub username: String,
    /// Contains sensitive data - never serialized
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    pub database: String,
    /// Default: "public"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// "password" (default) or "key_pair"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<String>,
    /// Inline PEM private key. Contains sensitive data - never serialized
    #[serde(default, skip_serializing)]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
    /// Inline PEM client certificate paired with the private key. Inline key
    /// material is never serialized; use the `_path` forms to persist it.
    #[serde(default, skip_serializing)]
    pub client_cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert_path: Option<String>,
    /// disable, allow, prefer, require, verify-ca, verify-full
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_mode: Option<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

impl PostgresConfig {
    /// Create a password-authenticated configuration.
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: None,
            username: username.into(),
            password: Some(password.into()),
            database: database.into(),
            schema: None,
            auth_type: None,
            private_key: None,
            private_key_path: None,
            client_cert: None,
            client_cert_path: None,
            ssl_mode: None,
        }
    }

    /// Port with the PostgreSQL default applied.
    pub fn port_or_default(&self) -> u16 {
        self.port
            .or(DatabaseType::PostgreSQL.default_port())
            .unwrap_or(5432)
    }

    /// Schema with the default applied.
    pub fn schema_or_default(&self) -> &str {
        self.schema
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_POSTGRES_SCHEMA)
    }
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("auth_type", &self.auth_type)
            .field("private_key", &self.private_key.as_ref().map(|_| "***"))
            .field("private_key_path", &self.private_key_path)
            .field("client_cert_path", &self.client_cert_path)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// SQLite database file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    pub path: String,
    /// Create the database file if it does not exist (default: false)
    #[serde(default)]
    pub create_if_missing: bool,
}

impl SqliteConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            create_if_missing: false,
        }
    }
}

/// Configuration for one gateway server instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub server_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,
    /// Serve the generated endpoints over HTTP
    #[serde(default)]
    pub enable_api: bool,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    /// Attach verbose descriptions to table metadata
    #[serde(default)]
    pub enable_llm: bool,
    /// Append the built-in metadata endpoints to generated output
    #[serde(default = "default_true")]
    pub include_metadata: bool,
    #[serde(default = "default_http_host")]
    pub http_host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_api_prefix() -> String {
    DEFAULT_API_PREFIX.to_string()
}

fn default_http_host() -> String {
    DEFAULT_HTTP_HOST.to_string()
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

impl ServerConfig {
    /// Create a configuration with defaults for everything but the name and database.
    pub fn new(name: impl Into<String>, database: DatabaseConfig) -> Self {
        Self {
            name: name.into(),
            server_type: "database".to_string(),
            database: Some(database),
            enable_api: false,
            api_prefix: default_api_prefix(),
            enable_llm: false,
            include_metadata: true,
            http_host: default_http_host(),
            http_port: default_http_port(),
        }
    }

    /// Parse a server configuration from JSON.
    pub fn from_json(data: &str) -> DbResult<Self> {
        serde_json::from_str(data).map_err(|e| {
            DbError::configuration(format!("failed to parse server configuration: {}", e))
        })
    }

    /// Serialize the configuration to JSON.
    ///
    /// The round trip is lossy: `password` and the inline `private_key` and
    /// `client_cert` PEMs are omitted, so a configuration relying on them must
    /// have them supplied again before `start()`. Key and certificate paths are kept.
    pub fn to_json(&self) -> DbResult<String> {
        serde_json::to_string(self).map_err(|e| {
            DbError::internal(format!("failed to serialize server configuration: {}", e))
        })
    }

    /// API prefix normalized to a leading slash and no trailing slash.
    /// An empty prefix falls back to the default.
    pub fn normalized_api_prefix(&self) -> String {
        let trimmed = self.api_prefix.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            if self.api_prefix.trim() == "/" {
                return String::new();
            }
            return DEFAULT_API_PREFIX.to_string();
        }
        if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        }
    }

    /// Get the HTTP bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

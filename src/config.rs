//! Configuration handling for the DB API gateway.
//!
//! This module provides configuration management via CLI arguments, environment
//! variables and a JSON server configuration file.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseConfig, ServerConfig, SqliteConfig};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8081;
pub const DEFAULT_API_PREFIX: &str = "/api/db";
pub const DEFAULT_POSTGRES_SCHEMA: &str = "public";
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 0;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MAX_LIFETIME_SECS: u64 = 3600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Connection pool limits for one connector.
///
/// sqlx bounds idle connections by time rather than count: idle connections
/// above `min_connections` are reaped after `idle_timeout_secs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10 for PostgreSQL, 1 for SQLite)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
    /// Minimum connections kept open (default: 0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
    /// Maximum connection lifetime in seconds (default: 3600)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_lifetime_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_timeout_secs: Option<u64>,
    /// Per-operation timeout in seconds (default: 30)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_timeout_secs: Option<u64>,
}

impl PoolOptions {
    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS))
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs.unwrap_or(DEFAULT_MAX_LIFETIME_SECS))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(
            self.acquire_timeout_secs
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs.unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS))
    }

    /// Validate pool options.
    pub fn validate(&self, is_sqlite: bool) -> DbResult<()> {
        let max = self.max_connections_or_default(is_sqlite);
        if max == 0 {
            return Err(DbError::configuration(
                "max_connections must be greater than 0",
            ));
        }
        let min = self.min_connections_or_default();
        if min > max {
            return Err(DbError::configuration(format!(
                "min_connections ({}) cannot exceed max_connections ({})",
                min, max
            )));
        }
        if self.query_timeout_secs == Some(0) {
            return Err(DbError::configuration(
                "query_timeout_secs must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Command-line configuration for the DB API gateway.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-api-gateway",
    about = "Generates and serves REST endpoints for the tables of a SQL database",
    version,
    author
)]
pub struct Config {
    /// JSON server configuration file
    #[arg(short, long, value_name = "FILE", env = "DBAPI_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database file to serve when no configuration file is given
    #[arg(long, value_name = "PATH", env = "DBAPI_SQLITE_PATH")]
    pub sqlite_path: Option<String>,

    /// HTTP host to bind to (overrides the configuration file)
    #[arg(long, env = "DBAPI_HTTP_HOST")]
    pub http_host: Option<String>,

    /// HTTP port to bind to (overrides the configuration file)
    #[arg(long, env = "DBAPI_HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Path prefix for every route (overrides the configuration file)
    #[arg(long, env = "DBAPI_API_PREFIX")]
    pub api_prefix: Option<String>,

    /// Serve the HTTP API even if the configuration file leaves it disabled
    #[arg(long, env = "DBAPI_ENABLE_API")]
    pub enable_api: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DBAPI_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DBAPI_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            config: None,
            sqlite_path: None,
            http_host: None,
            http_port: None,
            api_prefix: None,
            enable_api: false,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Build the server configuration from the file (if any) and CLI overrides.
    pub fn server_config(&self) -> DbResult<ServerConfig> {
        let mut server = match (&self.config, &self.sqlite_path) {
            (Some(path), _) => {
                let data = std::fs::read_to_string(path).map_err(|e| {
                    DbError::configuration(format!(
                        "failed to read configuration file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                ServerConfig::from_json(&data)?
            }
            (None, Some(sqlite_path)) => {
                let mut server = ServerConfig::new(
                    "default",
                    DatabaseConfig::sqlite(SqliteConfig::new(sqlite_path)),
                );
                server.enable_api = true;
                server
            }
            (None, None) => {
                return Err(DbError::configuration(
                    "either --config or --sqlite-path must be given",
                ));
            }
        };

        if let Some(host) = &self.http_host {
            server.http_host = host.clone();
        }
        if let Some(port) = self.http_port {
            server.http_port = port;
        }
        if let Some(prefix) = &self.api_prefix {
            server.api_prefix = prefix.clone();
        }
        if self.enable_api {
            server.enable_api = true;
        }
        Ok(server)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

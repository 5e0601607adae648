//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - The `Connector` capability contract and its backend implementations
//! - Named parameter rewriting and binding
//! - Row to JSON decoding
//! - Lifecycle cancellation
//! - Pluggable metadata enhancement

pub mod cancel;
pub mod enhance;
pub mod params;
pub mod postgres;
pub mod sqlite;
pub mod types;

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseConfig, DatabaseType, Row, Table, TableMetadata};
use async_trait::async_trait;
use std::sync::Arc;

pub use cancel::CancelToken;
pub use enhance::{MetadataEnhancer, TemplateEnhancer};
pub use params::{is_placeholder_name, QueryParams};
pub use postgres::PostgresConnector;
pub use sqlite::SqliteConnector;

/// Uniform access to one backing data store.
///
/// Every operation except `disconnect` takes the owning server's cancellation
/// token and fails with `DbError::Cancelled` once it fires. Implementations
/// must tolerate concurrent calls to the read and query operations.
#[async_trait]
pub trait Connector: Send + Sync {
    fn database_type(&self) -> DatabaseType;

    /// Open the connection pool. Called once per server start.
    async fn connect(&self, cancel: &CancelToken) -> DbResult<()>;

    /// Release pooled resources. A no-op when not connected.
    async fn disconnect(&self) -> DbResult<()>;

    /// Base tables ordered by name.
    async fn list_tables(&self, cancel: &CancelToken) -> DbResult<Vec<Table>>;

    async fn get_table_metadata(
        &self,
        cancel: &CancelToken,
        table: &str,
    ) -> DbResult<TableMetadata>;

    /// Execute `query`, binding `:name` placeholders from `params`.
    async fn execute_query(
        &self,
        cancel: &CancelToken,
        query: &str,
        params: &QueryParams,
    ) -> DbResult<Vec<Row>>;

    /// Set `metadata.verbose_description`.
    async fn enhance_metadata_with_llm(
        &self,
        cancel: &CancelToken,
        metadata: &mut TableMetadata,
    ) -> DbResult<()>;
}

/// Build the connector selected by `config.db_type`.
///
/// Fails with a configuration error, before any network activity, when the
/// configuration is absent, names an unknown backend, or lacks that backend's
/// settings section.
pub fn create_connector(config: Option<&DatabaseConfig>) -> DbResult<Arc<dyn Connector>> {
    create_connector_with_enhancer(config, Arc::new(TemplateEnhancer))
}

/// Like [`create_connector`], with a custom metadata enhancer.
pub fn create_connector_with_enhancer(
    config: Option<&DatabaseConfig>,
    enhancer: Arc<dyn MetadataEnhancer>,
) -> DbResult<Arc<dyn Connector>> {
    let config =
        config.ok_or_else(|| DbError::configuration("database configuration is required"))?;

    let db_type = DatabaseType::parse(&config.db_type).ok_or_else(|| {
        DbError::configuration(format!("unsupported database type: '{}'", config.db_type))
    })?;
    config.pool.validate(db_type == DatabaseType::SQLite)?;

    match db_type {
        DatabaseType::PostgreSQL => {
            let pg = config.postgres.clone().ok_or_else(|| {
                DbError::configuration("postgres configuration is required for type 'postgres'")
            })?;
            Ok(Arc::new(PostgresConnector::new(
                pg,
                config.pool.clone(),
                config.count_rows,
                enhancer,
            )))
        }
        DatabaseType::SQLite => {
            let sqlite = config.sqlite.clone().ok_or_else(|| {
                DbError::configuration("sqlite configuration is required for type 'sqlite'")
            })?;
            Ok(Arc::new(SqliteConnector::new(
                sqlite,
                config.pool.clone(),
                config.count_rows,
                enhancer,
            )))
        }
    }
}

/// Wrap an identifier in double quotes, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

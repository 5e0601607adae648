//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use db_api_gateway::config::PoolOptions;
use db_api_gateway::db::{
    CancelToken, Connector, QueryParams, SqliteConnector, TemplateEnhancer,
};
use db_api_gateway::error::{DbError, DbResult};
use db_api_gateway::models::{Column, DatabaseType, Row, SqliteConfig, Table, TableMetadata};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// In-memory connector with scripted metadata and call counters.
///
/// `execute_query` echoes the bound parameters back as a single row.
#[derive(Default)]
pub struct MockConnector {
    pub tables: Vec<TableMetadata>,
    pub failing_tables: HashSet<String>,
    pub fail_connect: bool,
    pub fail_disconnect: bool,
    pub fail_enhance: bool,
    pub fail_list: bool,
    /// Sleep inside `connect` before reporting success.
    pub connect_delay: Option<Duration>,
    /// Hold every query until the lifecycle token fires.
    pub block_queries: bool,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub executed: Mutex<Vec<(String, QueryParams)>>,
}

impl MockConnector {
    pub fn new(tables: Vec<TableMetadata>) -> Self {
        Self {
            tables,
            ..Default::default()
        }
    }

    pub fn with_failing_table(mut self, table: &str) -> Self {
        self.failing_tables.insert(table.to_string());
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn last_executed(&self) -> Option<(String, QueryParams)> {
        self.executed.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    async fn connect(&self, _cancel: &CancelToken) -> DbResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect {
            return Err(DbError::connection("connection refused", "Check the host"));
        }
        Ok(())
    }

    async fn disconnect(&self) -> DbResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_disconnect {
            return Err(DbError::internal("disconnect failed"));
        }
        Ok(())
    }

    async fn list_tables(&self, _cancel: &CancelToken) -> DbResult<Vec<Table>> {
        if self.fail_list {
            return Err(DbError::query("permission denied for schema public"));
        }
        Ok(self
            .tables
            .iter()
            .map(|t| Table::new(&t.name).with_row_count(t.row_count))
            .collect())
    }

    async fn get_table_metadata(
        &self,
        _cancel: &CancelToken,
        table: &str,
    ) -> DbResult<TableMetadata> {
        if self.failing_tables.contains(table) {
            return Err(DbError::metadata(table, "permission denied"));
        }
        self.tables
            .iter()
            .find(|t| t.name == table)
            .cloned()
            .ok_or_else(|| DbError::metadata(table, "table not found"))
    }

    async fn execute_query(
        &self,
        cancel: &CancelToken,
        query: &str,
        params: &QueryParams,
    ) -> DbResult<Vec<Row>> {
        self.executed
            .lock()
            .unwrap()
            .push((query.to_string(), params.clone()));

        if self.block_queries {
            return cancel
                .run("execute query", Duration::from_secs(60), async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Vec::new())
                })
                .await;
        }
        Ok(vec![params.clone()])
    }

    async fn enhance_metadata_with_llm(
        &self,
        _cancel: &CancelToken,
        metadata: &mut TableMetadata,
    ) -> DbResult<()> {
        if self.fail_enhance {
            return Err(DbError::internal("model unavailable"));
        }
        metadata.verbose_description = Some(TemplateEnhancer::render(metadata));
        Ok(())
    }
}

/// `users(id serial pk, email text)`.
pub fn users_table() -> TableMetadata {
    TableMetadata::new("users")
        .with_row_count(2)
        .with_column(Column::new("id", "serial").with_primary_key(true))
        .with_column(Column::new("email", "text"))
}

/// `logs(message text, created_at timestamp)` without a primary key.
pub fn logs_table() -> TableMetadata {
    TableMetadata::new("logs")
        .with_column(Column::new("message", "text"))
        .with_column(Column::new("created_at", "timestamp"))
}

/// A connected SQLite connector over a fresh database file.
pub async fn sqlite_fixture(
    count_rows: bool,
    statements: &[&str],
) -> (TempDir, Arc<SqliteConnector>) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");

    let mut config = SqliteConfig::new(path.to_str().unwrap());
    config.create_if_missing = true;

    let connector = Arc::new(SqliteConnector::new(
        config,
        PoolOptions::default(),
        count_rows,
        Arc::new(TemplateEnhancer),
    ));
    let cancel = CancelToken::new();
    connector.connect(&cancel).await.unwrap();

    for sql in statements {
        connector
            .execute_query(&cancel, sql, &QueryParams::new())
            .await
            .unwrap();
    }

    (dir, connector)
}

/// Build a parameter map from `(name, value)` pairs.
pub fn params(pairs: &[(&str, JsonValue)]) -> QueryParams {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

//! SQLite connector.
//!
//! Serves a single database file. Introspection reads `sqlite_master` and the
//! `pragma_*` table-valued functions, which accept bound table names.

use crate::config::PoolOptions;
use crate::db::enhance::{self, MetadataEnhancer};
use crate::db::params::{self, QueryParams};
use crate::db::types::RowToJson;
use crate::db::{CancelToken, Connector, quote_identifier};
use crate::error::{DbError, DbResult};
use crate::models::{
    Column, DatabaseType, MAX_SAMPLE_ROWS, Row as JsonRow, SqliteConfig, Table, TableMetadata,
};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

mod queries {
    pub const LIST_TABLES: &str = r#"
        SELECT name FROM sqlite_master
        WHERE type = 'table'
        AND name NOT LIKE 'sqlite_%'
        ORDER BY name
        "#;

    pub const TABLE_SQL: &str = r#"
        SELECT sql FROM sqlite_master
        WHERE type = 'table' AND name = ?
        "#;

    pub const TABLE_COLUMNS: &str = r#"
        SELECT name, type, pk FROM pragma_table_info(?)
        ORDER BY cid
        "#;

    pub const FOREIGN_KEYS: &str = r#"
        SELECT "from", "table", "to" FROM pragma_foreign_key_list(?)
        "#;
}

pub struct SqliteConnector {
    config: SqliteConfig,
    pool_options: PoolOptions,
    count_rows: bool,
    enhancer: Arc<dyn MetadataEnhancer>,
    pool: RwLock<Option<SqlitePool>>,
}

impl SqliteConnector {
    pub fn new(
        config: SqliteConfig,
        pool_options: PoolOptions,
        count_rows: bool,
        enhancer: Arc<dyn MetadataEnhancer>,
    ) -> Self {
        Self {
            config,
            pool_options,
            count_rows,
            enhancer,
            pool: RwLock::new(None),
        }
    }

    async fn pool(&self) -> DbResult<SqlitePool> {
        self.pool.read().await.clone().ok_or(DbError::NotConnected)
    }

    async fn row_count(pool: &SqlitePool, table: &str) -> DbResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn fetch_columns(pool: &SqlitePool, table: &str) -> DbResult<Vec<Column>> {
        let create_sql = sqlx::query_scalar::<_, Option<String>>(queries::TABLE_SQL)
            .bind(table)
            .fetch_optional(pool)
            .await?
            .flatten();
        let Some(create_sql) = create_sql else {
            return Err(DbError::metadata(table, "table not found"));
        };
        let autoincrement = create_sql.to_uppercase().contains("AUTOINCREMENT");

        let rows = sqlx::query(queries::TABLE_COLUMNS)
            .bind(table)
            .fetch_all(pool)
            .await?;

        let mut columns: Vec<Column> = rows
            .iter()
            .map(|row| {
                let name: String = row.get("name");
                let declared: String = row.get("type");
                let pk: i64 = row.get("pk");
                let is_pk = pk > 0;

                let data_type = if is_pk && autoincrement && declared.eq_ignore_ascii_case("INTEGER")
                {
                    "INTEGER AUTOINCREMENT".to_string()
                } else {
                    declared
                };
                Column::new(name, data_type).with_primary_key(is_pk)
            })
            .collect();

        // Foreign keys are informational; a failure here does not fail the table.
        if let Ok(fks) = sqlx::query(queries::FOREIGN_KEYS)
            .bind(table)
            .fetch_all(pool)
            .await
        {
            for fk in &fks {
                let from: String = fk.get("from");
                let ref_table: String = fk.get("table");
                let ref_column: Option<String> = fk.try_get("to").ok().flatten();
                let reference = match ref_column {
                    Some(col) => format!("{}.{}", ref_table, col),
                    None => ref_table,
                };
                if let Some(col) = columns.iter_mut().find(|c| c.name == from) {
                    col.foreign_key = true;
                    col.references = Some(reference);
                }
            }
        }

        Ok(columns)
    }

    async fn fetch_sample(pool: &SqlitePool, table: &str) -> DbResult<Vec<JsonRow>> {
        let sql = format!(
            "SELECT * FROM {} LIMIT {}",
            quote_identifier(table),
            MAX_SAMPLE_ROWS
        );
        let rows = sqlx::query(&sql).fetch_all(pool).await?;
        Ok(rows.iter().map(|r| r.to_json_map()).collect())
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn connect(&self, cancel: &CancelToken) -> DbResult<()> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            debug!(path = %self.config.path, "SQLite connector already connected");
            return Ok(());
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.config.path)
            .create_if_missing(self.config.create_if_missing)
            .foreign_keys(true);

        let pool_opts = &self.pool_options;
        let pool = cancel
            .run("connect", pool_opts.acquire_timeout(), async {
                SqlitePoolOptions::new()
                    .min_connections(pool_opts.min_connections_or_default())
                    .max_connections(pool_opts.max_connections_or_default(true))
                    .acquire_timeout(pool_opts.acquire_timeout())
                    .idle_timeout(Some(pool_opts.idle_timeout()))
                    .max_lifetime(Some(pool_opts.max_lifetime()))
                    .connect_with(options)
                    .await
                    .map_err(|e| {
                        DbError::connection(
                            format!("Failed to open SQLite database: {}", e),
                            "Verify the file path exists and is accessible, \
                             or set create_if_missing",
                        )
                    })
            })
            .await?;

        info!(path = %self.config.path, "Connected to SQLite database");
        *guard = Some(pool);
        Ok(())
    }

    async fn disconnect(&self) -> DbResult<()> {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
            info!(path = %self.config.path, "Closed SQLite database");
        }
        Ok(())
    }

    async fn list_tables(&self, cancel: &CancelToken) -> DbResult<Vec<Table>> {
        let pool = self.pool().await?;
        cancel
            .run("list tables", self.pool_options.query_timeout(), async {
                let names: Vec<String> = sqlx::query_scalar(queries::LIST_TABLES)
                    .fetch_all(&pool)
                    .await?;

                let mut tables = Vec::with_capacity(names.len());
                for name in names {
                    let mut table = Table::new(&name);
                    if self.count_rows {
                        table = table.with_row_count(Self::row_count(&pool, &name).await?);
                    }
                    tables.push(table);
                }

                debug!(count = tables.len(), "Listed SQLite tables");
                Ok(tables)
            })
            .await
    }

    async fn get_table_metadata(
        &self,
        cancel: &CancelToken,
        table: &str,
    ) -> DbResult<TableMetadata> {
        let pool = self.pool().await?;
        cancel
            .run("get table metadata", self.pool_options.query_timeout(), async {
                let columns = Self::fetch_columns(&pool, table).await?;
                let row_count = Self::row_count(&pool, table).await?;
                let sample = Self::fetch_sample(&pool, table).await?;

                let mut metadata = TableMetadata::new(table).with_row_count(row_count);
                for column in columns {
                    metadata = metadata.with_column(column);
                }
                Ok(metadata.with_sample_data(sample))
            })
            .await
            .map_err(|e| e.into_metadata(table))
    }

    async fn execute_query(
        &self,
        cancel: &CancelToken,
        query: &str,
        params: &QueryParams,
    ) -> DbResult<Vec<JsonRow>> {
        let bound = params::rewrite_question(query, params)?;
        let pool = self.pool().await?;

        cancel
            .run("execute query", self.pool_options.query_timeout(), async {
                let mut q = sqlx::query(&bound.sql);
                for param in &bound.params {
                    q = params::bind_sqlite_param(q, param);
                }
                // Decode while streaming so raw rows are not buffered.
                let rows: Vec<JsonRow> = q
                    .fetch(&pool)
                    .map_ok(|r| r.to_json_map())
                    .try_collect()
                    .await?;
                debug!(rows = rows.len(), "Executed SQLite query");
                Ok(rows)
            })
            .await
    }

    async fn enhance_metadata_with_llm(
        &self,
        cancel: &CancelToken,
        metadata: &mut TableMetadata,
    ) -> DbResult<()> {
        enhance::enhance_metadata(
            self.enhancer.as_ref(),
            cancel,
            self.pool_options.query_timeout(),
            metadata,
        )
        .await
    }
}

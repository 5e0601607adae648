//! PostgreSQL connector.
//!
//! # Architecture
//!
//! Introspection SQL lives in the `queries` submodule. Generated query templates
//! use unqualified table names, so the configured schema is installed as the
//! connection `search_path`; internal queries qualify names explicitly.
//!
//! PostgreSQL does not coerce text parameters, while path and query-string
//! values always arrive as strings. When a statement has textual binds, the
//! server is asked for the inferred parameter types and each textual bind whose
//! target is not a text type is wrapped in `CAST($n AS <type>)`.

use crate::auth::{self, Credentials};
use crate::config::PoolOptions;
use crate::db::enhance::{self, MetadataEnhancer};
use crate::db::params::{self, BoundQuery, QueryParam, QueryParams};
use crate::db::types::RowToJson;
use crate::db::{CancelToken, Connector, quote_identifier};
use crate::error::{DbError, DbResult};
use crate::models::{
    Column, DatabaseType, MAX_SAMPLE_ROWS, PostgresConfig, Row as JsonRow, Table, TableMetadata,
};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{Either, Executor, PgPool, Row, Statement, TypeInfo};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

mod queries {
    pub const LIST_TABLES: &str = r#"
        SELECT table_name::text AS table_name
        FROM information_schema.tables
        WHERE table_schema = $1
        AND table_type = 'BASE TABLE'
        ORDER BY table_name
        "#;

    /// Columns in declaration order. Sequence-backed columns are reported as
    /// serial types and identity columns carry an `identity` suffix, so the
    /// declared type reflects server-generated keys.
    pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            c.column_name::text AS column_name,
            CASE
                WHEN c.column_default LIKE 'nextval(%' THEN
                    CASE c.data_type
                        WHEN 'bigint' THEN 'bigserial'
                        WHEN 'smallint' THEN 'smallserial'
                        ELSE 'serial'
                    END
                WHEN c.is_identity = 'YES' THEN
                    format_type(a.atttypid, a.atttypmod) || ' identity'
                ELSE format_type(a.atttypid, a.atttypmod)
            END AS column_type,
            (pk.column_name IS NOT NULL) AS is_primary_key,
            col_description(t.oid, a.attnum) AS column_comment
        FROM information_schema.columns c
        JOIN pg_class t ON t.relname = c.table_name
        JOIN pg_namespace n ON n.oid = t.relnamespace AND n.nspname = c.table_schema
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attname = c.column_name
        LEFT JOIN (
            SELECT kcu.column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
                AND tc.table_name = kcu.table_name
            WHERE tc.table_name = $1
            AND tc.table_schema = $2
            AND tc.constraint_type = 'PRIMARY KEY'
        ) pk ON c.column_name = pk.column_name
        WHERE c.table_name = $1 AND c.table_schema = $2
        ORDER BY c.ordinal_position
        "#;

    pub const TABLE_COMMENT: &str = r#"
        SELECT obj_description(format('%I.%I', $2::text, $1::text)::regclass, 'pg_class')
        "#;

    pub const DESCRIBE_FOREIGN_KEYS: &str = r#"
        SELECT
            kcu.column_name::text AS column_name,
            ccu.table_name::text AS foreign_table_name,
            ccu.column_name::text AS foreign_column_name
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
        JOIN information_schema.constraint_column_usage ccu
            ON ccu.constraint_name = tc.constraint_name
            AND ccu.table_schema = tc.table_schema
        WHERE tc.table_name = $1
        AND tc.table_schema = $2
        AND tc.constraint_type = 'FOREIGN KEY'
        "#;
}

pub struct PostgresConnector {
    config: PostgresConfig,
    pool_options: PoolOptions,
    count_rows: bool,
    enhancer: Arc<dyn MetadataEnhancer>,
    pool: RwLock<Option<PgPool>>,
}

impl PostgresConnector {
    pub fn new(
        config: PostgresConfig,
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

    /// Build connect options, resolving credentials. No network activity.
    pub fn connect_options(&self) -> DbResult<PgConnectOptions> {
        let config = &self.config;
        let credentials = auth::resolve_postgres_credentials(config)?;
        let ssl_mode = config
            .ssl_mode
            .as_deref()
            .map(|mode| {
                PgSslMode::from_str(mode).map_err(|_| {
                    DbError::configuration(format!("unsupported ssl_mode '{}'", mode))
                })
            })
            .transpose()?;

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port_or_default())
            .username(&config.username)
            .database(&config.database)
            .application_name(env!("CARGO_PKG_NAME"))
            .options([("search_path", config.schema_or_default())]);

        match credentials {
            Credentials::Password(password) => Ok(options
                .password(&password)
                .ssl_mode(ssl_mode.unwrap_or(PgSslMode::Prefer))),
            Credentials::KeyPair {
                private_key,
                client_cert,
            } => {
                let mode = ssl_mode.unwrap_or(PgSslMode::Require);
                if matches!(
                    mode,
                    PgSslMode::Disable | PgSslMode::Allow | PgSslMode::Prefer
                ) {
                    return Err(DbError::configuration(
                        "key_pair authentication requires ssl_mode require, verify-ca or verify-full",
                    ));
                }
                Ok(options
                    .ssl_mode(mode)
                    .ssl_client_key_from_pem(private_key.as_bytes())
                    .ssl_client_cert_from_pem(client_cert.as_bytes()))
            }
        }
    }

    async fn pool(&self) -> DbResult<PgPool> {
        self.pool.read().await.clone().ok_or(DbError::NotConnected)
    }

    fn schema(&self) -> &str {
        self.config.schema_or_default()
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_identifier(self.schema()), quote_identifier(table))
    }

    async fn row_count(&self, pool: &PgPool, table: &str) -> DbResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.qualified(table));
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn fetch_columns(&self, pool: &PgPool, table: &str) -> DbResult<Vec<Column>> {
        let rows = sqlx::query(queries::DESCRIBE_COLUMNS)
            .bind(table)
            .bind(self.schema())
            .fetch_all(pool)
            .await?;

        if rows.is_empty() {
            return Err(DbError::metadata(table, "table not found"));
        }

        let mut columns: Vec<Column> = rows
            .iter()
            .map(|row| {
                let name: String = row.get("column_name");
                let data_type: String = row.get("column_type");
                let is_pk: bool = row.get("is_primary_key");
                let comment: Option<String> = row.try_get("column_comment").ok().flatten();
                Column::new(name, data_type)
                    .with_primary_key(is_pk)
                    .with_description(comment.unwrap_or_default())
            })
            .collect();

        match sqlx::query(queries::DESCRIBE_FOREIGN_KEYS)
            .bind(table)
            .bind(self.schema())
            .fetch_all(pool)
            .await
        {
            Ok(fks) => {
                for fk in &fks {
                    let from: String = fk.get("column_name");
                    let ref_table: String = fk.get("foreign_table_name");
                    let ref_column: String = fk.get("foreign_column_name");
                    if let Some(col) = columns.iter_mut().find(|c| c.name == from) {
                        col.foreign_key = true;
                        col.references = Some(format!("{}.{}", ref_table, ref_column));
                    }
                }
            }
            Err(e) => warn!(table, error = %e, "Failed to fetch foreign keys"),
        }

        Ok(columns)
    }

    async fn fetch_comment(&self, pool: &PgPool, table: &str) -> String {
        match sqlx::query_scalar::<_, Option<String>>(queries::TABLE_COMMENT)
            .bind(table)
            .bind(self.schema())
            .fetch_one(pool)
            .await
        {
            Ok(comment) => comment.unwrap_or_default(),
            Err(e) => {
                debug!(table, error = %e, "Failed to fetch table comment");
                String::new()
            }
        }
    }

    async fn fetch_sample(&self, pool: &PgPool, table: &str) -> DbResult<Vec<JsonRow>> {
        let sql = format!(
            "SELECT * FROM {} LIMIT {}",
            self.qualified(table),
            MAX_SAMPLE_ROWS
        );
        let rows = sqlx::query(&sql).fetch_all(pool).await?;
        Ok(rows.iter().map(|r| r.to_json_map()).collect())
    }
}

/// Types a text bind can be compared with or assigned to without a cast.
fn is_text_type(type_name: &str) -> bool {
    matches!(
        type_name.to_ascii_uppercase().as_str(),
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "UNKNOWN" | "CITEXT"
    )
}

/// Re-render textual binds as casts to the server-inferred parameter types.
async fn cast_textual_binds(
    pool: &PgPool,
    template: &str,
    params: &QueryParams,
    bound: BoundQuery,
) -> DbResult<BoundQuery> {
    if !bound.params.iter().any(QueryParam::is_textual) {
        return Ok(bound);
    }

    let statement = pool.prepare(&bound.sql).await?;
    let inferred: Vec<String> = match statement.parameters() {
        Some(Either::Left(types)) => types.iter().map(|t| t.name().to_string()).collect(),
        _ => return Ok(bound),
    };

    params::rewrite_named(template, params, |n, param| match inferred.get(n - 1) {
        Some(ty) if param.is_textual() && !is_text_type(ty) => format!("CAST(${} AS {})", n, ty),
        _ => format!("${}", n),
    })
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return "Check that the PostgreSQL server is running and accessible".to_string();
    }
    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the username and credentials".to_string();
    }
    if error_str.contains("does not exist") {
        return "Check that the database name exists".to_string();
    }
    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check the TLS configuration; key_pair authentication needs a TLS-enabled build"
            .to_string();
    }
    "Verify host, port, database and credentials".to_string()
}

#[async_trait]
impl Connector for PostgresConnector {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    async fn connect(&self, cancel: &CancelToken) -> DbResult<()> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            debug!(host = %self.config.host, "PostgreSQL connector already connected");
            return Ok(());
        }

        let options = self.connect_options()?;
        let pool_opts = &self.pool_options;
        let pool = cancel
            .run("connect", pool_opts.acquire_timeout(), async {
                PgPoolOptions::new()
                    .min_connections(pool_opts.min_connections_or_default())
                    .max_connections(pool_opts.max_connections_or_default(false))
                    .acquire_timeout(pool_opts.acquire_timeout())
                    .idle_timeout(Some(pool_opts.idle_timeout()))
                    .max_lifetime(Some(pool_opts.max_lifetime()))
                    .connect_with(options)
                    .await
                    .map_err(|e| {
                        DbError::connection(
                            format!("Failed to connect: {}", e),
                            connection_suggestion(&e),
                        )
                    })
            })
            .await?;

        info!(
            host = %self.config.host,
            database = %self.config.database,
            schema = %self.schema(),
            "Connected to PostgreSQL"
        );
        *guard = Some(pool);
        Ok(())
    }

    async fn disconnect(&self) -> DbResult<()> {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
            info!(host = %self.config.host, "Closed PostgreSQL pool");
        }
        Ok(())
    }

    async fn list_tables(&self, cancel: &CancelToken) -> DbResult<Vec<Table>> {
        let pool = self.pool().await?;
        cancel
            .run("list tables", self.pool_options.query_timeout(), async {
                let names: Vec<String> = sqlx::query_scalar(queries::LIST_TABLES)
                    .bind(self.schema())
                    .fetch_all(&pool)
                    .await?;

                let mut tables = Vec::with_capacity(names.len());
                for name in names {
                    let mut table = Table::new(&name);
                    if self.count_rows {
                        table = table.with_row_count(self.row_count(&pool, &name).await?);
                    }
                    tables.push(table);
                }

                debug!(count = tables.len(), schema = %self.schema(), "Listed PostgreSQL tables");
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
                let columns = self.fetch_columns(&pool, table).await?;
                let row_count = self.row_count(&pool, table).await?;
                let sample = self.fetch_sample(&pool, table).await?;
                let comment = self.fetch_comment(&pool, table).await;

                let mut metadata = TableMetadata::new(table)
                    .with_row_count(row_count)
                    .with_description(comment);
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
        let bound = params::rewrite_dollar(query, params)?;
        let pool = self.pool().await?;

        cancel
            .run("execute query", self.pool_options.query_timeout(), async {
                let bound = cast_textual_binds(&pool, query, params, bound).await?;
                let mut q = sqlx::query(&bound.sql);
                for param in &bound.params {
                    q = params::bind_postgres_param(q, param);
                }
                // Decode while streaming so raw rows are not buffered.
                let rows: Vec<JsonRow> = q
                    .fetch(&pool)
                    .map_ok(|r| r.to_json_map())
                    .try_collect()
                    .await?;
                debug!(rows = rows.len(), "Executed PostgreSQL query");
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

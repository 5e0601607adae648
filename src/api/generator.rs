//! Endpoint generation across a set of tables.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::query_builder;
use crate::config::DEFAULT_API_PREFIX;
use crate::db::enhance::try_enhance;
use crate::db::{CancelToken, Connector};
use crate::error::DbResult;
use crate::models::{EndpointDescriptor, ServerConfig};

/// Generator options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Attach a verbose description to each table before generating.
    pub enable_llm: bool,
    /// Prefix the generated paths are served under. Descriptor paths stay relative.
    pub api_prefix: String,
    /// Append the fixed `/tables`, `/tables/:tableName` and `/query` descriptors.
    pub include_metadata: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            enable_llm: false,
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            include_metadata: true,
        }
    }
}

impl GeneratorConfig {
    pub fn with_enable_llm(mut self, enable_llm: bool) -> Self {
        self.enable_llm = enable_llm;
        self
    }

    pub fn with_include_metadata(mut self, include_metadata: bool) -> Self {
        self.include_metadata = include_metadata;
        self
    }

    pub fn with_api_prefix(mut self, api_prefix: impl Into<String>) -> Self {
        self.api_prefix = api_prefix.into();
        self
    }
}

impl From<&ServerConfig> for GeneratorConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            enable_llm: config.enable_llm,
            api_prefix: config.normalized_api_prefix(),
            include_metadata: config.include_metadata,
        }
    }
}

/// Turns table metadata fetched through a connector into endpoint descriptors.
pub struct ApiGenerator {
    connector: Arc<dyn Connector>,
    config: GeneratorConfig,
}

impl ApiGenerator {
    pub fn new(connector: Arc<dyn Connector>, config: GeneratorConfig) -> Self {
        Self { connector, config }
    }

    /// Generate descriptors for `tables`, or for every table when empty.
    ///
    /// A table whose metadata cannot be fetched is logged and skipped. Only a
    /// failure to list tables fails the whole call.
    pub async fn generate(
        &self,
        cancel: &CancelToken,
        tables: &[String],
    ) -> DbResult<Vec<EndpointDescriptor>> {
        let names: Vec<String> = if tables.is_empty() {
            self.connector
                .list_tables(cancel)
                .await?
                .into_iter()
                .map(|t| t.name)
                .collect()
        } else {
            tables.to_vec()
        };

        let mut endpoints = Vec::new();
        let mut generated_tables = 0usize;

        for name in &names {
            let mut metadata = match self.connector.get_table_metadata(cancel, name).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(table = %name, error = %e, "Skipping table: metadata fetch failed");
                    continue;
                }
            };

            if self.config.enable_llm {
                try_enhance(self.connector.as_ref(), cancel, &mut metadata).await;
            }

            if metadata.columns.iter().filter(|c| c.primary_key).count() > 1 {
                debug!(
                    table = %name,
                    "Composite primary key; using the first key column as identifier"
                );
            }

            endpoints.extend(query_builder::table_endpoints(&metadata));
            generated_tables += 1;
        }

        if self.config.include_metadata {
            endpoints.extend(query_builder::metadata_endpoints());
        }

        info!(
            requested = names.len(),
            generated = generated_tables,
            endpoints = endpoints.len(),
            "API endpoints generated"
        );

        Ok(endpoints)
    }
}

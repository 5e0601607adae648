//! Verbose table descriptions.
//!
//! `MetadataEnhancer` is the plug-in point for a language-model backed
//! describer. The default `TemplateEnhancer` is deterministic and offline.

use crate::db::CancelToken;
use crate::error::DbResult;
use crate::models::TableMetadata;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// Produces a verbose, human-readable description of a table.
#[async_trait]
pub trait MetadataEnhancer: Send + Sync {
    async fn describe(&self, metadata: &TableMetadata) -> DbResult<String>;
}

/// Summarises the table name, shape and columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateEnhancer;

impl TemplateEnhancer {
    pub fn render(metadata: &TableMetadata) -> String {
        let columns = metadata
            .columns
            .iter()
            .map(|col| {
                if col.primary_key {
                    format!("{} ({}) [Primary Key]", col.name, col.data_type)
                } else {
                    format!("{} ({})", col.name, col.data_type)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "Table {} contains {} columns and {} rows. Columns include: {}",
            metadata.name,
            metadata.columns.len(),
            metadata.row_count,
            columns
        )
    }
}

#[async_trait]
impl MetadataEnhancer for TemplateEnhancer {
    async fn describe(&self, metadata: &TableMetadata) -> DbResult<String> {
        Ok(Self::render(metadata))
    }
}

/// Run `enhancer` and store its output on `metadata`.
pub async fn enhance_metadata(
    enhancer: &dyn MetadataEnhancer,
    cancel: &CancelToken,
    limit: Duration,
    metadata: &mut TableMetadata,
) -> DbResult<()> {
    let description = cancel
        .run("enhance metadata", limit, enhancer.describe(metadata))
        .await?;
    metadata.verbose_description = Some(description);
    Ok(())
}

/// Best-effort enhancement: failures are logged and leave the description unset.
pub async fn try_enhance(
    connector: &dyn crate::db::Connector,
    cancel: &CancelToken,
    metadata: &mut TableMetadata,
) {
    if let Err(e) = connector.enhance_metadata_with_llm(cancel, metadata).await {
        warn!(table = %metadata.name, error = %e, "Metadata enhancement failed");
        metadata.verbose_description = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::models::Column;

    fn users() -> TableMetadata {
        TableMetadata::new("users")
            .with_column(Column::new("id", "serial").with_primary_key(true))
            .with_column(Column::new("email", "text"))
            .with_row_count(42)
    }

    #[test]
    fn test_template_render() {
        assert_eq!(
            TemplateEnhancer::render(&users()),
            "Table users contains 2 columns and 42 rows. \
             Columns include: id (serial) [Primary Key], email (text)"
        );
    }

    #[tokio::test]
    async fn test_enhance_sets_description() {
        let mut metadata = users();
        enhance_metadata(
            &TemplateEnhancer,
            &CancelToken::new(),
            Duration::from_secs(1),
            &mut metadata,
        )
        .await
        .unwrap();
        assert!(
            metadata
                .verbose_description
                .unwrap()
                .starts_with("Table users contains 2 columns")
        );
    }

    struct Failing;

    #[async_trait]
    impl MetadataEnhancer for Failing {
        async fn describe(&self, _metadata: &TableMetadata) -> DbResult<String> {
            Err(DbError::internal("model unavailable"))
        }
    }

    #[tokio::test]
    async fn test_enhance_failure_leaves_description_unset() {
        let mut metadata = users();
        let result = enhance_metadata(
            &Failing,
            &CancelToken::new(),
            Duration::from_secs(1),
            &mut metadata,
        )
        .await;
        assert!(result.is_err());
        assert!(metadata.verbose_description.is_none());
    }
}

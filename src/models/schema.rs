//! Schema-related data models.
//!
//! This module defines the introspection results returned by connectors.
//! Every value is a snapshot of one call; nothing here is cached.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Maximum number of sample rows attached to table metadata.
pub const MAX_SAMPLE_ROWS: usize = 5;

/// One result row: column name to decoded value.
pub type Row = serde_json::Map<String, JsonValue>;

/// A base table and its live row count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    /// Absent when row counting is disabled for listing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
}

impl Table {
    /// Create a new table entry.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            row_count: None,
        }
    }

    /// Set the row count.
    pub fn with_row_count(mut self, row_count: u64) -> Self {
        self.row_count = Some(row_count);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Declared type as reported by the backend (e.g., `serial`, `varchar(30)`)
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub primary_key: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub foreign_key: bool,
    /// `table.column` the foreign key points at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<JsonValue>,
}

impl Column {
    /// Create a new column.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            description: String::new(),
            primary_key: false,
            foreign_key: false,
            references: None,
            sample: None,
        }
    }

    /// Set whether this is a primary key column.
    pub fn with_primary_key(mut self, is_pk: bool) -> Self {
        self.primary_key = is_pk;
        self
    }

    /// Set the stored column comment.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark the column as a foreign key to `references` (`table.column`).
    pub fn with_reference(mut self, references: impl Into<String>) -> Self {
        self.foreign_key = true;
        self.references = Some(references.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub columns: Vec<Column>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_data: Vec<Row>,
    pub row_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose_description: Option<String>,
}

impl TableMetadata {
    /// Create metadata for a table with no columns yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            columns: Vec::new(),
            sample_data: Vec::new(),
            row_count: 0,
            verbose_description: None,
        }
    }

    /// Add a column definition.
    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Set the row count.
    pub fn with_row_count(mut self, row_count: u64) -> Self {
        self.row_count = row_count;
        self
    }

    /// Set the stored table comment.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attach sample rows, keeping at most [`MAX_SAMPLE_ROWS`], and copy the
    /// first row's values onto the matching columns.
    pub fn with_sample_data(mut self, mut rows: Vec<Row>) -> Self {
        rows.truncate(MAX_SAMPLE_ROWS);
        if let Some(first) = rows.first() {
            for column in &mut self.columns {
                column.sample = first.get(&column.name).cloned();
            }
        }
        self.sample_data = rows;
        self
    }

    /// The column treated as the row identifier: the first primary-key column
    /// in declaration order. Additional key columns are ignored.
    pub fn primary_key(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.primary_key)
    }
}

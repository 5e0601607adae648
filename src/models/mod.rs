//! Data models for the DB API gateway.
//!
//! This module re-exports all model types used throughout the application.

pub mod config;
pub mod endpoint;
pub mod schema;

// Re-export commonly used types
pub use config::{DatabaseConfig, DatabaseType, PostgresConfig, ServerConfig, SqliteConfig};
pub use endpoint::{EndpointDescriptor, HttpMethod};
pub use schema::{Column, MAX_SAMPLE_ROWS, Row, Table, TableMetadata};

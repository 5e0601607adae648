//! DB API Gateway Library
//!
//! Generates REST endpoints from a database schema and serves them through a
//! runtime route registry. Supported backends: PostgreSQL and SQLite.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod server;
pub mod transport;

pub use api::{ApiGenerator, EndpointRegistry, GeneratorConfig};
pub use config::Config;
pub use db::{Connector, create_connector};
pub use error::{DbError, DbResult};
pub use server::DbApiServer;

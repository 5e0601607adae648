//! Endpoint generation and routing.
//!
//! - `query_builder`: pure SQL template synthesis from table metadata
//! - `generator`: runs the query builder across tables through a `Connector`
//! - `registry`: the live route table the HTTP transport dispatches through

pub mod generator;
pub mod query_builder;
pub mod registry;

pub use generator::{ApiGenerator, GeneratorConfig};
pub use registry::{Builtin, EndpointRegistry, RegistrationReport, RouteMatch};

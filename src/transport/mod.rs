//! Transport layer for the generated API.
//!
//! HTTP is the only transport: a single axum fallback handler that resolves
//! every request through the live `EndpointRegistry`.

pub mod http;

pub use http::{HttpState, HttpTransport, router};

use crate::error::DbResult;
use std::future::Future;

/// A serving task started by the lifecycle controller.
pub trait Transport: Send + Sync {
    /// Serve until the owning server's cancellation signal fires.
    fn run(&self) -> impl Future<Output = DbResult<()>> + Send;

    /// Get the name of this transport for logging.
    fn name(&self) -> &'static str;
}

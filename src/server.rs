//! Server lifecycle controller.
//!
//! A `DbApiServer` owns one connector, one route registry and one lifecycle
//! state. Start and stop are serialized by a single async mutex, so connect and
//! disconnect never overlap each other. Each start issues a fresh cancellation
//! token shared by every database call and by the HTTP serving task.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value as JsonValue, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::{EndpointRegistry, GeneratorConfig};
use crate::db::{CancelToken, Connector, create_connector};
use crate::error::DbResult;
use crate::models::ServerConfig;
use crate::transport::{HttpState, HttpTransport, Transport};

/// How long `stop` waits for the serving task to drain.
const SERVE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct Lifecycle {
    running: bool,
    cancel: CancelToken,
    serve_task: Option<JoinHandle<()>>,
}

/// A database-backed API server.
pub struct DbApiServer {
    config: ServerConfig,
    connector: Arc<dyn Connector>,
    registry: Arc<EndpointRegistry>,
    state: Mutex<Lifecycle>,
}

impl DbApiServer {
    /// Build a server and its connector from configuration.
    ///
    /// Fails with a configuration error when the database section is missing
    /// or invalid. No network activity happens here.
    pub fn new(config: ServerConfig) -> DbResult<Self> {
        let connector = create_connector(config.database.as_ref())?;
        Ok(Self::with_connector(config, connector))
    }

    /// Build a server around an existing connector.
    pub fn with_connector(config: ServerConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            registry: Arc::new(EndpointRegistry::new()),
            state: Mutex::new(Lifecycle {
                running: false,
                cancel: CancelToken::new(),
                serve_task: None,
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::clone(&self.connector)
    }

    /// The live route table served under the API prefix.
    pub fn registry(&self) -> Arc<EndpointRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn bind_addr(&self) -> String {
        self.config.bind_addr()
    }

    /// The current lifecycle token. Replaced on every start.
    pub async fn cancel_token(&self) -> CancelToken {
        self.state.lock().await.cancel.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    /// Connect and, when the API is enabled, start serving. No-op when running.
    ///
    /// A connection failure leaves the server stopped. A later bind failure of
    /// the serving task is only logged.
    pub async fn start(&self) -> DbResult<()> {
        let mut state = self.state.lock().await;
        if state.running {
            debug!(server = %self.config.name, "Server already running");
            return Ok(());
        }

        let cancel = CancelToken::new();
        info!(
            server = %self.config.name,
            database = %self.connector.database_type(),
            "Starting server"
        );

        if let Err(e) = self.connector.connect(&cancel).await {
            error!(server = %self.config.name, error = %e, "Failed to connect");
            return Err(e);
        }

        state.serve_task = if self.config.enable_api {
            Some(self.spawn_http(cancel.clone()))
        } else {
            None
        };
        state.cancel = cancel;
        state.running = true;

        info!(server = %self.config.name, api = self.config.enable_api, "Server started");
        Ok(())
    }

    fn spawn_http(&self, cancel: CancelToken) -> JoinHandle<()> {
        let http_state = Arc::new(HttpState::new(
            Arc::clone(&self.connector),
            Arc::clone(&self.registry),
            GeneratorConfig::from(&self.config),
            cancel,
        ));
        let transport = HttpTransport::new(http_state, self.config.bind_addr());
        let server = self.config.name.clone();

        tokio::spawn(async move {
            if let Err(e) = transport.run().await {
                error!(
                    server = %server,
                    transport = transport.name(),
                    error = %e,
                    "Serving task failed"
                );
            }
        })
    }

    /// Cancel in-flight work and disconnect. No-op when stopped.
    ///
    /// Disconnect failures are logged, never returned.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if !state.running {
            debug!(server = %self.config.name, "Server already stopped");
            return;
        }

        info!(server = %self.config.name, "Stopping server");
        state.cancel.cancel();

        if let Err(e) = self.connector.disconnect().await {
            warn!(server = %self.config.name, error = %e, "Disconnect failed");
        }

        if let Some(mut task) = state.serve_task.take() {
            if tokio::time::timeout(SERVE_SHUTDOWN_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                warn!(server = %self.config.name, "Serving task did not drain, aborting");
                task.abort();
            }
        }

        state.running = false;
        info!(server = %self.config.name, "Server stopped");
    }

    /// Summary of the server and its database settings.
    pub async fn server_info(&self) -> JsonValue {
        let running = self.is_running().await;
        json!({
            "name": self.config.name,
            "type": self.config.server_type,
            "is_running": running,
            "database": {
                "type": self.connector.database_type().to_string(),
                "enable_api": self.config.enable_api,
                "enable_llm": self.config.enable_llm,
            },
        })
    }
}

impl Drop for DbApiServer {
    fn drop(&mut self) {
        if let Ok(state) = self.state.try_lock() {
            state.cancel.cancel();
        }
    }
}

//! HTTP front end for sandboxed code execution
//!
//! Exposes the execution orchestrator over a small JSON API:
//! `POST /execute` runs code, `GET /health` reports whether the container
//! runtime and executor image are usable and `GET /` is a liveness probe.

pub mod error;
pub mod handlers;

pub use error::{Result, ServerError};

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Router};
use pybox_core::{ExecutionOrchestrator, RuntimeClient};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub enable_cors: bool,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    pub enable_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 16009)),
            enable_cors: true,
            max_body_size: 10 * 1024 * 1024, // 10MB, code plus ref file list
            enable_logging: true,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Parse and set the bind address from a string.
    pub fn with_bind_addr_str(mut self, addr: &str) -> Result<Self> {
        self.bind_addr = addr
            .parse()
            .map_err(|e| ServerError::config_error(format!("Invalid bind address '{}': {}", addr, e)))?;
        Ok(self)
    }

    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn with_logging(mut self, enable: bool) -> Self {
        self.enable_logging = enable;
        self
    }
}

/// Shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ExecutionOrchestrator>,
    pub runtime: Arc<dyn RuntimeClient>,
    /// Executor image reported by the health probe.
    pub image: String,
}

impl AppState {
    pub fn new(orchestrator: Arc<ExecutionOrchestrator>, runtime: Arc<dyn RuntimeClient>) -> Self {
        let image = orchestrator.image().to_string();
        Self {
            orchestrator,
            runtime,
            image,
        }
    }
}

pub struct SandboxServer {
    state: AppState,
    config: ServerConfig,
}

impl SandboxServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            config: ServerConfig::default(),
        }
    }

    pub fn with_config(state: AppState, config: ServerConfig) -> Self {
        Self { state, config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the Axum router with all routes and middleware.
    pub fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/", get(handlers::root_handler))
            .route("/health", get(handlers::health_handler))
            .route("/execute", post(handlers::execute_handler))
            .layer(DefaultBodyLimit::max(self.config.max_body_size))
            .with_state(self.state.clone());

        if self.config.enable_logging {
            router = router.layer(middleware::from_fn(
                |request: axum::http::Request<axum::body::Body>, next: axum::middleware::Next| async {
                    let request_id = uuid::Uuid::new_v4().to_string();
                    let method = request.method().clone();
                    let uri = request.uri().clone();

                    // Health probes are polled; keep them out of the info log.
                    let quiet = uri.path() == "/health";
                    if quiet {
                        log::debug!("Request {} {} {}", request_id, method, uri);
                    } else {
                        log::info!("Request {} {} {}", request_id, method, uri);
                    }

                    let start = std::time::Instant::now();
                    let response = next.run(request).await;
                    let duration = start.elapsed();

                    if quiet {
                        log::debug!(
                            "Response {} {} in {:?}",
                            request_id,
                            response.status(),
                            duration
                        );
                    } else {
                        log::info!(
                            "Response {} {} in {:?}",
                            request_id,
                            response.status(),
                            duration
                        );
                    }

                    response
                },
            ));
        }

        router = router.layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            router = router.layer(CorsLayer::permissive());
        }

        router
    }

    /// Start the server; returns once `shutdown_signal` resolves and in-flight requests finish.
    pub async fn serve_with_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| {
                ServerError::config_error(format!(
                    "Failed to bind to {}: {}",
                    self.config.bind_addr, e
                ))
            })?;

        log::info!("pybox server starting on {}", self.config.bind_addr);
        log::info!("Execute endpoint: http://{}/execute", self.config.bind_addr);
        log::info!("Health check: http://{}/health", self.config.bind_addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::internal(format!("Server error: {}", e)))?;

        log::info!("pybox server shut down gracefully");
        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }
}

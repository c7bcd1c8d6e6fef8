//! Coordinator HTTP server
//!
//! Serves the worker protocol for distributed mode on top of an in-process
//! [`Coordinator`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use thiserror::Error;
use tower_http::trace::TraceLayer;

use super::api::create_router;
use super::Coordinator;

// ============================================================================
// App State
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,

    /// Server start time
    pub start_time: Instant,
}

// ============================================================================
// Coordinator Server
// ============================================================================

pub struct CoordinatorServer {
    state: AppState,
    bind_address: SocketAddr,
    request_logging: bool,
}

impl CoordinatorServer {
    pub fn new(coordinator: Arc<Coordinator>) -> Result<Self, ServerError> {
        let config = coordinator.config();
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        Ok(Self {
            bind_address: config.bind_address,
            request_logging: config.enable_request_logging,
            state: AppState {
                coordinator,
                start_time: Instant::now(),
            },
        })
    }

    /// Override the configured bind address
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }

    pub fn build_router(&self) -> Router {
        let router = create_router(self.state.clone());

        if self.request_logging {
            router.layer(TraceLayer::new_for_http())
        } else {
            router
        }
    }

    /// Serve until `shutdown_signal` resolves
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.bind_address;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(addr, e))?;

        tracing::info!(%addr, "Coordinator listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(ServerError::Serve)?;

        tracing::info!("Coordinator server shutdown complete");
        Ok(())
    }
}

// ============================================================================
// Server Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to bind {0}: {1}")]
    Bind(SocketAddr, #[source] std::io::Error),

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

// ============================================================================
// Tests
// ============================================================================

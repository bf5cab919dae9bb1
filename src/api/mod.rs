//! Administrative HTTP API
//!
//! A single `/api` endpoint selects an operation through its `action`
//! parameter, supplied as a JSON `data` query parameter (GET/HEAD) or as a
//! JSON or form body (POST). Everything except `get_version` requires an
//! active bearer token.

pub mod auth;
pub mod error;
pub mod handler;

use std::sync::Arc;

use axum::routing::{any, get};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cluster::ClusterClient;
use crate::config::AdminConfig;
use crate::Error;

pub use auth::{OidcIntrospector, TokenIntrospector};
pub use error::ApiError;
pub use handler::Action;

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Cluster access for ConfigMap operations
    pub cluster: Arc<dyn ClusterClient>,
    /// Bearer token validation
    pub auth: Arc<dyn TokenIntrospector>,
}

/// Build the admin router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api", any(handler::api_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Serve the admin API until `stop` is cancelled
pub async fn serve(
    config: &AdminConfig,
    state: AppState,
    stop: CancellationToken,
) -> Result<(), Error> {
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .map_err(|e| {
            Error::internal_with_context("serve", format!("failed to bind {}: {}", config.addr, e))
        })?;

    info!(addr = %config.addr, "Starting admin API server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await
        .map_err(|e| Error::internal_with_context("serve", format!("server error: {}", e)))
}

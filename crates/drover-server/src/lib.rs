//! Workflow scheduler and HTTP API for drover agents.
//!
//! The [`Hub`] owns the queue, assignments with their leases, and the agent
//! registry. [`Server`] exposes it over axum as the agent protocol plus a
//! few admin routes; [`LocalPeer`] exposes it in-process.
//!
//! # Example
//!
//! ```ignore
//! use drover_server::{Server, ServerConfig};
//!
//! let config = ServerConfig::new(Some("secret-token".to_string()))
//!     .with_bind_address("127.0.0.1:9000".parse()?);
//!
//! Server::new(config).run().await?;
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod hub;
pub mod middleware;
pub mod peer;
pub mod routes;
pub mod state;

pub use auth::{AgentId, AuthError, auth_middleware};
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use hub::{Hub, SweepReport};
pub use middleware::request_logging_middleware;
pub use peer::LocalPeer;
pub use state::AppState;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// The drover HTTP server.
pub struct Server {
    /// Application state.
    state: AppState,
}

impl Server {
    /// Create a new server with a fresh hub.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            state: AppState::new(config),
        }
    }

    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.state.hub
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        Router::new()
            // Health routes (no auth required)
            .merge(routes::health_routes())
            .nest("/api/v1", self.api_routes())
            .layer(axum::middleware::from_fn_with_state(
                self.state.clone(),
                middleware::request_logging_middleware,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// API routes (v1).
    ///
    /// All API routes require authentication via the auth middleware.
    fn api_routes(&self) -> Router<AppState> {
        use axum::routing::{get, post};

        Router::new()
            .route("/version", get(routes::version_handler))
            // Agent registry
            .route(
                "/agents",
                post(routes::register_agent_handler).get(routes::list_agents_handler),
            )
            .route(
                "/agents/self",
                axum::routing::delete(routes::unregister_agent_handler),
            )
            .route("/agents/self/health", post(routes::health_report_handler))
            // Workflow protocol
            .route("/next", post(routes::next_handler))
            .route("/workflows/{id}/init", post(routes::init_handler))
            .route("/workflows/{id}/wait", get(routes::wait_handler))
            .route("/workflows/{id}/done", post(routes::done_handler))
            .route("/workflows/{id}/extend", post(routes::extend_handler))
            .route("/workflows/{id}/steps", post(routes::update_step_handler))
            .route("/logs", post(routes::logs_handler))
            // Admin
            .route("/queue", post(routes::submit_workflow_handler))
            .route("/workflows/{id}", get(routes::get_workflow_handler))
            .route(
                "/workflows/{id}/cancel",
                post(routes::cancel_workflow_handler),
            )
            .route("/workflows/{id}/logs", get(routes::workflow_logs_handler))
            .layer(axum::middleware::from_fn_with_state(
                self.state.clone(),
                auth::auth_middleware,
            ))
    }

    /// Run the server on the configured address until the process exits.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_address;
        self.run_on(addr).await
    }

    /// Run the server on a specific address (useful for testing).
    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to bind: {}", e)))?;
        self.serve(listener, CancellationToken::new()).await
    }

    /// Serve on `listener` until `shutdown` fires.
    ///
    /// The lease sweeper runs alongside and stops with the server.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Internal(format!("Failed to read local address: {}", e)))?;
        info!("Starting server on {}", addr);

        let sweeper_token = shutdown.child_token();
        let sweeper = tokio::spawn(
            self.state
                .hub
                .clone()
                .run_sweeper(self.state.config.sweep_interval, sweeper_token.clone()),
        );

        let router = self.router();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {}", e)));

        sweeper_token.cancel();
        let _ = sweeper.await;
        info!("Server stopped");
        result
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_server_health_endpoint_skips_auth() {
        let server = Server::new(ServerConfig::new(Some("test-token".to_string())));

        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_requires_token() {
        let server = Server::new(ServerConfig::new(Some("test-token".to_string())));

        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/version")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/version")
                    .header("Authorization", "Bearer test-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_server_config_builder() {
        let config = ServerConfig::new(Some("my-token".to_string()))
            .with_bind_address("0.0.0.0:9000".parse().unwrap())
            .with_request_logging(false);

        assert_eq!(config.auth_token, Some("my-token".to_string()));
        assert_eq!(config.bind_address.port(), 9000);
        assert!(!config.request_logging);
    }
}

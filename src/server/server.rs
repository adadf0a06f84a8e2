//! HTTP server with axum router and graceful shutdown.

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::error::ServerError;
use super::handlers::{
    get_damage, get_damage_names, get_events, get_feed, get_lines, get_match, get_matches,
    get_stats, get_status, post_close_match, post_ingest, post_ingest_line, post_ingest_replay,
    post_nicknames, post_upload,
};
use super::state::AppState;
use crate::config::ServerConfig;

/// HTTP front end of the recorder.
pub struct RecorderServer {
    config: ServerConfig,
    state: AppState,
}

impl RecorderServer {
    /// Create a server with default configuration.
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self {
            config: ServerConfig::default(),
            state,
        }
    }

    /// Set the server configuration (builder pattern).
    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn address(&self) -> String {
        self.config.address()
    }

    /// Build the axum router with all routes and middleware.
    pub fn build_router(&self) -> Router {
        let router = Router::new()
            .route("/api/ingest", post(post_ingest))
            .route("/api/ingest_line", post(post_ingest_line))
            .route("/api/upload", post(post_upload))
            .route("/api/ingest_replay", post(post_ingest_replay))
            .route("/api/matches", get(get_matches))
            .route("/api/matches/:id", get(get_match))
            .route("/api/matches/:id/close", post(post_close_match))
            .route("/api/matches/:id/nicknames", post(post_nicknames))
            .route("/api/matches/:id/lines", get(get_lines))
            .route("/api/matches/:id/events", get(get_events))
            .route("/api/status", get(get_status))
            .route("/api/stats", get(get_stats))
            .route("/api/damage", get(get_damage))
            .route("/api/damage/names", get(get_damage_names))
            .route("/api/feed", get(get_feed))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.config.cors_permissive {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Bind the configured address and serve until the state's cancel
    /// token fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or serve.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::BindError {
                address: addr.clone(),
                source,
            })?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns an error if serving fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let cancel = self.state.cancel.clone();
        let app = self.build_router();

        if let Ok(local) = listener.local_addr() {
            tracing::info!(address = %local, "Starting recorder server");
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                tracing::info!("Recorder server shutting down gracefully");
            })
            .await?;
        Ok(())
    }
}

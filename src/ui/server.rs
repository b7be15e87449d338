//! HTTP server

use axum::{
    routing::{get, post},
    Router,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;

use crate::audio::playback::AudioPlayback;
use crate::config::UiConfig;
use crate::error::{NetworkError, Result};
use crate::network::control::ControlChannel;
use crate::pipeline::Pipeline;
use crate::ui::handlers;

/// State shared by all handlers
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub control: Arc<ControlChannel>,
    pub playback: Mutex<AudioPlayback>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        pipeline: Arc<Pipeline>,
        control: Arc<ControlChannel>,
        playback: AudioPlayback,
    ) -> Self {
        Self {
            pipeline,
            control,
            playback: Mutex::new(playback),
            started_at: Instant::now(),
        }
    }
}

/// Status and control API
pub struct WebServer {
    config: UiConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: UiConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/status", get(handlers::get_status))
            .route("/api/stats", get(handlers::get_stats))
            .route("/api/features", get(handlers::get_features))
            .route("/api/devices", get(handlers::get_devices))
            .route("/api/recording/start", post(handlers::start_recording))
            .route("/api/recording/stop", post(handlers::stop_recording))
            .route("/api/playback/start", post(handlers::start_playback))
            .route("/api/playback/stop", post(handlers::stop_playback))
            .route("/api/session/reset", post(handlers::reset_session))
            .route("/api/control", post(handlers::send_control))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Serve until the task is dropped
    pub async fn serve(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.http_port)
            .parse()
            .map_err(|e| NetworkError::BindFailed(format!("invalid bind address: {}", e)))?;

        let router = self.router();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

        tracing::info!("HTTP API listening on http://{}", addr);

        axum::serve(listener, router).await?;

        Ok(())
    }

    /// Serve on a tokio task
    pub fn start_background(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.serve().await {
                tracing::error!("HTTP API failed: {}", e);
            }
        })
    }
}

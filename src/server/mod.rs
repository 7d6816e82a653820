//! HTTP surface for the debugging pipeline.
//!
//! | Route                          | Handler                          |
//! |--------------------------------|----------------------------------|
//! | `GET  /health`                 | liveness                         |
//! | `POST /api/debug`              | run to completion, return result |
//! | `POST /api/debug/stream`       | run and stream events (SSE)      |
//! | `GET  /api/runs/{id}`          | latest checkpoint                |
//! | `GET  /api/runs/{id}/events`   | attach to a run's events (SSE)   |
//! | `POST /api/runs/{id}/cancel`   | cancel a run                     |
//! | `POST /api/runs/{id}/resume`   | resume from the last checkpoint  |

pub mod api;
pub mod sse;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

pub use api::{ApiError, AppState, SharedState};

use crate::pipeline::Orchestrator;

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Permissive CORS for local front-end development.
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            dev_mode: false,
        }
    }
}

/// Build the full application router.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .route("/health", get(api::health))
        .with_state(state)
}

/// Serve until Ctrl+C. In-flight runs are cancelled when their requests drop.
pub async fn start_server(config: ServerConfig, orchestrator: Arc<Orchestrator>) -> Result<()> {
    let state = Arc::new(AppState { orchestrator });
    let mut app = build_router(state);

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(%local_addr, dev_mode = config.dev_mode, "server listening");
    println!("Mender running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler; shutting down");
    }
    println!("\nShutting down...");
}

//! AKO API server
//!
//! A small axum server on `AKO_API_PORT` exposing liveness and the sync
//! state. The rest of the process holds an [`ApiServerHandle`] and calls
//! [`ApiServerHandle::shutdown`] on fatal configuration errors, which is
//! the operator's signal (via pod restart) that intervention is needed.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::Notify;
use tracing::{error, info};

use crate::config;

/// Handle used to stop the API server (and with it, the pod).
#[derive(Clone)]
pub struct ApiServerHandle {
    shutdown: Arc<Notify>,
}

impl ApiServerHandle {
    /// Trigger a graceful shutdown of the API server.
    pub fn shutdown(&self) {
        info!("API server shutdown requested");
        self.shutdown.notify_waiters();
    }
}

async fn api_status(State(_state): State<()>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ALIVE",
        "syncDisabled": config::disable_sync(),
    }))
}

/// Start the API server on the given port.
///
/// Returns the shutdown handle; the server task runs until the handle
/// fires or the listener fails.
pub async fn start(port: u16) -> crate::Result<ApiServerHandle> {
    let shutdown = Arc::new(Notify::new());
    let handle = ApiServerHandle {
        shutdown: Arc::clone(&shutdown),
    };

    let app = Router::new()
        .route("/api/status", get(api_status))
        .route("/healthz", get(|| async { "OK" }))
        .with_state(());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| crate::Error::config(format!("cannot bind API server port {port}: {e}")))?;
    info!(port, "AKO API server listening");

    tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.notified().await;
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "API server error");
        }
        info!("API server stopped");
    });

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_starts_and_shuts_down() {
        // Port 0 = ephemeral; binding must succeed.
        let handle = start(0).await.unwrap();
        handle.shutdown();
    }
}

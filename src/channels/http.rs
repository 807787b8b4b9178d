//! HTTP webhook ingress for agent callbacks.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::engine::Engine;

/// Default route the agent posts its responses to.
pub const DEFAULT_CALLBACK_PATH: &str = "/webhook";

/// Maximum JSON body size for callback requests (2 MB).
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Receives agent deliveries and hands them to the engine.
pub struct WebhookIngress {
    engine: Arc<Engine>,
    callback_path: String,
}

impl WebhookIngress {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
        }
    }

    /// Set the callback route.
    pub fn with_callback_path(mut self, path: impl Into<String>) -> Self {
        self.callback_path = path.into();
        self
    }

    pub fn callback_path(&self) -> &str {
        &self.callback_path
    }

    /// The ingress routes with state applied.
    pub fn routes(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route(&self.callback_path, post(callback_handler))
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .with_state(Arc::clone(&self.engine))
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct CallbackResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn callback_handler(
    State(engine): State<Arc<Engine>>,
    body: Bytes,
) -> (StatusCode, Json<CallbackResponse>) {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(bytes = body.len(), "Rejecting malformed agent callback: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(CallbackResponse {
                    status: "error",
                    error: Some(format!("Invalid JSON: {}", e)),
                }),
            );
        }
    };

    tracing::debug!(bytes = body.len(), "Received agent callback");

    // Acknowledge now; a batch may run for a long time.
    tokio::spawn(async move {
        engine.route(payload).await;
    });

    (
        StatusCode::OK,
        Json(CallbackResponse {
            status: "received",
            error: None,
        }),
    )
}

//! API server implementation.
//!
//! Assembles the router, shared state, CORS, and tracing, and serves
//! until the shutdown signal fires.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::ToSchema;

use sluice_core::{Error as CoreError, Result};
use sluice_engine::EventBroadcaster;
use sluice_store::{EventStore, RuleStore};

use crate::config::{Config, CorsConfig};
use crate::error::{render_chain, ApiError};

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status (`ok` or `unavailable`).
    pub status: String,
    /// Server time.
    pub timestamp: DateTime<Utc>,
}

/// Readiness check response.
#[derive(Debug, Serialize, ToSchema)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ReadyResponse {
    /// Service readiness status.
    pub ready: bool,
    /// Optional message about readiness state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Event persistence.
    pub events: EventStore,
    /// Rule persistence.
    pub rules: RuleStore,
    /// Live-update fan-out, shared with the workers.
    pub broadcaster: EventBroadcaster,
    pool: PgPool,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("pool", &"<PgPool>")
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Creates application state over the shared pool.
    #[must_use]
    pub fn new(config: Config, pool: PgPool, broadcaster: EventBroadcaster) -> Self {
        Self {
            events: EventStore::new(pool.clone()),
            rules: RuleStore::new(pool.clone()),
            broadcaster,
            config,
            pool,
        }
    }

    /// Maps a core error to the HTTP envelope, attaching the rendered
    /// error chain in debug deployments only.
    #[must_use]
    pub fn api_error(&self, error: CoreError) -> ApiError {
        if self.config.debug {
            let stack = render_chain(&error);
            ApiError::from(error).with_stack(stack)
        } else {
            ApiError::from(error)
        }
    }
}

/// Health check endpoint handler.
///
/// Pings the store through the shared pool; pool exhaustion surfaces
/// here as 503 rather than as hung requests.
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match sluice_store::ping(&state.pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                timestamp: Utc::now(),
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable".to_string(),
                    timestamp: Utc::now(),
                }),
            )
        }
    }
}

/// Readiness check endpoint handler.
async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match sluice_store::ping(&state.pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                message: Some(format!("store check failed: {e}")),
            }),
        ),
    }
}

async fn openapi_json() -> impl IntoResponse {
    Json(crate::openapi::document())
}

/// Creates the router with all routes and middleware.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.config.cors);

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/openapi.json", get(openapi_json))
        .route("/ws", get(crate::ws::ws_handler))
        .merge(crate::routes::api_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the router until the shutdown token fires.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(router: Router, port: u16, shutdown: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| CoreError::internal(format!("failed to bind {addr}: {e}")))?;
    tracing::info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| CoreError::internal(format!("server error: {e}")))
}

/// Builds the CORS layer from configuration.
fn build_cors_layer(cors_config: &CorsConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(cors_config.max_age_seconds));

    apply_cors_allowed_origins(cors, cors_config)
}

fn apply_cors_allowed_origins(cors: CorsLayer, cors_config: &CorsConfig) -> CorsLayer {
    if cors_config.allowed_origins.is_empty() {
        return cors;
    }

    let allows_any = cors_config.allowed_origins.len() == 1
        && cors_config
            .allowed_origins
            .first()
            .is_some_and(|origin| origin == "*");
    if allows_any {
        return cors.allow_origin(Any);
    }

    if cors_config
        .allowed_origins
        .iter()
        .any(|origin| origin == "*")
    {
        tracing::error!(
            origins = ?cors_config.allowed_origins,
            "Invalid CORS config: '*' must be the only allowed origin"
        );
        return cors;
    }

    let mut allowed = Vec::new();
    for origin in &cors_config.allowed_origins {
        match HeaderValue::from_str(origin) {
            Ok(value) => allowed.push(value),
            Err(_) => {
                tracing::error!(origin = %origin, "Invalid CORS origin; skipping");
            }
        }
    }

    if allowed.is_empty() {
        tracing::warn!("All configured CORS origins were invalid; disabling CORS");
        cors
    } else {
        tracing::info!(origins = ?cors_config.allowed_origins, "CORS configured");
        cors.allow_origin(AllowOrigin::list(allowed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_disabled_for_empty_origin_list() {
        // Building the layer must not panic for any config shape.
        build_cors_layer(&CorsConfig::default());
        build_cors_layer(&CorsConfig {
            allowed_origins: vec!["*".to_string()],
            max_age_seconds: 60,
        });
        build_cors_layer(&CorsConfig {
            allowed_origins: vec!["http://localhost:5173".to_string()],
            max_age_seconds: 60,
        });
    }

    #[test]
    fn mixed_wildcard_origins_are_rejected() {
        build_cors_layer(&CorsConfig {
            allowed_origins: vec!["*".to_string(), "http://a.test".to_string()],
            max_age_seconds: 60,
        });
    }
}

//! HTTP route handlers.

pub mod events;
pub mod rules;

use std::sync::Arc;

use axum::Router;

use crate::server::AppState;

/// All API routes.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().merge(events::routes()).merge(rules::routes())
}

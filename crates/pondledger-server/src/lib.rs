// Library root for the HTTP API and the live WebSocket feed.

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use pondledger_app::AppServices;

pub mod api;
pub mod live;

/// Application state shared across HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<AppServices>,
}

impl AppState {
    pub fn new(services: Arc<AppServices>) -> Self {
        Self { services }
    }
}

/// Build the application router: every endpoint under `/api`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

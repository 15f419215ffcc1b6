use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::AppState;

/// Request body cap; larger than the upload limit so oversized files get the 400 message
pub const BODY_LIMIT: usize = 10 * 1024 * 1024;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/decompile",
            post(handlers::api_decompile).fallback(handlers::method_not_allowed),
        )
        .route(
            "/decompile",
            post(handlers::raw_decompile).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/translate",
            post(handlers::api_translate).fallback(handlers::method_not_allowed),
        )
        .route(
            "/translate",
            post(handlers::raw_translate).fallback(handlers::method_not_allowed),
        )
        .route(
            "/status",
            get(handlers::health_check).fallback(handlers::method_not_allowed),
        )
        .route(
            "/metrics",
            get(handlers::metrics_handler).fallback(handlers::method_not_allowed),
        )
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

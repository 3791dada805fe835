use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handler;
use crate::state::AppState;

/// Multipart framing allowance on top of the configured content limit.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Build the axum router with all endpoints.
pub fn build_router(state: AppState, allow_any_origin: bool) -> Router {
    let body_limit =
        usize::try_from(state.max_upload_size.saturating_add(MULTIPART_OVERHEAD)).unwrap_or(usize::MAX);

    let router = Router::new()
        .route("/v1/health", get(handler::health_handler))
        .route("/v1/info", get(handler::info_handler))
        .route(
            "/api/files/",
            get(handler::list_handler).post(handler::upload_handler),
        )
        .route("/api/files/:digest/", get(handler::get_handler))
        .route("/api/files/:digest/content", get(handler::content_handler))
        .route("/api/storage-stats/", get(handler::stats_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if allow_any_origin {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

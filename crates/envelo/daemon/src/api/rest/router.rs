//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    http::HeaderValue,
    middleware,
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Header carried by every response.
pub const VERSION_HEADER: &str = "x-envelo-version";

async fn stamp_version(mut response: Response) -> Response {
    response.headers_mut().insert(
        VERSION_HEADER,
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}

/// Create the main API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let router = Router::new()
        .route("/check", post(handlers::check_action))
        .route("/enforce", post(handlers::enforce_action))
        .route("/status", get(handlers::daemon_status))
        .route("/boundaries", get(handlers::list_boundaries))
        .route("/health", get(handlers::health_check));

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router
        .layer(middleware::map_response(stamp_version))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

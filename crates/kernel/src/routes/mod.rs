//! HTTP route handlers.

pub mod health;
pub mod media;
pub mod metrics;
pub mod post;
pub mod uploads;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router over `state`.
///
/// Middleware layers (last added = first executed in request flow):
/// TraceLayer → metrics → bearer auth → routes
pub fn build_router(state: AppState) -> Router {
    let max_upload_bytes = state.media().settings().max_upload_bytes;

    Router::new()
        .merge(media::router(max_upload_bytes))
        .merge(post::router())
        .merge(uploads::router())
        .merge(health::router())
        .merge(metrics::router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::authenticate_bearer_token,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::track_requests,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::{app_state::AppState, videogen::handlers};

/// Session and generation routes, nested under `/api/v1/videogen`
pub fn videogen_router<S>(state: Arc<AppState>) -> OpenApiRouter<S> {
    OpenApiRouter::new()
        .routes(routes!(handlers::create_session))
        .routes(routes!(handlers::get_session, handlers::delete_session))
        .routes(routes!(handlers::generate_video_stream))
        .routes(routes!(handlers::cancel_generation))
        .routes(routes!(handlers::download_video))
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .with_state(state)
}

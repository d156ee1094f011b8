pub mod api;
pub mod config;
pub mod session;
pub mod state;

use axum::{extract::DefaultBodyLimit, middleware, Router};
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

use crate::state::AppState;

/// Uploads carry whole folders, so the default 2 MB body cap is lifted.
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// The full application: JSON API under `/api`, static front end otherwise.
pub fn app(state: AppState) -> Router {
    let static_dir = state.config.static_dir.clone();
    let serve_dir =
        ServeDir::new(&static_dir).not_found_service(ServeFile::new(static_dir.join("index.html")));

    let api = api::router().layer(middleware::from_fn_with_state(
        state.clone(),
        session::track_session,
    ));

    Router::new()
        .nest("/api", api)
        .fallback_service(serve_dir)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

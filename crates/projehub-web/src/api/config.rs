use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use crate::config::Backend;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_config))
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub backend: Backend,
    pub requires_sign_in: bool,
    pub max_image_dimension: u32,
    pub jpeg_quality: u8,
}

async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(ConfigResponse {
        backend: state.config.backend,
        requires_sign_in: state.config.backend.requires_sign_in(),
        max_image_dimension: state.config.max_image_dimension,
        jpeg_quality: state.config.jpeg_quality,
    })
}

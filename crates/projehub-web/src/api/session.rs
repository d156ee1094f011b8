use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{api_error, ApiError};
use crate::session::{session_cookie, SessionToken};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_session))
        .route("/login", post(login))
        .route("/logout", post(logout))
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub requires_sign_in: bool,
    pub authenticated: bool,
    pub email: Option<String>,
}

async fn session_response(state: &AppState, session_id: Uuid) -> SessionResponse {
    let sessions = state.sessions.read().await;
    let session = sessions.get_session(session_id);

    SessionResponse {
        session_id,
        requires_sign_in: state.config.backend.requires_sign_in(),
        authenticated: sessions.is_authenticated(session_id),
        email: session
            .and_then(|s| s.principal.as_ref())
            .map(|p| p.email.clone()),
    }
}

async fn get_session(State(state): State<AppState>, session: SessionToken) -> impl IntoResponse {
    Json(session_response(&state, session.0).await)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

async fn login(
    State(state): State<AppState>,
    session: SessionToken,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let authenticator = state.authenticator.clone().ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            "Sign-in is not enabled on this server".to_string(),
        )
    })?;

    let principal = authenticator
        .sign_in(&req.email, &req.password)
        .await
        .map_err(|e| {
            tracing::warn!(email = %req.email, "sign-in rejected");
            api_error(e)
        })?;

    let user_id = principal.id;
    let session_id = state.sessions.write().await.sign_in(session.0, principal);
    tracing::info!(%user_id, %session_id, "signed in");

    let response = session_response(&state, session_id).await;
    let jar = jar.add(session_cookie(session_id));

    Ok((jar, Json(response)))
}

async fn logout(State(state): State<AppState>, session: SessionToken) -> impl IntoResponse {
    state.sessions.write().await.sign_out(session.0);

    Json(session_response(&state, session.0).await)
}

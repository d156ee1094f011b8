use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::CookieJar;
use uuid::Uuid;

use crate::state::{AppState, SessionId};

pub const SESSION_COOKIE_NAME: &str = "projehub_session";

/// The session a request belongs to, resolved by [`track_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionToken(pub SessionId);

impl<S: Send + Sync> FromRequestParts<S> for SessionToken {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .copied()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "Session layer is not installed"))
    }
}

/// Resolve the request's session and hand its id to the handlers.
///
/// Only ids the server issued are resumed. Anything else, including a missing
/// or expired cookie, gets a freshly generated id which is set on the response
/// unless the handler already set one.
pub async fn track_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let presented = CookieJar::from_headers(request.headers())
        .get(SESSION_COOKIE_NAME)
        .and_then(|cookie| cookie.value().parse::<Uuid>().ok());

    let (session_id, issued) = state.sessions.write().await.resume_or_issue(presented);
    request.extensions_mut().insert(SessionToken(session_id));

    let mut response = next.run(request).await;

    if issued && !sets_session_cookie(&response) {
        if let Ok(value) = HeaderValue::from_str(&session_cookie(session_id).to_string()) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }

    response
}

fn sets_session_cookie(response: &Response) -> bool {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.starts_with(&format!("{SESSION_COOKIE_NAME}=")))
}

/// Cookie carrying a session id
pub fn session_cookie(session_id: SessionId) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, session_id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .build()
}

use crate::cache::ResponseCache;
use crate::error::{AppError, AppResult, LoggedJson};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use deadpool_sqlite::Pool;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::session;

/// Shared state for the session hand-off routes.
pub struct AuthState {
    pub pool: Pool,
    pub cache: Arc<ResponseCache>,
    pub session_ttl_secs: u64,
}

/// Token hand-off payload from the identity provider callback. The access
/// token is opaque to us; it only has to be recognized by the backend.
#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub user_id: String,
    pub access_token: String,
    pub expires_in_secs: Option<u64>,
}

fn session_cookie(token: &str, max_age_secs: u64) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        session::SESSION_COOKIE,
        token,
        max_age_secs
    )
}

/// POST /auth/session — exchange an identity-provider access token for a
/// session cookie.
pub async fn sign_in(
    State(state): State<Arc<AuthState>>,
    LoggedJson(input): LoggedJson<SignInRequest>,
) -> AppResult<impl IntoResponse> {
    if input.user_id.is_empty() {
        return Err(AppError::Validation("user_id must not be empty".to_string()));
    }
    if input.access_token.is_empty() {
        return Err(AppError::Validation(
            "access_token must not be empty".to_string(),
        ));
    }

    // The provider's token lifetime caps the session; never outlive it.
    let ttl = input
        .expires_in_secs
        .map(|secs| secs.min(state.session_ttl_secs))
        .unwrap_or(state.session_ttl_secs);

    let token =
        session::create_session(&state.pool, &input.user_id, &input.access_token, ttl).await?;

    tracing::info!(user_id = %input.user_id, "session created");

    Ok((
        [(header::SET_COOKIE, session_cookie(&token, ttl))],
        Json(json!({ "ok": true })),
    ))
}

/// DELETE /auth/session — sign out: drop the session, clear the cookie and
/// drop the caller's slice of the response cache so nothing fetched under
/// this session survives it.
pub async fn sign_out(
    State(state): State<Arc<AuthState>>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let caller = session::resolve_session(&state.pool, &headers).await;

    if let Some(token) = session::extract_session_cookie(&headers) {
        session::delete_session(&state.pool, &token).await?;
    }

    // Cached relay responses are keyed per user. When the cookie cannot be
    // resolved to a user, fall back to a full reset.
    match caller {
        Some(session) => state
            .cache
            .invalidate(Some(&format!("{}:", session.user_id))),
        None => state.cache.invalidate(None),
    }

    Ok((
        [(header::SET_COOKIE, session_cookie("", 0))],
        Json(json!({ "ok": true })),
    ))
}

/// GET /auth/status — whether the caller holds a live session.
pub async fn status(
    State(state): State<Arc<AuthState>>,
    headers: HeaderMap,
) -> (StatusCode, Json<serde_json::Value>) {
    match session::resolve_session(&state.pool, &headers).await {
        Some(session) => (
            StatusCode::OK,
            Json(json!({ "authenticated": true, "user_id": session.user_id })),
        ),
        None => (
            StatusCode::OK,
            Json(json!({ "authenticated": false })),
        ),
    }
}

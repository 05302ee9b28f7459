use axum::http::{header, HeaderMap};
use deadpool_sqlite::Pool;
use std::time::{SystemTime, UNIX_EPOCH};

use super::hash_token;
use crate::error::{AppError, AppResult};

/// Name of the session cookie the dashboard carries on same-origin calls.
pub const SESSION_COOKIE: &str = "flowboard_session";

/// Resolved caller session. `access_token` is the backend-recognized bearer
/// credential the relay re-signs outbound requests with; the caller never
/// supplies it directly.
#[derive(Clone, Debug)]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
    pub expires_at: i64,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Extract the `flowboard_session` cookie value from the Cookie header.
pub fn extract_session_cookie(headers: &HeaderMap) -> Option<String> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let trimmed = part.trim();
        if let Some(value) = trimmed.strip_prefix("flowboard_session=") {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Resolve the inbound request's session against the store. Returns None for
/// a missing cookie, an unknown token, or an expired session. Store failures
/// also resolve to None (the caller sees 401), but are logged so they are
/// distinguishable from a plain missing session server-side.
pub async fn resolve_session(pool: &Pool, headers: &HeaderMap) -> Option<Session> {
    let token = extract_session_cookie(headers)?;
    let conn = match pool.get().await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(error = %e, "session store unavailable, treating as no session");
            return None;
        }
    };
    let token = hash_token(&token);
    let now = now_secs();

    let result = conn
        .interact(move |conn| {
            conn.query_row(
                "SELECT user_id, access_token, expires_at FROM sessions
                 WHERE token = ?1 AND expires_at > ?2",
                rusqlite::params![token, now],
                |row| {
                    Ok(Session {
                        user_id: row.get(0)?,
                        access_token: row.get(1)?,
                        expires_at: row.get(2)?,
                    })
                },
            )
            .ok()
        })
        .await;

    match result {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(error = %e, "session lookup failed, treating as no session");
            None
        }
    }
}

/// Create a session bound to the given backend access token and return the
/// cookie token.
pub async fn create_session(
    pool: &Pool,
    user_id: &str,
    access_token: &str,
    ttl_secs: u64,
) -> AppResult<String> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use rand::RngCore;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = URL_SAFE_NO_PAD.encode(bytes);

    let now = now_secs();
    let expires_at = now + ttl_secs as i64;

    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("session pool unavailable: {e}")))?;
    let token_hash = hash_token(&token);
    let uid = user_id.to_string();
    let access = access_token.to_string();
    conn.interact(move |conn| {
        conn.execute(
            "INSERT INTO sessions (token, user_id, access_token, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![token_hash, uid, access, now, expires_at],
        )
    })
    .await??;

    Ok(token)
}

/// Delete a session from the store.
pub async fn delete_session(pool: &Pool, token: &str) -> AppResult<()> {
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("session pool unavailable: {e}")))?;
    let t = hash_token(token);
    conn.interact(move |conn| {
        conn.execute(
            "DELETE FROM sessions WHERE token = ?1",
            rusqlite::params![t],
        )
    })
    .await??;
    Ok(())
}

/// Periodically clean up expired sessions.
pub async fn session_cleanup_loop(pool: Pool) {
    loop {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        let now = now_secs();
        if let Ok(conn) = pool.get().await {
            let _ = conn
                .interact(move |conn| {
                    conn.execute(
                        "DELETE FROM sessions WHERE expires_at < ?1",
                        rusqlite::params![now],
                    )
                })
                .await;
        }
    }
}

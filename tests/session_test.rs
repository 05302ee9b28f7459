// ═══════════════════════════════════════════════════════════════════════════════
// Session Hand-off Tests
// ═══════════════════════════════════════════════════════════════════════════════

use axum::routing::{get, post};
use axum::Router;
use flowboard::auth::routes::{self, AuthState};
use flowboard::cache::ResponseCache;
use flowboard::config::AppConfig;
use flowboard::storage;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

struct TestApp {
    base: String,
    cache: Arc<ResponseCache>,
    _dir: tempfile::TempDir,
}

async fn spawn_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.database.path = dir.path().join("test.db");

    let pool = storage::create_pool(&config.database).unwrap();
    storage::init_pool(&pool).await.unwrap();

    let cache = Arc::new(ResponseCache::new(config.cache.max_entries));
    let auth_state = Arc::new(AuthState {
        pool,
        cache: cache.clone(),
        session_ttl_secs: 3600,
    });

    let app = Router::new()
        .route(
            "/auth/session",
            post(routes::sign_in).delete(routes::sign_out),
        )
        .route("/auth/status", get(routes::status))
        .with_state(auth_state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        base: format!("http://{addr}"),
        cache,
        _dir: dir,
    }
}

/// Extract the session cookie pair from a Set-Cookie header.
fn cookie_pair(resp: &reqwest::Response) -> String {
    let set_cookie = resp
        .headers()
        .get("set-cookie")
        .expect("missing set-cookie")
        .to_str()
        .unwrap();
    set_cookie
        .split(';')
        .next()
        .unwrap()
        .trim()
        .to_string()
}

#[tokio::test]
async fn test_sign_in_sets_usable_cookie() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/auth/session", app.base))
        .json(&json!({ "user_id": "user-1", "access_token": "backend-tok" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let cookie = cookie_pair(&resp);
    assert!(cookie.starts_with("flowboard_session="));

    let resp = client
        .get(format!("{}/auth/status", app.base))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["user_id"], "user-1");
}

#[tokio::test]
async fn test_status_without_cookie() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/auth/status", app.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["authenticated"], false);
}

#[tokio::test]
async fn test_sign_out_invalidates_session_and_drops_callers_cache() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/auth/session", app.base))
        .json(&json!({ "user_id": "user-1", "access_token": "backend-tok" }))
        .send()
        .await
        .unwrap();
    let cookie = cookie_pair(&resp);

    // Simulate relay responses cached for two different users
    app.cache
        .insert("user-1:logs:{}".to_string(), json!([1, 2, 3]));
    app.cache
        .insert("user-2:logs:{}".to_string(), json!([4, 5]));
    assert_eq!(app.cache.len(), 2);

    let resp = client
        .delete(format!("{}/auth/session", app.base))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Cookie cleared
    let set_cookie = resp
        .headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(set_cookie.contains("Max-Age=0"));

    // Only the signing-out user's slice is dropped
    assert_eq!(app.cache.len(), 1);
    assert_eq!(
        app.cache.get("user-2:logs:{}", std::time::Duration::from_secs(60)),
        Some(json!([4, 5]))
    );

    // Session no longer resolves
    let resp = client
        .get(format!("{}/auth/status", app.base))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["authenticated"], false);
}

#[tokio::test]
async fn test_sign_out_with_unresolvable_cookie_resets_cache() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    app.cache
        .insert("user-1:logs:{}".to_string(), json!([1, 2, 3]));

    // Cookie names a session the store has never seen; without a resolved
    // user the whole cache is reset rather than left intact.
    let resp = client
        .delete(format!("{}/auth/session", app.base))
        .header("cookie", "flowboard_session=never-issued")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(app.cache.is_empty());
}

#[tokio::test]
async fn test_sign_in_rejects_empty_fields() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/auth/session", app.base))
        .json(&json!({ "user_id": "", "access_token": "tok" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/auth/session", app.base))
        .json(&json!({ "user_id": "user-1", "access_token": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_provider_expiry_caps_session_ttl() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    // Provider token already expired: session must not outlive it
    let resp = client
        .post(format!("{}/auth/session", app.base))
        .json(&json!({
            "user_id": "user-1",
            "access_token": "backend-tok",
            "expires_in_secs": 0
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let cookie = cookie_pair(&resp);

    let resp = client
        .get(format!("{}/auth/status", app.base))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["authenticated"], false);
}

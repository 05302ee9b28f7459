use crate::auth::session;
use crate::cache::ResponseCache;
use crate::config::AppConfig;
use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use deadpool_sqlite::Pool;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Shared state for the backend relay. Holds no per-request data: every
/// inbound request re-resolves its session and issues exactly one forward
/// attempt, so instances scale horizontally with no cross-request
/// synchronization.
pub struct RelayState {
    pub client: reqwest::Client,
    pub backend_base_url: String,
    pub pool: Pool,
    pub cache: Arc<ResponseCache>,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
}

impl RelayState {
    pub fn new(
        config: &AppConfig,
        pool: Pool,
        cache: Arc<ResponseCache>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.backend.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            backend_base_url: config.backend.base_url.trim_end_matches('/').to_string(),
            pool,
            cache,
            cache_enabled: config.cache.enabled,
            cache_ttl: Duration::from_secs(config.cache.ttl_secs),
        })
    }
}

/// Forwarding policy for an inbound method. Whether the caller's body goes
/// upstream is a data fact of the method, not an inline conditional: GET and
/// DELETE never forward a body, everything else forwards it verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodPolicy {
    pub forwards_body: bool,
}

impl MethodPolicy {
    pub fn for_method(method: &Method) -> Self {
        match *method {
            Method::GET | Method::DELETE => Self {
                forwards_body: false,
            },
            _ => Self {
                forwards_body: true,
            },
        }
    }
}

fn build_destination(base_url: &str, path: &str, query: Option<&str>) -> String {
    let mut url = format!("{}/{}", base_url.trim_end_matches('/'), path);
    if let Some(q) = query {
        if !q.is_empty() {
            url.push('?');
            url.push_str(q);
        }
    }
    url
}

/// First path segment, used as the invalidation prefix after a mutation:
/// writing under `logs/...` drops every cached `logs:*` read.
fn resource_prefix(path: &str) -> &str {
    path.split('/').next().unwrap_or(path)
}

/// Cache keys are scoped per caller. Responses are fetched under the
/// caller's own bearer token, so an entry is only ever replayed to the user
/// it was fetched for; two users GETting the same path get separate entries.
fn caller_cache_key(user_id: &str, path: &str, query: &Option<String>) -> String {
    ResponseCache::cache_key(&format!("{user_id}:{path}"), &json!({ "query": query }))
}

fn json_response(status: StatusCode, body: Value) -> Response {
    (status, axum::Json(body)).into_response()
}

/// Relay handler shared across GET/POST/PUT/PATCH/DELETE on
/// `/api/backend/{*path}`.
///
/// Every failure path is converted to a structured response; nothing here
/// propagates as an error. Terminal outcomes: 401 without a session, cached
/// or passthrough 200 JSON, 204 empty, passthrough error status with a
/// normalized `{error, status, path}` envelope, 504 on forward timeout, 502
/// when the backend is unreachable or its 2xx body is not JSON.
pub async fn relay_handler(
    State(state): State<Arc<RelayState>>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(caller) = session::resolve_session(&state.pool, &headers).await else {
        return json_response(
            StatusCode::UNAUTHORIZED,
            json!({ "error": "Unauthorized: No active session" }),
        );
    };

    let destination = build_destination(&state.backend_base_url, &path, query.as_deref());
    let policy = MethodPolicy::for_method(&method);

    // Read-through: fresh GETs are answered without touching the backend.
    // Keys carry the caller's identity so one user's response is never
    // served to another.
    let cache_key = (state.cache_enabled && method == Method::GET)
        .then(|| caller_cache_key(&caller.user_id, &path, &query));
    if let Some(key) = cache_key.as_deref() {
        if let Some(hit) = state.cache.get(key, state.cache_ttl) {
            tracing::debug!(path = %path, "relay cache hit");
            return json_response(StatusCode::OK, hit);
        }
    }

    let mut request = state
        .client
        .request(method.clone(), &destination)
        .header(header::CONTENT_TYPE, "application/json")
        .bearer_auth(&caller.access_token);
    if policy.forwards_body {
        request = request.body(body);
    }

    let upstream = match request.send().await {
        Ok(resp) => resp,
        Err(e) if e.is_timeout() => {
            tracing::error!(destination = %destination, error = %e, "backend request timed out");
            return json_response(
                StatusCode::GATEWAY_TIMEOUT,
                json!({ "error": "Backend timeout" }),
            );
        }
        Err(e) => {
            tracing::error!(destination = %destination, error = %e, "backend unreachable");
            return json_response(
                StatusCode::BAD_GATEWAY,
                json!({ "error": "Backend unavailable" }),
            );
        }
    };

    let status = upstream.status();

    if status == StatusCode::NO_CONTENT {
        invalidate_after_mutation(&state, &method, &caller.user_id, &path);
        return StatusCode::NO_CONTENT.into_response();
    }

    if !status.is_success() {
        let error_text = upstream.text().await.unwrap_or_default();
        tracing::warn!(
            status = status.as_u16(),
            destination = %destination,
            body = %error_text,
            "backend returned error status"
        );
        // Passthrough status so the dashboard can branch on 404 vs 500, with
        // one normalized body shape regardless of endpoint.
        return json_response(
            status,
            json!({ "error": error_text, "status": status.as_u16(), "path": path }),
        );
    }

    let payload = match upstream.bytes().await {
        Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(destination = %destination, error = %e, "backend returned non-JSON success body");
                return json_response(
                    StatusCode::BAD_GATEWAY,
                    json!({ "error": "Backend unavailable" }),
                );
            }
        },
        Err(e) => {
            tracing::error!(destination = %destination, error = %e, "failed to read backend response");
            return json_response(
                StatusCode::BAD_GATEWAY,
                json!({ "error": "Backend unavailable" }),
            );
        }
    };

    if let Some(key) = cache_key {
        state.cache.insert(key, payload.clone());
    }
    invalidate_after_mutation(&state, &method, &caller.user_id, &path);

    // Fine-grained 2xx codes (e.g. 201) collapse to 200.
    json_response(StatusCode::OK, payload)
}

fn invalidate_after_mutation(state: &RelayState, method: &Method, user_id: &str, path: &str) {
    if state.cache_enabled && *method != Method::GET {
        state
            .cache
            .invalidate(Some(&format!("{user_id}:{}", resource_prefix(path))));
    }
}

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use flowboard::auth::{self, routes::AuthState};
use flowboard::cache::ResponseCache;
use flowboard::config::AppConfig;
use flowboard::relay::{relay_handler, RelayState};
use flowboard::storage;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

#[derive(Parser)]
#[command(name = "flowboard", about = "Dashboard host for workflow logs and metrics")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowboard=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(Some(&cli.config))?;

    if let Err(msg) = config.validate() {
        eprintln!("Configuration error: {msg}");
        return Err(msg.into());
    }

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        backend = %config.backend.base_url,
        db = %config.database.path.display(),
        "starting flowboard"
    );

    // Setup SQLite pool (session store)
    let pool = storage::create_pool(&config.database)?;
    storage::init_pool(&pool).await?;
    tracing::info!("session store initialized");

    // Spawn session cleanup
    let cleanup_pool = pool.clone();
    tokio::spawn(async move {
        auth::session::session_cleanup_loop(cleanup_pool).await;
    });

    // Response cache, owned here and shared with the relay and sign-out
    let cache = Arc::new(ResponseCache::new(config.cache.max_entries));

    // Relay state
    let relay_state = Arc::new(RelayState::new(&config, pool.clone(), cache.clone())?);

    // Auth hand-off state
    let auth_state = Arc::new(AuthState {
        pool: pool.clone(),
        cache: cache.clone(),
        session_ttl_secs: config.auth.session_ttl_secs,
    });

    // Rate limiter for auth routes
    let auth_governor_conf = GovernorConfigBuilder::default()
        .key_extractor(SmartIpKeyExtractor)
        .per_second(config.rate_limit.auth_per_second)
        .burst_size(config.rate_limit.auth_burst_size)
        .finish()
        .expect("failed to build auth rate limiter config");

    // ── Auth routes (public, rate-limited) ──
    let auth_routes = Router::new()
        .route(
            "/auth/session",
            post(auth::routes::sign_in).delete(auth::routes::sign_out),
        )
        .route("/auth/status", get(auth::routes::status))
        .layer(GovernorLayer::new(auth_governor_conf))
        .with_state(auth_state);

    // ── Relay routes (one handler shared across methods) ──
    let relay_routes = Router::new()
        .route(
            "/api/backend/{*path}",
            get(relay_handler)
                .post(relay_handler)
                .put(relay_handler)
                .patch(relay_handler)
                .delete(relay_handler),
        )
        .layer(DefaultBodyLimit::max(config.server.max_body_bytes))
        .with_state(relay_state);

    // ── Health route (public) ──
    let health_route = Router::new().route("/health", get(health));

    // CORS: restrict to the dashboard origin with credentials
    let api_cors = CorsLayer::new()
        .allow_origin(AllowOrigin::exact(
            config
                .server
                .dashboard_origin
                .parse()
                .expect("dashboard_origin must be a valid header value"),
        ))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::COOKIE,
            axum::http::header::AUTHORIZATION,
        ])
        .allow_credentials(true);

    let app = Router::new()
        .merge(auth_routes)
        .merge(relay_routes)
        .merge(health_route)
        .layer(api_cors);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    tracing::info!("shutting down...");
}

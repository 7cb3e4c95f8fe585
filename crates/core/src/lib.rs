pub mod backend;
pub mod cli;
pub mod clock;
pub mod config;
pub mod confirmation;
pub mod gateway;
pub mod handlers;
pub mod mcp;
pub mod middleware;
pub mod sql;
pub mod test_utils;
pub mod validation;

use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

pub struct AppState {
    pub mcp: Arc<mcp::McpServer>,
    pub rate_limiter: Arc<middleware::RateLimiter>,
    pub config: config::AppConfig,
    pub shutdown: Arc<Notify>,
}

impl AppState {
    /// Wires the gateway, MCP dispatcher and rate limiter for `config`.
    pub fn new(
        config: config::AppConfig,
        resolver: Arc<dyn backend::ConnectionResolver>,
        executor: Arc<dyn backend::QueryExecutor>,
    ) -> Self {
        let gateway = gateway::QueryGateway::new(config.security_options(), resolver, executor);
        Self {
            mcp: Arc::new(mcp::McpServer::new(Arc::new(gateway))),
            rate_limiter: Arc::new(middleware::RateLimiter::new(config.rate_limit.clone())),
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }
}

pub enum AppError {
    Internal(anyhow::Error),
    Validation(String),
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, err_type, message) = match self {
            AppError::Internal(e) => {
                // Full error stays in the server log
                tracing::error!("Internal error: {:#}", e);
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Validation(m) => (axum::http::StatusCode::BAD_REQUEST, "invalid_input", m),
        };

        let body = axum::Json(serde_json::json!({
            "status": "error",
            "error": {
                "type": err_type,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// HTTP surface: `POST /mcp` and `GET /health`, both behind the rate limiter.
pub fn build_router(state: Arc<AppState>) -> axum::Router {
    use axum::routing::{get, post};
    use tower_http::cors::CorsLayer;

    axum::Router::new()
        .route("/mcp", post(handlers::mcp_handler))
        .route("/health", get(handlers::health_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ))
        .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::HeaderName::from_static(middleware::BYPASS_HEADER),
                ]),
        )
}

/// Prunes rate-limit entries idle past [`middleware::RateLimiter::idle_ttl`]
/// every 10 minutes until `shutdown` fires.
pub fn spawn_rate_limit_cleanup(
    limiter: Arc<middleware::RateLimiter>,
    shutdown: Arc<Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
        loop {
            tokio::select! {
                () = shutdown.notified() => {
                    tracing::info!("Rate limiter cleanup shutting down");
                    break;
                }
                _ = interval.tick() => {
                    limiter.cleanup(limiter.idle_ttl());
                }
            }
        }
    })
}

fn spawn_signal_listener(shutdown: Arc<Notify>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            return;
        }
        info!("Shutdown signal received");
        shutdown.notify_waiters();
    });
}

/// Entry point for `querygate serve`.
pub async fn run_server(config: config::AppConfig, transport: cli::Transport) -> anyhow::Result<()> {
    use anyhow::Context;

    let resolver = Arc::new(backend::EnvConnectionResolver::from_env());
    let connections = backend::ConnectionResolver::list(resolver.as_ref());
    info!(
        read_only = config.read_only,
        confirm_writes = config.confirm_writes,
        security_level = %config.security_level,
        connections = ?connections,
        "querygate v{} starting",
        env!("CARGO_PKG_VERSION")
    );
    if connections.is_empty() {
        tracing::warn!("No connections configured. Set QUERYGATE_<NAME>_URI to add one");
    }

    let read_only = config.read_only;
    let state = Arc::new(AppState::new(
        config,
        resolver,
        Arc::new(backend::SqliteExecutor::default().with_read_only(read_only)),
    ));
    spawn_signal_listener(state.shutdown.clone());

    match transport {
        cli::Transport::Stdio => {
            mcp::stdio::serve_stdio(state.mcp.clone(), state.shutdown.clone()).await
        }
        cli::Transport::Http => {
            let cleanup =
                spawn_rate_limit_cleanup(state.rate_limiter.clone(), state.shutdown.clone());

            let ip: std::net::IpAddr = state
                .config
                .bind_address
                .parse()
                .with_context(|| format!("Invalid bind address '{}'", state.config.bind_address))?;
            let addr = std::net::SocketAddr::new(ip, state.config.port);
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;
            info!("querygate is listening on http://{}/mcp", addr);

            let shutdown_signal = state.shutdown.clone();
            let app = build_router(state.clone());
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                shutdown_signal.notified().await;
                info!("Graceful shutdown signal received. Stopping server...");
            })
            .await
            .context("HTTP server failed")?;

            cleanup.abort();
            Ok(())
        }
    }
}

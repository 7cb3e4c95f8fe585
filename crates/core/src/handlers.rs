use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::middleware::RateLimitStats;
use crate::{AppError, AppResult, AppState};

/// JSON-RPC over HTTP. One request per POST; notifications are acknowledged
/// with 202 and an empty body.
pub async fn mcp_handler(State(state): State<Arc<AppState>>, body: String) -> AppResult<Response> {
    if body.trim().is_empty() {
        return Err(AppError::Validation("request body is empty".to_string()));
    }

    let response = state
        .mcp
        .handle_message(&body)
        .await
        .context("Failed to encode JSON-RPC response")?;
    match response {
        Some(response) => {
            debug!(bytes = response.len(), "MCP response");
            Ok((
                [(axum::http::header::CONTENT_TYPE, "application/json")],
                response,
            )
                .into_response())
        }
        None => Ok(StatusCode::ACCEPTED.into_response()),
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub read_only: bool,
    pub confirm_writes: bool,
    pub security_level: String,
    pub pending_confirmations: usize,
    pub rate_limit: RateLimitStats,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let options = state.mcp.gateway().options();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        read_only: options.read_only,
        confirm_writes: options.confirmation_enabled(),
        security_level: options.security_level.to_string(),
        pending_confirmations: state.mcp.gateway().list_pending().len(),
        rate_limit: state.rate_limiter.stats(),
    })
}

// Handlers for the configured prompt endpoints.
//
// Both routes run the same dispatch pipeline; they only differ in how the
// endpoint config is found. `/api/{config_name}` looks the config up by name,
// while the legacy prefix route matches the full request path against each
// config's `path`.
use axum::{
    extract::{ConnectInfo, MatchedPath, Path, State},
    http::{header, HeaderMap},
    Json,
};
use bytes::Bytes;
use serde_json::Value;
use std::net::SocketAddr;
use tracing::{debug, info};

use crate::dispatch::{CallerInfo, Target};
use crate::handlers::ApiError;
use crate::AppState;

// Handles `POST /api/{config_name}`.
pub async fn handle_named(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    Path(config_name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    run(&state, Target::Name(config_name), addr, &headers, &body).await
}

// Handles POST on the fixed `/api/...` routes that only serve GET, such as
// `/api/logs`. A config may carry one of those names, so the last path
// segment is dispatched as a config name.
pub async fn handle_fixed_name(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    matched: MatchedPath,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let config_name = matched
        .as_str()
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    run(&state, Target::Name(config_name), addr, &headers, &body).await
}

// Handles `POST /{legacy_prefix}/{*endpoint}`.
pub async fn handle_legacy(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let path = format!("/{}/{}", state.legacy_prefix, endpoint);
    run(&state, Target::Path(path), addr, &headers, &body).await
}

async fn run(
    state: &AppState,
    target: Target,
    addr: SocketAddr,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Json<Value>, ApiError> {
    let caller = CallerInfo {
        ip_address: addr.ip().to_string(),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string(),
    };
    debug!("Dispatching {:?} for {}", target, caller.ip_address);

    let dispatched = state.dispatcher.dispatch(&target, body, &caller).await;
    if let Some(name) = &dispatched.config_name {
        info!(
            "Endpoint {} answered (success={}, log={:?})",
            name,
            dispatched.result.is_ok(),
            dispatched.log
        );
    }

    Ok(Json(dispatched.result?))
}

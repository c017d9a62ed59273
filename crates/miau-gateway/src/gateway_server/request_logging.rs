//! Access log and `apikey` header middleware.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::USER_AGENT;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use super::types::GatewayApiError;
use super::{GatewayServerState, API_KEY_HEADER, HEALTH_ENDPOINT, INSTANCES_ENDPOINT};

/// Instance id segment of `/v1/instance/{id}/...`, if the path has one.
fn instance_from_path(path: &str) -> Option<&str> {
    path.strip_prefix(INSTANCES_ENDPOINT)?
        .strip_prefix('/')?
        .split('/')
        .next()
        .filter(|segment| !segment.is_empty())
}

pub(super) async fn log_gateway_request(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let remote_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default();
    let user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let response = next.run(request).await;

    let status = response.status();
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let instance = instance_from_path(&path).unwrap_or_default();
    if status.is_server_error() {
        warn!(
            %method,
            path,
            remote_ip,
            user_agent,
            status = status.as_u16(),
            duration_ms,
            instance,
            "request failed"
        );
    } else {
        info!(
            %method,
            path,
            remote_ip,
            user_agent,
            status = status.as_u16(),
            duration_ms,
            instance,
            "request"
        );
    }
    response
}

fn authorize_gateway_request(
    state: &GatewayServerState,
    headers: &HeaderMap,
) -> Result<(), GatewayApiError> {
    let Some(expected) = state.expected_api_key() else {
        return Ok(());
    };
    let observed = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim);
    if observed != Some(expected) {
        return Err(GatewayApiError::unauthorized());
    }
    Ok(())
}

pub(super) async fn require_gateway_api_key(
    State(state): State<Arc<GatewayServerState>>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() != HEALTH_ENDPOINT {
        if let Err(error) = authorize_gateway_request(&state, request.headers()) {
            warn!(path = request.uri().path(), "rejected request without valid apikey");
            return error.into_response();
        }
    }
    next.run(request).await
}

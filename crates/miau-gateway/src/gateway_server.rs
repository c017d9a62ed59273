use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use miau_session::{Instance, InstanceRepository, SessionManager};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

mod instance_handlers;
mod message_handlers;
mod qr_image;
mod request_logging;
mod types;

use instance_handlers::{
    handle_connect_instance, handle_create_instance, handle_delete_instance,
    handle_instance_status, handle_list_instances, handle_logout_instance,
    handle_pairing_status, handle_start_pairing, handle_update_instance,
    handle_update_read_settings,
};
use message_handlers::{
    handle_send_audio, handle_send_document, handle_send_image, handle_send_media,
    handle_send_text, handle_send_video, handle_status_audio, handle_status_image,
    handle_status_text, handle_status_video,
};
use request_logging::{log_gateway_request, require_gateway_api_key};
use types::GatewayApiError;

const HEALTH_ENDPOINT: &str = "/healthz";
const INSTANCES_ENDPOINT: &str = "/v1/instance";
const INSTANCE_ENDPOINT: &str = "/v1/instance/{id}";
const INSTANCE_CONNECT_ENDPOINT: &str = "/v1/instance/{id}/connect";
const INSTANCE_STATUS_ENDPOINT: &str = "/v1/instance/{id}/status";
const INSTANCE_LOGOUT_ENDPOINT: &str = "/v1/instance/{id}/logout";
const INSTANCE_READ_SETTINGS_ENDPOINT: &str = "/v1/instance/{id}/read-settings";
const INSTANCE_PAIRING_ENDPOINT: &str = "/v1/instance/{id}/pairing";
const INSTANCE_PAIRING_STATUS_ENDPOINT: &str = "/v1/instance/{id}/pairing/status";
const MESSAGE_TEXT_ENDPOINT: &str = "/v1/instance/{id}/message/text";
const MESSAGE_AUDIO_ENDPOINT: &str = "/v1/instance/{id}/message/audio";
const MESSAGE_IMAGE_ENDPOINT: &str = "/v1/instance/{id}/message/image";
const MESSAGE_VIDEO_ENDPOINT: &str = "/v1/instance/{id}/message/video";
const MESSAGE_DOCUMENT_ENDPOINT: &str = "/v1/instance/{id}/message/document";
const MESSAGE_MEDIA_ENDPOINT: &str = "/v1/instance/{id}/message/media";
const STATUS_TEXT_ENDPOINT: &str = "/v1/instance/{id}/status/text";
const STATUS_IMAGE_ENDPOINT: &str = "/v1/instance/{id}/status/image";
const STATUS_VIDEO_ENDPOINT: &str = "/v1/instance/{id}/status/video";
const STATUS_AUDIO_ENDPOINT: &str = "/v1/instance/{id}/status/audio";
pub const API_KEY_HEADER: &str = "apikey";

/// Listener settings for [`run_gateway_server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayServerConfig {
    pub bind: String,
    /// Static key required in the `apikey` header; `None` disables the check.
    pub api_key: Option<String>,
}

impl Default for GatewayServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            api_key: None,
        }
    }
}

#[derive(Clone)]
pub struct GatewayServerState {
    config: GatewayServerConfig,
    manager: Arc<SessionManager>,
    repository: Arc<dyn InstanceRepository>,
}

impl GatewayServerState {
    pub fn new(
        config: GatewayServerConfig,
        manager: Arc<SessionManager>,
        repository: Arc<dyn InstanceRepository>,
    ) -> Self {
        Self {
            config,
            manager,
            repository,
        }
    }

    fn expected_api_key(&self) -> Option<&str> {
        self.config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    /// Loads the stored record, 404ing when the repository does not know it.
    async fn find_instance(&self, instance_id: &str) -> Result<Instance, GatewayApiError> {
        self.repository
            .list(Some(instance_id))
            .await
            .map_err(|error| GatewayApiError::from_repository("failed to list instances", error))?
            .into_iter()
            .next()
            .ok_or_else(GatewayApiError::instance_not_found)
    }
}

/// Serves the gateway until ctrl-c, then drains the session manager.
pub async fn run_gateway_server(
    config: GatewayServerConfig,
    manager: Arc<SessionManager>,
    repository: Arc<dyn InstanceRepository>,
) -> Result<()> {
    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind '{}'", config.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind gateway server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound gateway server address")?;
    info!(
        addr = %local_addr,
        api_key = config.api_key.is_some(),
        "gateway server listening"
    );

    let state = Arc::new(GatewayServerState::new(
        config,
        Arc::clone(&manager),
        repository,
    ));
    let app = build_gateway_router(state);
    let serve_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await;
    manager.shutdown().await;
    serve_result.context("gateway server exited unexpectedly")?;
    Ok(())
}

pub fn build_gateway_router(state: Arc<GatewayServerState>) -> Router {
    Router::new()
        .route(HEALTH_ENDPOINT, get(handle_health))
        .route(
            INSTANCES_ENDPOINT,
            get(handle_list_instances).post(handle_create_instance),
        )
        .route(
            INSTANCE_ENDPOINT,
            put(handle_update_instance).delete(handle_delete_instance),
        )
        .route(INSTANCE_CONNECT_ENDPOINT, post(handle_connect_instance))
        .route(INSTANCE_STATUS_ENDPOINT, get(handle_instance_status))
        .route(INSTANCE_LOGOUT_ENDPOINT, post(handle_logout_instance))
        .route(
            INSTANCE_READ_SETTINGS_ENDPOINT,
            put(handle_update_read_settings),
        )
        .route(INSTANCE_PAIRING_ENDPOINT, post(handle_start_pairing))
        .route(INSTANCE_PAIRING_STATUS_ENDPOINT, get(handle_pairing_status))
        .route(MESSAGE_TEXT_ENDPOINT, post(handle_send_text))
        .route(MESSAGE_AUDIO_ENDPOINT, post(handle_send_audio))
        .route(MESSAGE_IMAGE_ENDPOINT, post(handle_send_image))
        .route(MESSAGE_VIDEO_ENDPOINT, post(handle_send_video))
        .route(MESSAGE_DOCUMENT_ENDPOINT, post(handle_send_document))
        .route(MESSAGE_MEDIA_ENDPOINT, post(handle_send_media))
        .route(STATUS_TEXT_ENDPOINT, post(handle_status_text))
        .route(STATUS_IMAGE_ENDPOINT, post(handle_status_image))
        .route(STATUS_VIDEO_ENDPOINT, post(handle_status_video))
        .route(STATUS_AUDIO_ENDPOINT, post(handle_status_audio))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_gateway_api_key,
        ))
        .layer(middleware::from_fn(log_gateway_request))
        .with_state(state)
}

async fn handle_health(State(state): State<Arc<GatewayServerState>>) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "instances": state.manager.registry().len(),
        })),
    )
        .into_response()
}

fn parse_gateway_json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, GatewayApiError> {
    serde_json::from_slice::<T>(body).map_err(|error| {
        GatewayApiError::unprocessable(format!("failed to bind request body: {error}"))
    })
}

/// Rejects blank required fields with a 400.
fn require_field(value: &str, field: &str) -> Result<(), GatewayApiError> {
    if value.trim().is_empty() {
        return Err(GatewayApiError::bad_request(
            "invalid_request",
            format!("invalid request body: '{field}' is required"),
        ));
    }
    Ok(())
}

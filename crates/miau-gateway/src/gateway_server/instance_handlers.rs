use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miau_session::{
    ConnectOutcome, Instance, InstanceStatus, InstanceUpdate, SessionError, StartPairingRequest,
    DEFAULT_READ_DELAY_SECONDS, MAX_READ_DELAY_SECONDS,
};
use tracing::{info, warn};

use super::types::{
    ConnectInstanceResponse, CreateInstanceRequest, GatewayApiError, InstanceStateCompat,
    ListInstancesQuery, ListInstancesRow, MessageResponse, PairingStatusQuery, StartPairingBody,
    StatusInstanceResponse, UpdateInstanceRequest, UpdateReadSettingsRequest,
};
use super::qr_image::render_qr_data_url;
use super::{parse_gateway_json_body, require_field, GatewayServerState};

const QR_CODE_NOTICE: &str = "If instance restart this instance could be lost if you cannot connect";

fn validate_read_delay(read_delay: u32) -> Result<(), GatewayApiError> {
    if read_delay > MAX_READ_DELAY_SECONDS {
        return Err(GatewayApiError::bad_request(
            "invalid_read_delay",
            format!("readDelay must be between 0 and {MAX_READ_DELAY_SECONDS} seconds"),
        ));
    }
    Ok(())
}

pub(super) async fn handle_create_instance(
    State(state): State<Arc<GatewayServerState>>,
    body: Bytes,
) -> Response {
    let request = match parse_gateway_json_body::<CreateInstanceRequest>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    let id = [request.instance_name, request.id]
        .into_iter()
        .flatten()
        .map(|id| id.trim().to_string())
        .find(|id| !id.is_empty())
        .unwrap_or_default();
    if let Err(error) = require_field(&id, "instanceName") {
        return error.into_response();
    }
    let read_delay = request.read_delay.unwrap_or(DEFAULT_READ_DELAY_SECONDS);
    if let Err(error) = validate_read_delay(read_delay) {
        return error.into_response();
    }

    let mut instance = Instance::new(id);
    if let Some(webhook) = request.webhook {
        instance.webhook.url = webhook.url.filter(|url| !url.trim().is_empty());
        instance.webhook.base64 = webhook.base64;
    }
    instance.auto_read_messages = request.auto_read_messages.unwrap_or(true);
    instance.read_delay = read_delay;

    match state.repository.create(instance).await {
        Ok(created) => {
            info!(instance = %created.id, "instance created");
            (StatusCode::CREATED, Json(created)).into_response()
        }
        Err(error) => {
            GatewayApiError::from_repository("failed to create instance", error).into_response()
        }
    }
}

pub(super) async fn handle_list_instances(
    State(state): State<Arc<GatewayServerState>>,
    Query(query): Query<ListInstancesQuery>,
) -> Response {
    let filter = query.instance_name.or(query.id);
    let instances = match state.repository.list(filter.as_deref()).await {
        Ok(instances) => instances,
        Err(error) => {
            return GatewayApiError::from_repository("failed to list instances", error)
                .into_response()
        }
    };
    let rows = instances
        .into_iter()
        .map(|instance| {
            let status = state.manager.status(&instance.id);
            ListInstancesRow {
                owner_jid: instance.remote_jid.clone(),
                status: status.as_str().to_string(),
                instance,
            }
        })
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(rows)).into_response()
}

pub(super) async fn handle_update_instance(
    State(state): State<Arc<GatewayServerState>>,
    Path(instance_id): Path<String>,
    body: Bytes,
) -> Response {
    let request = match parse_gateway_json_body::<UpdateInstanceRequest>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    let update = InstanceUpdate {
        webhook_url: request.webhook.url,
        webhook_base64: request.webhook.base64,
        ..InstanceUpdate::default()
    };
    match state.repository.update(&instance_id, update).await {
        Ok(updated) => (StatusCode::OK, Json(updated)).into_response(),
        Err(error) => {
            GatewayApiError::from_repository("failed to update instance", error).into_response()
        }
    }
}

pub(super) async fn handle_delete_instance(
    State(state): State<Arc<GatewayServerState>>,
    Path(instance_id): Path<String>,
) -> Response {
    match state.find_instance(&instance_id).await {
        Ok(_) => {}
        Err(error) if error.status == StatusCode::NOT_FOUND => {
            return (
                StatusCode::OK,
                Json(MessageResponse::new("instance doesn't exists")),
            )
                .into_response();
        }
        Err(error) => return error.into_response(),
    }

    state.manager.teardown(&instance_id).await;
    if let Err(error) = state.repository.delete(&instance_id).await {
        return GatewayApiError::from_repository("failed to delete instance", error)
            .into_response();
    }
    info!(instance = %instance_id, "instance deleted");
    (StatusCode::OK, Json(MessageResponse::new("instance deleted"))).into_response()
}

pub(super) async fn handle_connect_instance(
    State(state): State<Arc<GatewayServerState>>,
    Path(instance_id): Path<String>,
) -> Response {
    if let Err(error) = state.find_instance(&instance_id).await {
        return error.into_response();
    }
    let response = match state.manager.connect(&instance_id).await {
        Ok(ConnectOutcome::AlreadyConnected) => ConnectInstanceResponse {
            message: "instance already connected".to_string(),
            connected: true,
            base64: None,
        },
        Ok(ConnectOutcome::QrCode(code)) => match render_qr_data_url(&code) {
            Ok(data_url) => ConnectInstanceResponse {
                message: QR_CODE_NOTICE.to_string(),
                connected: false,
                base64: Some(data_url),
            },
            Err(error) => {
                warn!(
                    instance = %instance_id,
                    error = %format!("{error:#}"),
                    "failed to encode qrcode"
                );
                return GatewayApiError::internal(
                    "qrcode_encode_failed",
                    format!("failed to encode qrcode: {error:#}"),
                )
                .into_response();
            }
        },
        Err(error) => {
            return GatewayApiError::from_session("failed to connect instance", error)
                .into_response()
        }
    };
    (StatusCode::OK, Json(response)).into_response()
}

pub(super) async fn handle_instance_status(
    State(state): State<Arc<GatewayServerState>>,
    Path(instance_id): Path<String>,
) -> Response {
    let instance = match state.find_instance(&instance_id).await {
        Ok(instance) => instance,
        Err(error) => return error.into_response(),
    };
    let status = state.manager.status(&instance_id);
    let remote_jid = if status == InstanceStatus::Open {
        instance.remote_jid
    } else {
        String::new()
    };
    (
        StatusCode::OK,
        Json(StatusInstanceResponse {
            id: instance.id.clone(),
            state: status.as_str().to_string(),
            remote_jid,
            instance: InstanceStateCompat {
                instance_name: instance.id,
                state: status.as_str().to_string(),
            },
        }),
    )
        .into_response()
}

pub(super) async fn handle_logout_instance(
    State(state): State<Arc<GatewayServerState>>,
    Path(instance_id): Path<String>,
) -> Response {
    if let Err(error) = state.find_instance(&instance_id).await {
        return error.into_response();
    }
    match state.manager.logout(&instance_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse::new("instance logout successfully")),
        )
            .into_response(),
        Err(error) => {
            GatewayApiError::from_session("failed to logout instance", error).into_response()
        }
    }
}

pub(super) async fn handle_update_read_settings(
    State(state): State<Arc<GatewayServerState>>,
    Path(instance_id): Path<String>,
    body: Bytes,
) -> Response {
    let request = match parse_gateway_json_body::<UpdateReadSettingsRequest>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    if let Err(error) = validate_read_delay(request.read_delay) {
        return error.into_response();
    }
    let update = InstanceUpdate {
        auto_read_messages: Some(request.auto_read_messages),
        read_delay: Some(request.read_delay),
        ..InstanceUpdate::default()
    };
    match state.repository.update(&instance_id, update).await {
        Ok(updated) => (StatusCode::OK, Json(updated)).into_response(),
        Err(error) => GatewayApiError::from_repository("failed to update read settings", error)
            .into_response(),
    }
}

pub(super) async fn handle_start_pairing(
    State(state): State<Arc<GatewayServerState>>,
    Path(instance_id): Path<String>,
    body: Bytes,
) -> Response {
    let request = match parse_gateway_json_body::<StartPairingBody>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    if let Err(error) = require_field(&request.phone_number, "phoneNumber") {
        return error.into_response();
    }
    if let Err(error) = state.find_instance(&instance_id).await {
        return error.into_response();
    }

    let pairing = StartPairingRequest::new(instance_id, request.phone_number.trim())
        .with_client(request.client_type, request.client_name);
    match state.manager.start_pairing(pairing).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(SessionError::CodeGenerationFailed { source }) => {
            warn!(error = %source, "pairing code generation failed");
            GatewayApiError::internal(
                "pairing_code_failed",
                format!("failed to generate pairing code: {source}"),
            )
            .into_response()
        }
        Err(error) => {
            GatewayApiError::from_session("failed to start pairing", error).into_response()
        }
    }
}

pub(super) async fn handle_pairing_status(
    State(state): State<Arc<GatewayServerState>>,
    Path(instance_id): Path<String>,
    Query(query): Query<PairingStatusQuery>,
) -> Response {
    let session_id = query.session_id.unwrap_or_default();
    if let Err(error) = require_field(&session_id, "sessionId") {
        return error.into_response();
    }
    if let Err(error) = state.find_instance(&instance_id).await {
        return error.into_response();
    }
    let response = state.manager.pairing_status(&instance_id, session_id.trim());
    (StatusCode::OK, Json(response)).into_response()
}

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miau_session::{
    MediaKind, SendMediaRequest, SendResult, SendTextRequest, StatusMediaRequest,
    StatusTextRequest,
};

use super::types::{
    ConversationBody, GatewayApiError, MessageKey, SendAudioBody, SendMediaBody,
    SendMessageResponse, SendTextBody, StatusBroadcastResponse, StatusMediaBody, StatusTextBody,
};
use super::{parse_gateway_json_body, require_field, GatewayServerState};

fn message_type(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "imageMessage",
        MediaKind::Video => "videoMessage",
        MediaKind::Audio => "audioMessage",
        MediaKind::Document => "documentMessage",
    }
}

fn sent_message_response(
    instance_id: String,
    number: String,
    result: SendResult,
    message_type: &'static str,
    conversation: Option<String>,
) -> Response {
    (
        StatusCode::OK,
        Json(SendMessageResponse {
            key: MessageKey {
                remote_jid: number,
                from_me: true,
                id: result.id,
            },
            status: "sent",
            message: conversation.map(|conversation| ConversationBody { conversation }),
            message_type,
            message_timestamp: result.created_at.timestamp(),
            instance_id,
        }),
    )
        .into_response()
}

fn status_broadcast_response(
    instance_id: String,
    result: SendResult,
    message_type: &'static str,
) -> Response {
    (
        StatusCode::OK,
        Json(StatusBroadcastResponse {
            id: result.id,
            created_at: result.created_at.timestamp(),
            instance_id,
            message_type,
            status: "sent",
        }),
    )
        .into_response()
}

pub(super) async fn handle_send_text(
    State(state): State<Arc<GatewayServerState>>,
    Path(instance_id): Path<String>,
    body: Bytes,
) -> Response {
    let request = match parse_gateway_json_body::<SendTextBody>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    if let Err(error) = require_field(&request.number, "number")
        .and_then(|()| require_field(&request.text, "text"))
    {
        return error.into_response();
    }

    let number = request.number.clone();
    let text = request.text.clone();
    let send = SendTextRequest {
        number: request.number,
        text: request.text,
        delay_ms: request.delay,
        quoted: request.quoted.and_then(|quoted| quoted.into_quoted()),
    };
    match state.manager.send_text(&instance_id, send).await {
        Ok(result) => {
            sent_message_response(instance_id, number, result, "conversation", Some(text))
        }
        Err(error) => GatewayApiError::from_session("failed to send text", error).into_response(),
    }
}

pub(super) async fn handle_send_audio(
    State(state): State<Arc<GatewayServerState>>,
    Path(instance_id): Path<String>,
    body: Bytes,
) -> Response {
    let request = match parse_gateway_json_body::<SendAudioBody>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    if let Err(error) = require_field(&request.number, "number")
        .and_then(|()| require_field(&request.audio, "audio"))
    {
        return error.into_response();
    }

    let number = request.number.clone();
    let send = SendMediaRequest {
        number: request.number,
        media_url: request.audio,
        view_once: request.view_once,
        delay_ms: request.delay,
        quoted: request.quoted.and_then(|quoted| quoted.into_quoted()),
        ..SendMediaRequest::default()
    };
    send_media(&state, instance_id, number, MediaKind::Audio, send).await
}

pub(super) async fn handle_send_image(
    state: State<Arc<GatewayServerState>>,
    path: Path<String>,
    body: Bytes,
) -> Response {
    handle_typed_media(state, path, body, MediaKind::Image).await
}

pub(super) async fn handle_send_video(
    state: State<Arc<GatewayServerState>>,
    path: Path<String>,
    body: Bytes,
) -> Response {
    handle_typed_media(state, path, body, MediaKind::Video).await
}

pub(super) async fn handle_send_document(
    state: State<Arc<GatewayServerState>>,
    path: Path<String>,
    body: Bytes,
) -> Response {
    handle_typed_media(state, path, body, MediaKind::Document).await
}

/// Generic media route: `mediatype` picks the kind; images are always sent as PNG.
pub(super) async fn handle_send_media(
    State(state): State<Arc<GatewayServerState>>,
    Path(instance_id): Path<String>,
    body: Bytes,
) -> Response {
    let request = match parse_media_body(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    let (kind, mimetype) = match request.mediatype.trim() {
        "image" => (MediaKind::Image, Some("image/png".to_string())),
        "video" => (MediaKind::Video, request.mimetype.clone()),
        _ => (MediaKind::Document, request.mimetype.clone()),
    };
    let number = request.number.clone();
    let send = media_request(request, mimetype);
    send_media(&state, instance_id, number, kind, send).await
}

async fn handle_typed_media(
    State(state): State<Arc<GatewayServerState>>,
    Path(instance_id): Path<String>,
    body: Bytes,
    kind: MediaKind,
) -> Response {
    let request = match parse_media_body(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    let number = request.number.clone();
    let mimetype = request.mimetype.clone();
    let send = media_request(request, mimetype);
    send_media(&state, instance_id, number, kind, send).await
}

fn parse_media_body(body: &Bytes) -> Result<SendMediaBody, GatewayApiError> {
    let request = parse_gateway_json_body::<SendMediaBody>(body)?;
    require_field(&request.number, "number")?;
    require_field(&request.media, "media")?;
    Ok(request)
}

fn media_request(request: SendMediaBody, mimetype: Option<String>) -> SendMediaRequest {
    SendMediaRequest {
        number: request.number,
        media_url: request.media,
        mimetype,
        caption: request.caption,
        file_name: request.file_name,
        view_once: request.view_once,
        delay_ms: request.delay,
        quoted: request.quoted.and_then(|quoted| quoted.into_quoted()),
    }
}

async fn send_media(
    state: &GatewayServerState,
    instance_id: String,
    number: String,
    kind: MediaKind,
    request: SendMediaRequest,
) -> Response {
    match state.manager.send_media(&instance_id, kind, request).await {
        Ok(result) => sent_message_response(instance_id, number, result, message_type(kind), None),
        Err(error) => {
            GatewayApiError::from_session("failed to send media", error).into_response()
        }
    }
}

pub(super) async fn handle_status_text(
    State(state): State<Arc<GatewayServerState>>,
    Path(instance_id): Path<String>,
    body: Bytes,
) -> Response {
    let request = match parse_gateway_json_body::<StatusTextBody>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    if let Err(error) = require_field(&request.text, "text") {
        return error.into_response();
    }
    let post = StatusTextRequest {
        text: request.text,
        background: request.background,
        font: request.font,
    };
    match state.manager.post_status_text(&instance_id, post).await {
        Ok(result) => status_broadcast_response(instance_id, result, "text"),
        Err(error) => {
            GatewayApiError::from_session("failed to post text status", error).into_response()
        }
    }
}

pub(super) async fn handle_status_image(
    state: State<Arc<GatewayServerState>>,
    path: Path<String>,
    body: Bytes,
) -> Response {
    handle_status_media(state, path, body, MediaKind::Image).await
}

pub(super) async fn handle_status_video(
    state: State<Arc<GatewayServerState>>,
    path: Path<String>,
    body: Bytes,
) -> Response {
    handle_status_media(state, path, body, MediaKind::Video).await
}

pub(super) async fn handle_status_audio(
    state: State<Arc<GatewayServerState>>,
    path: Path<String>,
    body: Bytes,
) -> Response {
    handle_status_media(state, path, body, MediaKind::Audio).await
}

async fn handle_status_media(
    State(state): State<Arc<GatewayServerState>>,
    Path(instance_id): Path<String>,
    body: Bytes,
    kind: MediaKind,
) -> Response {
    let request = match parse_gateway_json_body::<StatusMediaBody>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    if let Err(error) = require_field(&request.media, "media") {
        return error.into_response();
    }
    let post = StatusMediaRequest {
        media_url: request.media,
        caption: request.caption,
        mimetype: request.mimetype,
    };
    match state.manager.post_status_media(&instance_id, kind, post).await {
        Ok(result) => status_broadcast_response(instance_id, result, kind.as_str()),
        Err(error) => {
            GatewayApiError::from_session("failed to post media status", error).into_response()
        }
    }
}

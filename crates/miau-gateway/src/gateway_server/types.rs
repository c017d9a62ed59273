//! Request/response bodies and the JSON error envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miau_session::{Instance, QuotedMessage, RepositoryError, SessionError};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug)]
pub(super) struct GatewayApiError {
    pub(super) status: StatusCode,
    pub(super) code: &'static str,
    pub(super) message: String,
}

impl GatewayApiError {
    pub(super) fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub(super) fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub(super) fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "malformed_json", message)
    }

    pub(super) fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid apikey header",
        )
    }

    pub(super) fn instance_not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "instance_not_found", "instance not found")
    }

    pub(super) fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    /// Maps a manager failure; `context` prefixes server-side causes.
    pub(super) fn from_session(context: &str, error: SessionError) -> Self {
        match error {
            SessionError::InvalidRecipient(_) => {
                Self::bad_request("invalid_number", format!("invalid number format: {error}"))
            }
            SessionError::Repository(error) => Self::from_repository(context, error),
            SessionError::Media(error) => {
                Self::bad_request("media_unavailable", format!("{context}: {error}"))
            }
            error if error.is_not_found() => {
                Self::new(StatusCode::NOT_FOUND, "instance_not_found", error.to_string())
            }
            error => Self::internal("upstream_failure", format!("{context}: {error}")),
        }
    }

    pub(super) fn from_repository(context: &str, error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound(_) => Self::instance_not_found(),
            RepositoryError::AlreadyExists(_) => {
                Self::new(StatusCode::CONFLICT, "instance_exists", error.to_string())
            }
            RepositoryError::EmptyId => Self::bad_request("invalid_request", error.to_string()),
            error => Self::internal("repository_failure", format!("{context}: {error}")),
        }
    }
}

impl IntoResponse for GatewayApiError {
    fn into_response(self) -> Response {
        let error_type = if self.status.is_client_error() {
            "invalid_request_error"
        } else {
            "server_error"
        };
        (
            self.status,
            Json(json!({
                "error": {
                    "type": error_type,
                    "code": self.code,
                    "message": self.message,
                }
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WebhookBody {
    #[serde(default)]
    pub(super) url: Option<String>,
    #[serde(default)]
    pub(super) base64: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateInstanceRequest {
    #[serde(default)]
    pub(super) id: Option<String>,
    #[serde(default)]
    pub(super) instance_name: Option<String>,
    #[serde(default)]
    pub(super) webhook: Option<WebhookBody>,
    #[serde(default)]
    pub(super) auto_read_messages: Option<bool>,
    #[serde(default)]
    pub(super) read_delay: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct UpdateInstanceRequest {
    #[serde(default)]
    pub(super) webhook: WebhookBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct UpdateReadSettingsRequest {
    pub(super) auto_read_messages: bool,
    pub(super) read_delay: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ListInstancesQuery {
    #[serde(default)]
    pub(super) instance_name: Option<String>,
    #[serde(default)]
    pub(super) id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ListInstancesRow {
    #[serde(flatten)]
    pub(super) instance: Instance,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub(super) owner_jid: String,
    pub(super) status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ConnectInstanceResponse {
    pub(super) message: String,
    pub(super) connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) base64: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct InstanceStateCompat {
    pub(super) instance_name: String,
    pub(super) state: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StatusInstanceResponse {
    pub(super) id: String,
    pub(super) state: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub(super) remote_jid: String,
    pub(super) instance: InstanceStateCompat,
}

#[derive(Debug, Serialize)]
pub(super) struct MessageResponse {
    pub(super) message: String,
}

impl MessageResponse {
    pub(super) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StartPairingBody {
    #[serde(default)]
    pub(super) phone_number: String,
    #[serde(default)]
    pub(super) client_type: String,
    #[serde(default)]
    pub(super) client_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PairingStatusQuery {
    #[serde(default)]
    pub(super) session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct QuotedKeyBody {
    #[serde(default)]
    pub(super) id: String,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct QuotedMessageBody {
    #[serde(default)]
    pub(super) conversation: String,
}

/// Evolution-style quote: `{ key: { id }, message: { conversation } }`.
#[derive(Debug, Default, Deserialize)]
pub(super) struct QuotedBody {
    #[serde(default)]
    pub(super) key: QuotedKeyBody,
    #[serde(default)]
    pub(super) message: QuotedMessageBody,
}

impl QuotedBody {
    /// Quotes need both an id and the quoted text; partial ones are dropped.
    pub(super) fn into_quoted(self) -> Option<QuotedMessage> {
        if self.key.id.is_empty() || self.message.conversation.is_empty() {
            return None;
        }
        Some(QuotedMessage {
            message_id: self.key.id,
            conversation: self.message.conversation,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SendTextBody {
    #[serde(default)]
    pub(super) number: String,
    #[serde(default)]
    pub(super) text: String,
    #[serde(default)]
    pub(super) delay: u64,
    #[serde(default)]
    pub(super) quoted: Option<QuotedBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SendAudioBody {
    #[serde(default)]
    pub(super) number: String,
    #[serde(default)]
    pub(super) audio: String,
    #[serde(default)]
    pub(super) delay: u64,
    #[serde(default)]
    pub(super) view_once: bool,
    #[serde(default)]
    pub(super) quoted: Option<QuotedBody>,
}

/// Body shared by image, video, document and the generic media route.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SendMediaBody {
    #[serde(default)]
    pub(super) number: String,
    #[serde(default)]
    pub(super) media: String,
    #[serde(default)]
    pub(super) mediatype: String,
    #[serde(default)]
    pub(super) mimetype: Option<String>,
    #[serde(default)]
    pub(super) caption: Option<String>,
    #[serde(default)]
    pub(super) file_name: Option<String>,
    #[serde(default)]
    pub(super) view_once: bool,
    #[serde(default)]
    pub(super) delay: u64,
    #[serde(default)]
    pub(super) quoted: Option<QuotedBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct MessageKey {
    pub(super) remote_jid: String,
    pub(super) from_me: bool,
    pub(super) id: String,
}

#[derive(Debug, Serialize)]
pub(super) struct ConversationBody {
    pub(super) conversation: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SendMessageResponse {
    pub(super) key: MessageKey,
    pub(super) status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) message: Option<ConversationBody>,
    pub(super) message_type: &'static str,
    pub(super) message_timestamp: i64,
    pub(super) instance_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StatusTextBody {
    #[serde(default)]
    pub(super) text: String,
    #[serde(default)]
    pub(super) background: String,
    #[serde(default)]
    pub(super) font: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StatusMediaBody {
    #[serde(default)]
    pub(super) media: String,
    #[serde(default)]
    pub(super) caption: Option<String>,
    #[serde(default)]
    pub(super) mimetype: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StatusBroadcastResponse {
    pub(super) id: String,
    pub(super) created_at: i64,
    pub(super) instance_id: String,
    pub(super) message_type: &'static str,
    pub(super) status: &'static str,
}

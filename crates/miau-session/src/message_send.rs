//! Outbound chat messages and status broadcasts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::jid::{number_to_jid, parse_background_color, STATUS_BROADCAST_JID};
use crate::presence_dispatch::MessageKind;
use crate::protocol_client::{
    MediaContent, MediaKind, MessageContent, QuotedMessage, SendReceipt, TextContent,
};
use crate::session_error::SessionError;
use crate::session_manager::SessionManager;

/// Mimetype assumed when the caller does not name one.
pub fn fallback_mimetype(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "image/jpeg",
        MediaKind::Video => "video/mp4",
        MediaKind::Audio => "audio/ogg; codecs=opus",
        MediaKind::Document => "application/octet-stream",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub id: String,
    /// Recipient address the message went to.
    pub remote_jid: String,
    pub created_at: DateTime<Utc>,
}

impl SendResult {
    fn from_receipt(remote_jid: String, receipt: SendReceipt) -> Self {
        Self {
            id: receipt.id,
            remote_jid,
            created_at: receipt.timestamp,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendTextRequest {
    pub number: String,
    pub text: String,
    pub delay_ms: u64,
    pub quoted: Option<QuotedMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendMediaRequest {
    pub number: String,
    pub media_url: String,
    pub mimetype: Option<String>,
    pub caption: Option<String>,
    pub file_name: Option<String>,
    pub view_once: bool,
    pub delay_ms: u64,
    pub quoted: Option<QuotedMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusTextRequest {
    pub text: String,
    /// `#RRGGBB` or `AARRGGBB`; blank means opaque white.
    pub background: String,
    pub font: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusMediaRequest {
    pub media_url: String,
    pub caption: Option<String>,
    pub mimetype: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

impl SessionManager {
    pub async fn send_text(
        &self,
        instance_id: &str,
        request: SendTextRequest,
    ) -> Result<SendResult, SessionError> {
        let remote_jid = number_to_jid(&request.number)?;
        let content = MessageContent::Text(TextContent {
            text: request.text,
            quoted: request.quoted,
            background_argb: None,
            font: None,
        });
        let receipt = self
            .dispatch(
                instance_id,
                &remote_jid,
                MessageKind::Text,
                request.delay_ms,
                || self.deliver(instance_id, &remote_jid, content),
            )
            .await?;
        Ok(SendResult::from_receipt(remote_jid, receipt))
    }

    /// Fetches, uploads and sends one media message of `kind`.
    ///
    /// The download and upload run after the presence delay, right before
    /// the send.
    pub async fn send_media(
        &self,
        instance_id: &str,
        kind: MediaKind,
        request: SendMediaRequest,
    ) -> Result<SendResult, SessionError> {
        let remote_jid = number_to_jid(&request.number)?;
        let delay_ms = request.delay_ms;
        let receipt = self
            .dispatch(instance_id, &remote_jid, kind.into(), delay_ms, || async {
                let content = self
                    .build_media_content(
                        instance_id,
                        kind,
                        &request.media_url,
                        MediaMeta {
                            mimetype: request.mimetype,
                            caption: request.caption,
                            file_name: request.file_name,
                            view_once: request.view_once,
                            quoted: request.quoted,
                        },
                    )
                    .await?;
                self.deliver(instance_id, &remote_jid, content).await
            })
            .await?;
        Ok(SendResult::from_receipt(remote_jid, receipt))
    }

    /// Posts a text status with an ARGB background to the status feed.
    pub async fn post_status_text(
        &self,
        instance_id: &str,
        request: StatusTextRequest,
    ) -> Result<SendResult, SessionError> {
        let content = MessageContent::Text(TextContent {
            text: request.text,
            quoted: None,
            background_argb: Some(parse_background_color(&request.background)),
            font: non_blank(request.font),
        });
        let receipt = self
            .deliver(instance_id, STATUS_BROADCAST_JID, content)
            .await?;
        Ok(SendResult::from_receipt(
            STATUS_BROADCAST_JID.to_string(),
            receipt,
        ))
    }

    pub async fn post_status_media(
        &self,
        instance_id: &str,
        kind: MediaKind,
        request: StatusMediaRequest,
    ) -> Result<SendResult, SessionError> {
        let caption = match kind {
            MediaKind::Audio => None,
            _ => request.caption,
        };
        let content = self
            .build_media_content(
                instance_id,
                kind,
                &request.media_url,
                MediaMeta {
                    mimetype: request.mimetype,
                    caption,
                    file_name: None,
                    view_once: false,
                    quoted: None,
                },
            )
            .await?;
        let receipt = self
            .deliver(instance_id, STATUS_BROADCAST_JID, content)
            .await?;
        Ok(SendResult::from_receipt(
            STATUS_BROADCAST_JID.to_string(),
            receipt,
        ))
    }

    async fn build_media_content(
        &self,
        instance_id: &str,
        kind: MediaKind,
        media_url: &str,
        meta: MediaMeta,
    ) -> Result<MessageContent, SessionError> {
        let client = self.attached_client(instance_id)?;
        let bytes = self.media_fetcher().fetch(media_url).await?;
        let media = client
            .upload(bytes, kind)
            .await
            .map_err(SessionError::upstream("upload media"))?;
        let content = MediaContent {
            media,
            mimetype: non_blank(meta.mimetype)
                .unwrap_or_else(|| fallback_mimetype(kind).to_string()),
            caption: non_blank(meta.caption),
            file_name: non_blank(meta.file_name),
            view_once: meta.view_once,
            ptt: kind == MediaKind::Audio,
            quoted: meta.quoted,
        };
        Ok(match kind {
            MediaKind::Image => MessageContent::Image(content),
            MediaKind::Video => MessageContent::Video(content),
            MediaKind::Audio => MessageContent::Audio(content),
            MediaKind::Document => MessageContent::Document(content),
        })
    }

    async fn deliver(
        &self,
        instance_id: &str,
        remote_jid: &str,
        content: MessageContent,
    ) -> Result<SendReceipt, SessionError> {
        let client = self.attached_client(instance_id)?;
        let kind = content.kind_label();
        let receipt = client
            .send_message(remote_jid, content)
            .await
            .map_err(SessionError::upstream("send message"))?;
        info!(
            instance = instance_id,
            remote_jid,
            kind,
            message_id = %receipt.id,
            "message sent"
        );
        Ok(receipt)
    }
}

struct MediaMeta {
    mimetype: Option<String>,
    caption: Option<String>,
    file_name: Option<String>,
    view_once: bool,
    quoted: Option<QuotedMessage>,
}

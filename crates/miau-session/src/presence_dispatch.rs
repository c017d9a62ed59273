//! Presence-simulated dispatch: announce "composing", wait, then send.

use std::future::Future;
use std::time::Duration;

use miau_core::duration_to_millis;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::protocol_client::{ChatPresence, ChatPresenceMedia, MediaKind};
use crate::session_error::SessionError;
use crate::session_manager::SessionManager;

const DEFAULT_TEXT_DELAY_MS: u64 = 6_000;
const DEFAULT_AUDIO_DELAY_MS: u64 = 12_000;
const DEFAULT_VISUAL_MEDIA_DELAY_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Audio,
    Image,
    Video,
    Document,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Video => "video",
            Self::Document => "document",
        }
    }
}

impl From<MediaKind> for MessageKind {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Image => Self::Image,
            MediaKind::Video => Self::Video,
            MediaKind::Audio => Self::Audio,
            MediaKind::Document => Self::Document,
        }
    }
}

/// Typing-simulation settings applied before each outbound send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceDelays {
    /// When false no presence is announced and only caller delays apply.
    pub enabled: bool,
    pub text_ms: u64,
    pub audio_ms: u64,
    /// Image and video.
    pub visual_media_ms: u64,
}

impl Default for PresenceDelays {
    fn default() -> Self {
        Self {
            enabled: true,
            text_ms: DEFAULT_TEXT_DELAY_MS,
            audio_ms: DEFAULT_AUDIO_DELAY_MS,
            visual_media_ms: DEFAULT_VISUAL_MEDIA_DELAY_MS,
        }
    }
}

impl PresenceDelays {
    /// Presence variant to announce, or `None` when the kind sends silently.
    pub fn presence_media(&self, kind: MessageKind) -> Option<ChatPresenceMedia> {
        if !self.enabled {
            return None;
        }
        match kind {
            MessageKind::Document => None,
            MessageKind::Audio => Some(ChatPresenceMedia::Audio),
            MessageKind::Text | MessageKind::Image | MessageKind::Video => {
                Some(ChatPresenceMedia::Text)
            }
        }
    }

    /// Wait after a successful announcement; nonzero caller values win.
    pub fn delay_for(&self, kind: MessageKind, requested_ms: u64) -> Duration {
        if requested_ms > 0 {
            return Duration::from_millis(requested_ms);
        }
        Duration::from_millis(match kind {
            MessageKind::Text => self.text_ms,
            MessageKind::Audio => self.audio_ms,
            MessageKind::Image | MessageKind::Video => self.visual_media_ms,
            MessageKind::Document => 0,
        })
    }
}

impl SessionManager {
    /// Sequences presence and delay around a single `send` attempt.
    ///
    /// A failed announcement is logged and the send goes out immediately.
    /// The send result is returned untouched and never retried.
    pub async fn dispatch<T, F, Fut>(
        &self,
        instance_id: &str,
        remote_jid: &str,
        kind: MessageKind,
        requested_delay_ms: u64,
        send: F,
    ) -> Result<T, SessionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SessionError>>,
    {
        let delays = self.presence_delays();
        let delay = match delays.presence_media(kind) {
            None => Some(Duration::from_millis(requested_delay_ms)),
            Some(media) => match self.announce_composing(instance_id, remote_jid, media).await {
                Ok(()) => Some(delays.delay_for(kind, requested_delay_ms)),
                Err(error) => {
                    warn!(
                        instance = instance_id,
                        remote_jid,
                        kind = kind.as_str(),
                        %error,
                        "presence announcement failed, sending without delay"
                    );
                    None
                }
            },
        };

        if let Some(delay) = delay.filter(|delay| !delay.is_zero()) {
            debug!(
                instance = instance_id,
                kind = kind.as_str(),
                delay_ms = duration_to_millis(delay),
                "delaying send"
            );
            tokio::time::sleep(delay).await;
        }
        send().await
    }

    async fn announce_composing(
        &self,
        instance_id: &str,
        remote_jid: &str,
        media: ChatPresenceMedia,
    ) -> Result<(), SessionError> {
        let client = self.attached_client(instance_id)?;
        client
            .send_chat_presence(remote_jid, ChatPresence::Composing, media)
            .await
            .map_err(SessionError::upstream("chat presence"))
    }
}

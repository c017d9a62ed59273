//! Protocol client capability consumed by the session manager.
//!
//! The messaging wire protocol (handshake, encryption, multi-device sync) is
//! not implemented here. Concrete clients plug in through [`ProtocolClient`]
//! and are minted per instance by a [`ProtocolClientFactory`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by a protocol client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("client is not connected")]
    NotConnected,
    #[error("client is not logged in")]
    NotLoggedIn,
    #[error("{operation} rejected: {detail}")]
    Rejected {
        operation: &'static str,
        detail: String,
    },
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Companion browser announced to the phone while pairing by code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairClientType {
    Chrome,
    Firefox,
    Safari,
    Edge,
}

impl PairClientType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Firefox => "firefox",
            Self::Safari => "safari",
            Self::Edge => "edge",
        }
    }

    /// Case-insensitive lookup; anything unrecognized pairs as Chrome.
    pub fn from_name_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "firefox" => Self::Firefox,
            "safari" => Self::Safari,
            "edge" => Self::Edge,
            _ => Self::Chrome,
        }
    }

    pub fn default_client_name(self) -> &'static str {
        match self {
            Self::Chrome => "Chrome (Windows)",
            Self::Firefox => "Firefox (Windows)",
            Self::Safari => "Safari (macOS)",
            Self::Edge => "Edge (Windows)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatPresence {
    Composing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatPresenceMedia {
    Text,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }
}

/// Upload descriptor returned by the protocol media servers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedMedia {
    pub url: String,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
}

/// Message being replied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotedMessage {
    pub message_id: String,
    pub conversation: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextContent {
    pub text: String,
    pub quoted: Option<QuotedMessage>,
    /// ARGB background, only meaningful for status broadcasts.
    pub background_argb: Option<u32>,
    pub font: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaContent {
    pub media: UploadedMedia,
    pub mimetype: String,
    pub caption: Option<String>,
    pub file_name: Option<String>,
    pub view_once: bool,
    /// Voice-note flag for audio.
    pub ptt: bool,
    pub quoted: Option<QuotedMessage>,
}

/// Outbound payload handed to [`ProtocolClient::send_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(TextContent),
    Image(MediaContent),
    Video(MediaContent),
    Audio(MediaContent),
    Document(MediaContent),
}

impl MessageContent {
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Image(_) => "image",
            Self::Video(_) => "video",
            Self::Audio(_) => "audio",
            Self::Document(_) => "document",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

/// Capability surface of one live protocol session.
///
/// Predicates (`is_connected`, `is_logged_in`) must answer from locally cached
/// state without network calls; the status resolver calls them per row.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn connect(&self) -> Result<(), ProtocolError>;
    fn disconnect(&self);
    async fn logout(&self) -> Result<(), ProtocolError>;
    fn is_connected(&self) -> bool;
    fn is_logged_in(&self) -> bool;
    async fn pair_phone(
        &self,
        phone_number: &str,
        show_push_notification: bool,
        client_type: PairClientType,
        client_name: &str,
    ) -> Result<String, ProtocolError>;
    /// Next QR login payload, or `None` once the device is already paired.
    async fn login_qr_code(&self) -> Result<Option<String>, ProtocolError>;
    async fn send_chat_presence(
        &self,
        remote_jid: &str,
        presence: ChatPresence,
        media: ChatPresenceMedia,
    ) -> Result<(), ProtocolError>;
    async fn send_message(
        &self,
        remote_jid: &str,
        content: MessageContent,
    ) -> Result<SendReceipt, ProtocolError>;
    async fn upload(&self, bytes: Vec<u8>, kind: MediaKind) -> Result<UploadedMedia, ProtocolError>;
}

/// Mints a fresh, disconnected client bound to an instance's device identity.
pub trait ProtocolClientFactory: Send + Sync {
    fn new_client(&self, instance_id: &str) -> Arc<dyn ProtocolClient>;
}

const PAIRING_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTVWXYZ123456789";

/// Offline client that never touches the network.
///
/// Codes and receipts are synthesized locally. With `auto_login` the client
/// reports a completed login as soon as a pairing or QR code was issued,
/// which stands in for the user confirming on the phone.
#[derive(Debug)]
pub struct DryRunProtocolClient {
    instance_id: String,
    auto_login: bool,
    connected: AtomicBool,
    logged_in: AtomicBool,
    sequence: AtomicU64,
}

impl DryRunProtocolClient {
    pub fn new(instance_id: impl Into<String>, auto_login: bool) -> Self {
        Self {
            instance_id: instance_id.into(),
            auto_login,
            connected: AtomicBool::new(false),
            logged_in: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn set_logged_in(&self, logged_in: bool) {
        self.logged_in.store(logged_in, Ordering::SeqCst);
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn synthesize_code(&self, seed: &str) -> String {
        // FNV-1a over the seed, then base-32 digits from a confusable-free alphabet.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in seed.bytes().chain(self.next_sequence().to_le_bytes()) {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        let mut code = String::with_capacity(9);
        for index in 0..8 {
            if index == 4 {
                code.push('-');
            }
            let digit = ((hash >> (index * 5)) & 0x1f) as usize;
            code.push(char::from(PAIRING_CODE_ALPHABET[digit]));
        }
        code
    }

    fn require_connected(&self) -> Result<(), ProtocolError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProtocolError::NotConnected)
        }
    }
}

#[async_trait]
impl ProtocolClient for DryRunProtocolClient {
    async fn connect(&self) -> Result<(), ProtocolError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn logout(&self) -> Result<(), ProtocolError> {
        if !self.logged_in.swap(false, Ordering::SeqCst) {
            return Err(ProtocolError::NotLoggedIn);
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    async fn pair_phone(
        &self,
        phone_number: &str,
        _show_push_notification: bool,
        client_type: PairClientType,
        _client_name: &str,
    ) -> Result<String, ProtocolError> {
        self.require_connected()?;
        let digits: String = phone_number.chars().filter(char::is_ascii_digit).collect();
        if digits.len() < 8 {
            return Err(ProtocolError::Rejected {
                operation: "pair phone",
                detail: format!("phone number '{phone_number}' is too short"),
            });
        }
        let code = self.synthesize_code(&format!(
            "{}:{digits}:{}",
            self.instance_id,
            client_type.as_str()
        ));
        if self.auto_login {
            self.set_logged_in(true);
        }
        Ok(code)
    }

    async fn login_qr_code(&self) -> Result<Option<String>, ProtocolError> {
        self.require_connected()?;
        if self.is_logged_in() {
            return Ok(None);
        }
        let payload = format!(
            "2@dry-run,{},{}",
            self.instance_id,
            self.synthesize_code(&self.instance_id)
        );
        if self.auto_login {
            self.set_logged_in(true);
        }
        Ok(Some(payload))
    }

    async fn send_chat_presence(
        &self,
        _remote_jid: &str,
        _presence: ChatPresence,
        _media: ChatPresenceMedia,
    ) -> Result<(), ProtocolError> {
        self.require_connected()
    }

    async fn send_message(
        &self,
        _remote_jid: &str,
        _content: MessageContent,
    ) -> Result<SendReceipt, ProtocolError> {
        self.require_connected()?;
        Ok(SendReceipt {
            id: format!("DRYRUN{:012X}", self.next_sequence()),
            timestamp: Utc::now(),
        })
    }

    async fn upload(&self, bytes: Vec<u8>, kind: MediaKind) -> Result<UploadedMedia, ProtocolError> {
        self.require_connected()?;
        let sequence = self.next_sequence();
        Ok(UploadedMedia {
            url: format!("dry-run://media/{}/{sequence}", kind.as_str()),
            direct_path: format!("/dry-run/{}/{sequence}", kind.as_str()),
            media_key: Vec::new(),
            file_sha256: Vec::new(),
            file_enc_sha256: Vec::new(),
            file_length: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
        })
    }
}

/// Factory for [`DryRunProtocolClient`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunProtocolClientFactory {
    pub auto_login: bool,
}

impl ProtocolClientFactory for DryRunProtocolClientFactory {
    fn new_client(&self, instance_id: &str) -> Arc<dyn ProtocolClient> {
        Arc::new(DryRunProtocolClient::new(instance_id, self.auto_login))
    }
}

//! Scriptable protocol client for manager tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;

use crate::protocol_client::{
    ChatPresence, ChatPresenceMedia, MediaKind, MessageContent, PairClientType, ProtocolClient,
    ProtocolClientFactory, ProtocolError, SendReceipt, UploadedMedia,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PairCall {
    pub phone_number: String,
    pub client_type: PairClientType,
    pub client_name: String,
}

#[derive(Debug, Default)]
pub(crate) struct MockProtocolClient {
    connected: AtomicBool,
    logged_in: AtomicBool,
    fail_pair: AtomicBool,
    fail_qr: AtomicBool,
    fail_presence: AtomicBool,
    fail_send: AtomicBool,
    sends: AtomicUsize,
    pair_calls: Mutex<Vec<PairCall>>,
    events: Mutex<Vec<(Instant, String)>>,
    sent: Mutex<Vec<(String, MessageContent)>>,
    uploads: Mutex<Vec<(usize, MediaKind)>>,
}

impl MockProtocolClient {
    pub fn set_logged_in(&self, logged_in: bool) {
        self.logged_in.store(logged_in, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_pairing(&self) {
        self.fail_pair.store(true, Ordering::SeqCst);
    }

    pub fn fail_qr_code(&self) {
        self.fail_qr.store(true, Ordering::SeqCst);
    }

    pub fn fail_presence(&self) {
        self.fail_presence.store(true, Ordering::SeqCst);
    }

    pub fn fail_send(&self) {
        self.fail_send.store(true, Ordering::SeqCst);
    }

    pub fn pair_calls(&self) -> Vec<PairCall> {
        self.pair_calls.lock().expect("pair calls").clone()
    }

    /// `(when, label)` for every presence update and send, in call order.
    pub fn events(&self) -> Vec<(Instant, String)> {
        self.events.lock().expect("events").clone()
    }

    pub fn event_labels(&self) -> Vec<String> {
        self.events().into_iter().map(|(_, label)| label).collect()
    }

    pub fn sent(&self) -> Vec<(String, MessageContent)> {
        self.sent.lock().expect("sent").clone()
    }

    pub fn uploads(&self) -> Vec<(usize, MediaKind)> {
        self.uploads.lock().expect("uploads").clone()
    }

    fn record(&self, label: String) {
        self.events
            .lock()
            .expect("events")
            .push((Instant::now(), label));
    }
}

#[async_trait]
impl ProtocolClient for MockProtocolClient {
    async fn connect(&self) -> Result<(), ProtocolError> {
        self.set_connected(true);
        Ok(())
    }

    fn disconnect(&self) {
        self.set_connected(false);
    }

    async fn logout(&self) -> Result<(), ProtocolError> {
        if !self.logged_in.swap(false, Ordering::SeqCst) {
            return Err(ProtocolError::NotLoggedIn);
        }
        self.set_connected(false);
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
        client_name: &str,
    ) -> Result<String, ProtocolError> {
        self.pair_calls.lock().expect("pair calls").push(PairCall {
            phone_number: phone_number.to_string(),
            client_type,
            client_name: client_name.to_string(),
        });
        if self.fail_pair.load(Ordering::SeqCst) {
            return Err(ProtocolError::Rejected {
                operation: "pair phone",
                detail: "rate limited".to_string(),
            });
        }
        Ok("ABCD-EFGH".to_string())
    }

    async fn login_qr_code(&self) -> Result<Option<String>, ProtocolError> {
        if self.fail_qr.load(Ordering::SeqCst) {
            return Err(ProtocolError::Transport("qr channel closed".to_string()));
        }
        if self.is_logged_in() {
            return Ok(None);
        }
        Ok(Some("2@mock".to_string()))
    }

    async fn send_chat_presence(
        &self,
        remote_jid: &str,
        presence: ChatPresence,
        media: ChatPresenceMedia,
    ) -> Result<(), ProtocolError> {
        if self.fail_presence.load(Ordering::SeqCst) {
            return Err(ProtocolError::Transport("presence dropped".to_string()));
        }
        self.record(format!("presence:{presence:?}:{media:?}:{remote_jid}"));
        Ok(())
    }

    async fn send_message(
        &self,
        remote_jid: &str,
        content: MessageContent,
    ) -> Result<SendReceipt, ProtocolError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(ProtocolError::Transport("socket closed".to_string()));
        }
        self.record(format!("send:{}:{remote_jid}", content.kind_label()));
        self.sent
            .lock()
            .expect("sent")
            .push((remote_jid.to_string(), content));
        let sequence = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SendReceipt {
            id: format!("MOCK{sequence}"),
            timestamp: Utc::now(),
        })
    }

    async fn upload(&self, bytes: Vec<u8>, kind: MediaKind) -> Result<UploadedMedia, ProtocolError> {
        self.uploads
            .lock()
            .expect("uploads")
            .push((bytes.len(), kind));
        Ok(UploadedMedia {
            url: format!("mock://{}", kind.as_str()),
            direct_path: format!("/mock/{}", kind.as_str()),
            file_length: bytes.len() as u64,
            ..UploadedMedia::default()
        })
    }
}

/// Factory that remembers every client it minted.
#[derive(Debug, Default)]
pub(crate) struct MockClientFactory {
    clients: Mutex<HashMap<String, Arc<MockProtocolClient>>>,
    created: AtomicUsize,
}

impl MockClientFactory {
    /// Latest client minted for `instance_id`; panics if none was.
    pub fn client(&self, instance_id: &str) -> Arc<MockProtocolClient> {
        self.clients
            .lock()
            .expect("clients")
            .get(instance_id)
            .cloned()
            .unwrap_or_else(|| panic!("no client minted for {instance_id}"))
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ProtocolClientFactory for MockClientFactory {
    fn new_client(&self, instance_id: &str) -> Arc<dyn ProtocolClient> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let client = Arc::new(MockProtocolClient::default());
        self.clients
            .lock()
            .expect("clients")
            .insert(instance_id.to_string(), Arc::clone(&client));
        client
    }
}

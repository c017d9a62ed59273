use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use miau_core::compact_utc_stamp;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::instance_registry::{InstanceRegistry, LoginFlow};
use crate::instance_status::{resolve_instance_status, ClientStateSnapshot, InstanceStatus};
use crate::media_fetch::{DisabledMediaFetcher, MediaFetcher};
use crate::pairing_session::{PairingSession, PairingTimings};
use crate::presence_dispatch::PresenceDelays;
use crate::protocol_client::{ProtocolClient, ProtocolClientFactory};
use crate::session_error::SessionError;

/// Result of [`SessionManager::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Device is paired; the socket is up.
    AlreadyConnected,
    /// QR payload to render for a fresh login.
    QrCode(String),
}

/// Builder for [`SessionManager`].
pub struct SessionManagerBuilder {
    factory: Arc<dyn ProtocolClientFactory>,
    clock: Arc<dyn Clock>,
    timings: PairingTimings,
    presence: PresenceDelays,
    media_fetcher: Arc<dyn MediaFetcher>,
}

impl SessionManagerBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn pairing_timings(mut self, timings: PairingTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn presence(mut self, presence: PresenceDelays) -> Self {
        self.presence = presence;
        self
    }

    pub fn media_fetcher(mut self, media_fetcher: Arc<dyn MediaFetcher>) -> Self {
        self.media_fetcher = media_fetcher;
        self
    }

    pub fn build(self) -> Arc<SessionManager> {
        Arc::new(SessionManager {
            registry: InstanceRegistry::new(self.factory),
            sessions: Arc::new(DashMap::new()),
            observers: Arc::new(DashSet::new()),
            clock: self.clock,
            timings: self.timings.normalized(),
            presence: self.presence,
            media_fetcher: self.media_fetcher,
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            session_sequence: AtomicU64::new(0),
        })
    }
}

/// Owner of live clients, pairing sessions and their background tasks.
///
/// Shared behind an `Arc`; every method takes `&self`.
pub struct SessionManager {
    registry: InstanceRegistry,
    sessions: Arc<DashMap<String, PairingSession>>,
    observers: Arc<DashSet<String>>,
    clock: Arc<dyn Clock>,
    timings: PairingTimings,
    presence: PresenceDelays,
    media_fetcher: Arc<dyn MediaFetcher>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
    session_sequence: AtomicU64,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("instances", &self.registry.len())
            .field("pairing_sessions", &self.sessions.len())
            .field("observers", &self.observers.len())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl SessionManager {
    pub fn builder(factory: Arc<dyn ProtocolClientFactory>) -> SessionManagerBuilder {
        SessionManagerBuilder {
            factory,
            clock: Arc::new(SystemClock),
            timings: PairingTimings::default(),
            presence: PresenceDelays::default(),
            media_fetcher: Arc::new(DisabledMediaFetcher),
        }
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Connection status from cached client state; never touches the network.
    pub fn status(&self, instance_id: &str) -> InstanceStatus {
        let snapshot = self.registry.get(instance_id).map(|handle| {
            let client = handle.client();
            ClientStateSnapshot {
                logged_in: client.is_logged_in(),
                connected: client.is_connected(),
                login_flow: handle.login_flow(),
                pending_pairing: self.has_pending_pairing(instance_id),
            }
        });
        resolve_instance_status(snapshot)
    }

    /// Connects the instance's client, starting a QR login when unpaired.
    pub async fn connect(&self, instance_id: &str) -> Result<ConnectOutcome, SessionError> {
        let handle = self.registry.get_or_create(instance_id);
        let client = handle.client();
        if !client.is_connected() {
            client
                .connect()
                .await
                .map_err(SessionError::upstream("connect"))?;
        }
        if client.is_logged_in() {
            debug!(instance = instance_id, "connect: already logged in");
            return Ok(ConnectOutcome::AlreadyConnected);
        }

        handle.set_login_flow(LoginFlow::QrCode);
        match client.login_qr_code().await {
            Ok(Some(code)) => {
                info!(instance = instance_id, "qr login started");
                Ok(ConnectOutcome::QrCode(code))
            }
            Ok(None) => {
                handle.set_login_flow(LoginFlow::None);
                Ok(ConnectOutcome::AlreadyConnected)
            }
            Err(source) => {
                handle.set_login_flow(LoginFlow::None);
                Err(SessionError::Upstream {
                    operation: "qr login",
                    source,
                })
            }
        }
    }

    /// Logs the device out; the handle stays registered.
    pub async fn logout(&self, instance_id: &str) -> Result<(), SessionError> {
        let handle = self
            .registry
            .get(instance_id)
            .ok_or_else(|| SessionError::ClientNotAttached(instance_id.to_string()))?;
        handle
            .client()
            .logout()
            .await
            .map_err(SessionError::upstream("logout"))?;
        handle.set_login_flow(LoginFlow::None);
        info!(instance = instance_id, "instance logged out");
        Ok(())
    }

    /// Drops the instance's handle after closing its socket.
    ///
    /// Returns whether a handle was registered.
    pub fn disconnect(&self, instance_id: &str) -> bool {
        let Some(handle) = self.registry.remove(instance_id) else {
            return false;
        };
        handle.client().disconnect();
        info!(instance = instance_id, "instance disconnected");
        true
    }

    /// Logs out (best effort) and forgets the instance's live client.
    pub async fn teardown(&self, instance_id: &str) {
        if let Some(handle) = self.registry.get(instance_id) {
            if let Err(error) = handle.client().logout().await {
                warn!(instance = instance_id, %error, "logout during teardown failed");
            }
        }
        self.disconnect(instance_id);
    }

    /// Cancels every background task and waits for them to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!(instances = self.registry.len(), "session manager stopped");
    }

    pub fn background_task_count(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn attached_client(
        &self,
        instance_id: &str,
    ) -> Result<Arc<dyn ProtocolClient>, SessionError> {
        self.registry
            .get(instance_id)
            .map(|handle| handle.client())
            .ok_or_else(|| SessionError::ClientNotAttached(instance_id.to_string()))
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn pairing_timings(&self) -> PairingTimings {
        self.timings
    }

    pub(crate) fn presence_delays(&self) -> PresenceDelays {
        self.presence
    }

    pub(crate) fn media_fetcher(&self) -> &dyn MediaFetcher {
        self.media_fetcher.as_ref()
    }

    pub(crate) fn sessions(&self) -> Arc<DashMap<String, PairingSession>> {
        Arc::clone(&self.sessions)
    }

    pub(crate) fn observers(&self) -> Arc<DashSet<String>> {
        Arc::clone(&self.observers)
    }

    pub(crate) fn task_tracker(&self) -> &TaskTracker {
        &self.tasks
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// `pairing_<UTC yyyymmddhhmmss>-<n>`; the suffix keeps same-second ids apart.
    pub(crate) fn next_pairing_session_id(&self) -> String {
        let sequence = self.session_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("pairing_{}-{sequence}", compact_utc_stamp(self.clock.now()))
    }
}

//! Phone-number pairing sessions.
//!
//! A pairing attempt asks the protocol client for a short code the user types
//! on the phone. Each attempt becomes a [`PairingSession`] that moves
//! `pending -> success | expired` exactly once, driven by three writers:
//!
//! - the liveness observer, polling the client's logged-in predicate;
//! - the cleanup task, expiring stale attempts and later reclaiming them;
//! - status reads, which resolve lazily through [`resolve_pairing_status`].
//!
//! Background tasks run on the manager's task tracker and stop early when the
//! manager shuts down.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::clock::saturating_add;
use crate::instance_registry::{InstanceHandle, LoginFlow};
use crate::protocol_client::{PairClientType, ProtocolClient, ProtocolError};
use crate::session_error::SessionError;
use crate::session_manager::SessionManager;

const DEFAULT_PAIRING_WINDOW_SECONDS: u64 = 160;
const DEFAULT_PAIRING_GRACE_SECONDS: u64 = 30;
const DEFAULT_PAIRING_POLL_INTERVAL_MS: u64 = 2_000;
const MIN_PAIRING_POLL_INTERVAL_MS: u64 = 10;
const MAX_PAIRING_TIMER_SECONDS: u64 = 7 * 24 * 60 * 60;

pub const PAIRING_ALREADY_CONNECTED_MESSAGE: &str = "Instance is already connected";
pub const PAIRING_CODE_ISSUED_MESSAGE: &str =
    "Pairing code generated. Check your WhatsApp for notification.";
pub const PAIRING_SESSION_NOT_FOUND_MESSAGE: &str = "Session not found or expired";

/// Timers governing one pairing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingTimings {
    /// Code lifetime; `expires_at = created_at + window`.
    pub window: Duration,
    /// Extra retention after expiry before the record is dropped.
    pub grace: Duration,
    pub poll_interval: Duration,
    pub observer_timeout: Duration,
}

impl Default for PairingTimings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(DEFAULT_PAIRING_WINDOW_SECONDS),
            grace: Duration::from_secs(DEFAULT_PAIRING_GRACE_SECONDS),
            poll_interval: Duration::from_millis(DEFAULT_PAIRING_POLL_INTERVAL_MS),
            observer_timeout: Duration::from_secs(DEFAULT_PAIRING_WINDOW_SECONDS),
        }
    }
}

impl PairingTimings {
    /// Clamps the poll interval so the observer ticker never spins, and caps
    /// every timer at a week.
    pub fn normalized(self) -> Self {
        let cap = Duration::from_secs(MAX_PAIRING_TIMER_SECONDS);
        Self {
            window: self.window.min(cap),
            grace: self.grace.min(cap),
            poll_interval: self
                .poll_interval
                .clamp(Duration::from_millis(MIN_PAIRING_POLL_INTERVAL_MS), cap),
            observer_timeout: self.observer_timeout.min(cap),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingStatus {
    Pending,
    Success,
    Failed,
    Expired,
}

impl PairingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn message(self) -> &'static str {
        pairing_status_message(self.as_str())
    }
}

/// Human-readable text for a raw pairing status label.
pub fn pairing_status_message(status: &str) -> &'static str {
    match status {
        "pending" => "Waiting for user to enter pairing code in WhatsApp",
        "success" => "Pairing successful, client is logged in",
        "failed" => "Pairing failed",
        "expired" => "Pairing code has expired",
        _ => "Unknown status",
    }
}

/// One time-bounded pairing attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingSession {
    pub id: String,
    pub instance_id: String,
    pub phone_number: String,
    pub code: String,
    pub client_type: String,
    pub client_name: String,
    pub status: PairingStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PairingSession {
    /// Moves the session forward; terminal statuses are final.
    ///
    /// Returns whether the stored status changed.
    pub fn advance(&mut self, next: PairingStatus) -> bool {
        if self.status == next || self.status.is_terminal() {
            return false;
        }
        self.status = next;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingResolution {
    pub status: PairingStatus,
    pub message: &'static str,
}

/// Status a read should report for `session` at `now`.
///
/// A logged-in client always reports success; otherwise a session past its
/// expiry reports expired; otherwise the stored status stands.
pub fn resolve_pairing_status(
    session: &PairingSession,
    now: DateTime<Utc>,
    logged_in: bool,
) -> PairingResolution {
    let status = if logged_in {
        PairingStatus::Success
    } else if now > session.expires_at {
        PairingStatus::Expired
    } else {
        session.status
    };
    PairingResolution {
        status,
        message: status.message(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartPairingRequest {
    pub instance_id: String,
    pub phone_number: String,
    /// Browser label; matched case-insensitively, blank means chrome.
    pub client_type: String,
    /// Display name; blank picks the client type's default.
    pub client_name: String,
}

impl StartPairingRequest {
    pub fn new(instance_id: impl Into<String>, phone_number: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            phone_number: phone_number.into(),
            client_type: String::new(),
            client_name: String::new(),
        }
    }

    pub fn with_client(mut self, client_type: impl Into<String>, client_name: impl Into<String>) -> Self {
        self.client_type = client_type.into();
        self.client_name = client_name.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPairingResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl StartPairingResponse {
    fn already_connected() -> Self {
        Self {
            success: false,
            pairing_code: None,
            message: PAIRING_ALREADY_CONNECTED_MESSAGE.to_string(),
            session_id: None,
            expires_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingStatusResponse {
    pub status: PairingStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl PairingStatusResponse {
    fn not_found() -> Self {
        Self {
            status: PairingStatus::Expired,
            message: PAIRING_SESSION_NOT_FOUND_MESSAGE.to_string(),
            session_id: None,
            expires_at: None,
        }
    }
}

/// Membership in the observing set for one instance; dropping it releases the slot.
struct ObserverGuard {
    observers: Arc<DashSet<String>>,
    instance_id: String,
}

impl ObserverGuard {
    fn acquire(observers: Arc<DashSet<String>>, instance_id: &str) -> Option<Self> {
        if !observers.insert(instance_id.to_string()) {
            return None;
        }
        Some(Self {
            observers,
            instance_id: instance_id.to_string(),
        })
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.observers.remove(&self.instance_id);
    }
}

fn advance_stored_session(
    sessions: &DashMap<String, PairingSession>,
    session_id: &str,
    next: PairingStatus,
) -> bool {
    sessions
        .get_mut(session_id)
        .is_some_and(|mut session| session.advance(next))
}

async fn sleep_unless_cancelled(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

async fn observe_pairing(
    guard: ObserverGuard,
    client: Arc<dyn ProtocolClient>,
    sessions: Arc<DashMap<String, PairingSession>>,
    session_id: String,
    timings: PairingTimings,
    shutdown: CancellationToken,
) {
    let deadline = tokio::time::sleep(timings.observer_timeout);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + timings.poll_interval,
        timings.poll_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!(instance = %guard.instance_id, session_id, "pairing observer cancelled");
                break;
            }
            _ = &mut deadline => {
                info!(instance = %guard.instance_id, session_id, "pairing observer timed out");
                break;
            }
            _ = ticker.tick() => {
                if client.is_logged_in() {
                    if advance_stored_session(&sessions, &session_id, PairingStatus::Success) {
                        info!(instance = %guard.instance_id, session_id, "pairing observer saw login");
                    }
                    break;
                }
            }
        }
    }
    drop(guard);
}

async fn expire_then_reclaim(
    sessions: Arc<DashMap<String, PairingSession>>,
    session_id: String,
    timings: PairingTimings,
    shutdown: CancellationToken,
) {
    if !sleep_unless_cancelled(timings.window, &shutdown).await {
        return;
    }
    if advance_stored_session(&sessions, &session_id, PairingStatus::Expired) {
        info!(session_id, "pairing session expired");
    }
    if !sleep_unless_cancelled(timings.grace, &shutdown).await {
        return;
    }
    if sessions.remove(&session_id).is_some() {
        debug!(session_id, "pairing session reclaimed");
    }
}

impl SessionManager {
    /// Requests a pairing code for `instance_id` and tracks the attempt.
    ///
    /// An instance that is already logged in answers with `success = false`
    /// instead of an error. Code generation failures leave no session behind.
    pub async fn start_pairing(
        &self,
        request: StartPairingRequest,
    ) -> Result<StartPairingResponse, SessionError> {
        let StartPairingRequest {
            instance_id,
            phone_number,
            client_type,
            client_name,
        } = request;

        if self
            .registry()
            .get(&instance_id)
            .is_some_and(|handle| handle.client().is_logged_in())
        {
            info!(instance = %instance_id, "pairing skipped, instance already connected");
            return Ok(StartPairingResponse::already_connected());
        }

        let pair_client_type = PairClientType::from_name_lenient(&client_type);
        let client_name = match client_name.trim() {
            "" => pair_client_type.default_client_name().to_string(),
            name => name.to_string(),
        };
        let session_id = self.next_pairing_session_id();

        let handle = self.registry().get_or_create(&instance_id);
        let code = match request_pairing_code(&handle, &phone_number, pair_client_type, &client_name)
            .await
        {
            Ok(code) => code,
            Err(source) => {
                handle.set_login_flow(LoginFlow::None);
                error!(
                    instance = %instance_id,
                    phone = %phone_number,
                    error = %source,
                    "failed to generate pairing code"
                );
                return Err(SessionError::CodeGenerationFailed { source });
            }
        };

        let timings = self.pairing_timings();
        let created_at = self.now();
        let expires_at = saturating_add(created_at, timings.window);
        self.sessions().insert(
            session_id.clone(),
            PairingSession {
                id: session_id.clone(),
                instance_id: instance_id.clone(),
                phone_number: phone_number.clone(),
                code: code.clone(),
                client_type,
                client_name,
                status: PairingStatus::Pending,
                created_at,
                expires_at,
            },
        );

        self.spawn_pairing_observer(&handle, &session_id);
        self.spawn_pairing_cleanup(&session_id);

        info!(
            instance = %instance_id,
            phone = %phone_number,
            session_id,
            code,
            "pairing started"
        );
        Ok(StartPairingResponse {
            success: true,
            pairing_code: Some(code),
            message: PAIRING_CODE_ISSUED_MESSAGE.to_string(),
            session_id: Some(session_id),
            expires_at: Some(expires_at.timestamp()),
        })
    }

    /// Reports a session's status, resolving success/expiry lazily.
    ///
    /// Unknown sessions, including ones already reclaimed or owned by another
    /// instance, read as expired rather than failing.
    pub fn pairing_status(&self, instance_id: &str, session_id: &str) -> PairingStatusResponse {
        let logged_in = self
            .registry()
            .get(instance_id)
            .is_some_and(|handle| handle.client().is_logged_in());
        let now = self.now();

        let sessions = self.sessions();
        let Some(mut session) = sessions.get_mut(session_id) else {
            return PairingStatusResponse::not_found();
        };
        if session.instance_id != instance_id {
            return PairingStatusResponse::not_found();
        }

        let resolution = resolve_pairing_status(&session, now, logged_in);
        if session.advance(resolution.status) {
            info!(
                instance = instance_id,
                session_id,
                status = resolution.status.as_str(),
                "pairing session resolved on read"
            );
        }
        PairingStatusResponse {
            status: resolution.status,
            message: resolution.message.to_string(),
            session_id: Some(session_id.to_string()),
            expires_at: Some(session.expires_at.timestamp()),
        }
    }

    /// Copy of a stored session, if it has not been reclaimed yet.
    pub fn pairing_session(&self, session_id: &str) -> Option<PairingSession> {
        self.sessions()
            .get(session_id)
            .map(|session| session.value().clone())
    }

    pub fn is_observing(&self, instance_id: &str) -> bool {
        self.observers().contains(instance_id)
    }

    pub(crate) fn has_pending_pairing(&self, instance_id: &str) -> bool {
        let now = self.now();
        self.sessions().iter().any(|session| {
            session.instance_id == instance_id
                && session.status == PairingStatus::Pending
                && now <= session.expires_at
        })
    }

    fn spawn_pairing_observer(&self, handle: &InstanceHandle, session_id: &str) {
        let Some(guard) = ObserverGuard::acquire(self.observers(), handle.instance_id()) else {
            debug!(
                instance = handle.instance_id(),
                session_id, "pairing observer already active"
            );
            return;
        };
        self.task_tracker().spawn(observe_pairing(
            guard,
            handle.client(),
            self.sessions(),
            session_id.to_string(),
            self.pairing_timings(),
            self.shutdown_token(),
        ));
    }

    fn spawn_pairing_cleanup(&self, session_id: &str) {
        self.task_tracker().spawn(expire_then_reclaim(
            self.sessions(),
            session_id.to_string(),
            self.pairing_timings(),
            self.shutdown_token(),
        ));
    }
}

async fn request_pairing_code(
    handle: &InstanceHandle,
    phone_number: &str,
    client_type: PairClientType,
    client_name: &str,
) -> Result<String, ProtocolError> {
    handle.set_login_flow(LoginFlow::Pairing);
    let client = handle.client();
    if !client.is_connected() {
        client.connect().await?;
    }
    let code = client
        .pair_phone(phone_number, true, client_type, client_name)
        .await?;
    debug!(
        instance = handle.instance_id(),
        client_type = client_type.as_str(),
        "pairing code generated"
    );
    Ok(code)
}

//! Connection status resolution from locally cached client state.

use serde::{Deserialize, Serialize};

use crate::instance_registry::LoginFlow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Enumerates supported `InstanceStatus` values.
pub enum InstanceStatus {
    Open,
    Connecting,
    QrCode,
    Pairing,
    PairingPending,
    Closed,
}

impl InstanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Connecting => "connecting",
            Self::QrCode => "qr-code",
            Self::Pairing => "pairing",
            Self::PairingPending => "pairing-pending",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicate snapshot of one registered handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientStateSnapshot {
    pub logged_in: bool,
    pub connected: bool,
    pub login_flow: LoginFlow,
    pub pending_pairing: bool,
}

/// Maps a handle snapshot (or its absence) to the public status.
pub fn resolve_instance_status(snapshot: Option<ClientStateSnapshot>) -> InstanceStatus {
    let Some(snapshot) = snapshot else {
        return InstanceStatus::Closed;
    };
    if snapshot.logged_in {
        return InstanceStatus::Open;
    }
    if !snapshot.connected {
        return InstanceStatus::Closed;
    }
    match snapshot.login_flow {
        LoginFlow::Pairing if snapshot.pending_pairing => InstanceStatus::PairingPending,
        LoginFlow::Pairing => InstanceStatus::Pairing,
        LoginFlow::QrCode => InstanceStatus::QrCode,
        LoginFlow::None => InstanceStatus::Connecting,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(logged_in: bool, connected: bool, login_flow: LoginFlow) -> ClientStateSnapshot {
        ClientStateSnapshot {
            logged_in,
            connected,
            login_flow,
            pending_pairing: false,
        }
    }

    #[test]
    fn unit_missing_handle_is_closed() {
        assert_eq!(resolve_instance_status(None), InstanceStatus::Closed);
    }

    #[test]
    fn unit_logged_in_wins_over_every_flow() {
        for flow in [LoginFlow::None, LoginFlow::QrCode, LoginFlow::Pairing] {
            assert_eq!(
                resolve_instance_status(Some(snapshot(true, false, flow))),
                InstanceStatus::Open
            );
        }
    }

    #[test]
    fn unit_connected_handles_map_to_their_login_flow() {
        assert_eq!(
            resolve_instance_status(Some(snapshot(false, true, LoginFlow::None))),
            InstanceStatus::Connecting
        );
        assert_eq!(
            resolve_instance_status(Some(snapshot(false, true, LoginFlow::QrCode))),
            InstanceStatus::QrCode
        );
        assert_eq!(
            resolve_instance_status(Some(snapshot(false, true, LoginFlow::Pairing))),
            InstanceStatus::Pairing
        );
        let pending = ClientStateSnapshot {
            pending_pairing: true,
            ..snapshot(false, true, LoginFlow::Pairing)
        };
        assert_eq!(
            resolve_instance_status(Some(pending)),
            InstanceStatus::PairingPending
        );
    }

    #[test]
    fn regression_disconnected_handle_is_closed_even_mid_pairing() {
        let pending = ClientStateSnapshot {
            pending_pairing: true,
            ..snapshot(false, false, LoginFlow::Pairing)
        };
        assert_eq!(resolve_instance_status(Some(pending)), InstanceStatus::Closed);
        assert_eq!(InstanceStatus::PairingPending.to_string(), "pairing-pending");
    }
}

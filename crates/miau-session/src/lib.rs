//! Instance connection and pairing session manager for the Miau gateway.
//!
//! Owns the in-memory registry of live per-instance protocol clients, the
//! phone-number pairing state machine with its supervised background tasks,
//! connection status resolution, and the presence-simulated dispatch applied
//! before outbound sends. The wire protocol itself is consumed through the
//! [`ProtocolClient`] capability; instance metadata goes through
//! [`InstanceRepository`].
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use miau_session::{DryRunProtocolClientFactory, SessionManager, StartPairingRequest};
//!
//! let manager = SessionManager::builder(Arc::new(DryRunProtocolClientFactory::default())).build();
//! let started = manager
//!     .start_pairing(StartPairingRequest::new("tenant-a", "5511999999999"))
//!     .await?;
//! assert!(started.success);
//! assert_eq!(manager.status("tenant-a").as_str(), "pairing-pending");
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod instance_registry;
pub mod instance_repository;
pub mod instance_status;
pub mod jid;
pub mod media_fetch;
pub mod message_send;
pub mod pairing_session;
pub mod presence_dispatch;
pub mod protocol_client;
pub mod session_error;
pub mod session_manager;

pub use clock::*;
pub use instance_registry::*;
pub use instance_repository::*;
pub use instance_status::*;
pub use jid::*;
pub use media_fetch::*;
pub use message_send::*;
pub use pairing_session::*;
pub use presence_dispatch::*;
pub use protocol_client::*;
pub use session_error::*;
pub use session_manager::*;

#[cfg(test)]
pub(crate) mod test_support;

//! HTTP surface of the Miau gateway: instance management, pairing, and
//! presence-simulated message sends over axum.
pub mod gateway_server;

pub use gateway_server::*;

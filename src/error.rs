//! Error taxonomy for the bridge.
//!
//! Call-level failures are typed errors; per-frame problems (a malformed
//! packet, a momentarily closed socket) are drops, not errors.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Speech backend socket could not be opened. Callers may retry.
    #[error("backend connect failed: {0}")]
    Connect(String),

    #[error("backend connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Socket opened but the session handshake never completed.
    #[error("session negotiation failed: {0}")]
    Negotiation(String),

    #[error("transport send failed: {0}")]
    Transport(String),

    /// Operation on a session that has already been torn down.
    #[error("session already closed")]
    Closed,

    #[error("invalid configuration: {0}")]
    Config(String),
}

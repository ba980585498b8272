//! Error taxonomy of the real-time channel.

use std::time::Duration;

/// Socket-level failure. Drives the reconnection policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open connection: {0}")]
    Connect(String),
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("connection closed by peer")]
    Closed,
}

/// The credential exchange did not succeed. Counted as a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("server rejected the credential")]
    Rejected,
    #[error("no authentication reply within {0:?}")]
    Timeout(Duration),
}

/// Outcome of [`RealtimeChannel::connect`](crate::ws::RealtimeChannel::connect).
///
/// `Transport` and `Auth` are only ever returned for the first attempt of a
/// session; later failures are reported through the status channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("channel was disconnected")]
    Disconnected,
    #[error("reconnect attempts exhausted")]
    Exhausted,
    #[error("channel driver is no longer running")]
    Stopped,
}

//! Connection state, reconnect policy and the transport seam.
//!
//! This module provides the shared types and includes the tokio-tungstenite
//! transport implementation.

use std::collections::BTreeSet;
use std::time::Duration;

use archive_shared::GroupId;
use async_trait::async_trait;

use crate::error::TransportError;

/// Connection state of a [`RealtimeChannel`](super::RealtimeChannel)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Authenticating,
    Ready,
    /// Connection lost, a reconnect is scheduled
    Degraded,
    Closed(CloseReason),
}

/// Why a channel ended up [`ConnectionState::Closed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `disconnect()` was called or every handle was dropped
    Disconnected,
    /// The reconnect budget ran out; a page reload is required
    Exhausted,
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Authenticating
        )
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, ConnectionState::Closed(CloseReason::Exhausted))
    }
}

/// Snapshot published on every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub state: ConnectionState,
    /// Generation of the current (or last) connection attempt
    pub epoch: u64,
    /// Consecutive failed attempts since the last Ready
    pub attempt: u32,
    /// Set on a Ready that follows a drop in the same session; events pushed
    /// during the gap were missed and must be backfilled over the REST API.
    pub resumed: bool,
    /// Groups the client believes are subscribed server-side
    pub subscribed: BTreeSet<GroupId>,
    pub last_error: Option<String>,
}

impl Default for ChannelStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            epoch: 0,
            attempt: 0,
            resumed: false,
            subscribed: BTreeSet::new(),
            last_error: None,
        }
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Fixed delay between attempts
    pub delay: Duration,
    /// Consecutive failures tolerated before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(3000),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Record a failed attempt and return the delay before the next one, or
    /// `None` once `max_attempts` consecutive failures have been seen.
    pub fn after_failure(&self, attempts: &mut u32) -> Option<Duration> {
        *attempts = attempts.saturating_add(1);
        (*attempts < self.max_attempts).then_some(self.delay)
    }
}

/// One open, ordered, bidirectional text stream.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next text frame; `None` once the peer closed the stream.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens a fresh [`Transport`] for every connection attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;
}

mod connection_native;
pub use connection_native::{WsConnector, WsTransport};

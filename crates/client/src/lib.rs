//! Archive Client - real-time event channel for the archive dashboard
//!
//! This crate keeps one authenticated WebSocket open to the archive server,
//! mirrors the dashboard's monitored groups into server-side subscriptions
//! and fans pushed events out to registered handlers.

pub mod config;
pub mod error;
pub mod ws;

pub use config::ChannelConfig;
pub use error::{AuthError, ChannelError, TransportError};
pub use ws::{
    ChannelStatus, CloseReason, ConnectionState, Connector, DesiredTopics, Handler,
    HandlerRegistry, RealtimeChannel, ReconnectPolicy, Transport,
};

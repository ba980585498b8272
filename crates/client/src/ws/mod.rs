//! WebSocket module for the dashboard's real-time event channel.
//!
//! This module provides:
//! - Connection management with auth handshake and auto-reconnect
//! - Subscription reconciliation against a consumer-owned desired set
//! - Type-keyed event dispatch with per-handler isolation
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐        ┌──────────────────────┐
//! │   RealtimeChannel    │        │    DesiredTopics     │
//! │ (cloneable handle)   │        │ (monitored groups)   │
//! └──────────────────────┘        └──────────────────────┘
//!            │ commands                      │ watch
//!            ▼                               ▼
//! ┌─────────────────────────────────────────────────────┐
//! │                      Driver                         │
//! │  state machine · epoch · AuthHandshake · reconciler │
//! └─────────────────────────────────────────────────────┘
//!            │ outbound                      ▲ epoch-tagged signals
//!            ▼                               │
//! ┌─────────────────────────────────────────────────────┐
//! │            Transport (WsTransport / mock)           │
//! └─────────────────────────────────────────────────────┘
//!            │ decoded ServerEvent
//!            ▼
//! ┌─────────────────────────────────────────────────────┐
//! │      EventDispatcher → HandlerRegistry handlers     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let registry = HandlerRegistry::default();
//! let desired: DesiredTopics = ["120363@g.us"].into_iter().collect();
//! let channel = RealtimeChannel::websocket(ChannelConfig::from_env(), registry, &desired);
//!
//! let on_message = Handler::new(|event| {
//!     if let ServerEvent::MessageNew(message) = event {
//!         println!("{}: {:?}", message.group_id, message.content);
//!     }
//!     Ok(())
//! });
//! channel.on(event_types::MESSAGE_NEW, &on_message);
//!
//! channel.connect(token).await?;
//! desired.toggle("120363-2@g.us", true);
//! ```

mod auth;
mod connection;
mod dispatcher;
mod manager;
mod reconciler;
mod topics;

pub use connection::{
    ChannelStatus, CloseReason, ConnectionState, Connector, ReconnectPolicy, Transport,
    WsConnector, WsTransport,
};
pub use dispatcher::{Delivery, EventDispatcher, Handler, HandlerRegistry};
pub use manager::RealtimeChannel;
pub use reconciler::{ReconcilePlan, SubscriptionReconciler};
pub use topics::DesiredTopics;

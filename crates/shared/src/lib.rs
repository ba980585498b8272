//! Shared types for the archive dashboard real-time channel.
//!
//! Holds the wire protocol spoken over the WebSocket and the domain models
//! carried in server-pushed events.

pub mod models;
pub mod protocol;
pub mod error;

pub use models::*;
pub use protocol::*;
pub use error::*;
